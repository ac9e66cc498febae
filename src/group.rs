//! Finite symmetry groups acting on image batches.
//!
//! A [`Group`] expands a batch of `n` images into `group_size * n` images,
//! group-major: all `n` images under element 0 (always the identity), then all
//! `n` under element 1, and so on. The per-group logits produced from that
//! batch are reduced back to `n` rows by [`crate::equivariant`].

use std::{fmt, str::FromStr};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    tensor::{Image, ImageBatch},
};

/// A named symmetry group over images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Group {
    /// Trivial group; the batch passes through unchanged.
    #[default]
    Identity,
    /// Rotations by 0, 90, 180 and 270 degrees counter-clockwise.
    Rot90,
    /// Identity and horizontal mirror.
    Flip,
}

/// A single group element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupElement {
    /// Rotate by `k` quarter turns counter-clockwise.
    Rotate(u8),
    /// Mirror along the width axis.
    Mirror,
}

impl GroupElement {
    /// Applies the element to one image.
    #[must_use]
    pub fn apply(&self, image: &Image) -> Image {
        match *self {
            Self::Rotate(0) => image.clone(),
            Self::Rotate(k) => image.rot90(i32::from(k)),
            Self::Mirror => image.flip_horizontal(),
        }
    }

    /// True for the identity element.
    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Rotate(0))
    }
}

impl Group {
    /// Number of group elements.
    pub fn size(&self) -> usize {
        self.elements().len()
    }

    /// Elements in expansion order, identity first.
    pub fn elements(&self) -> Vec<GroupElement> {
        match self {
            Self::Identity => vec![GroupElement::Rotate(0)],
            Self::Rot90 => (0..4).map(GroupElement::Rotate).collect(),
            Self::Flip => vec![GroupElement::Rotate(0), GroupElement::Mirror],
        }
    }

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Rot90 => "rot90",
            Self::Flip => "flip",
        }
    }

    /// Expands `batch` into `[size * n, c, h, w]`, group-major.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GroupShapeMismatch`] if a rotation group is applied to
    /// non-square images.
    pub fn transform_batch(&self, batch: &ImageBatch) -> Result<ImageBatch> {
        check_square(*self, batch)?;
        if *self == Self::Identity {
            return Ok(batch.clone());
        }
        let copies = self
            .elements()
            .into_iter()
            .map(|element| {
                if element.is_identity() {
                    Ok(batch.clone())
                } else {
                    batch.map_images(|image| element.apply(image))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        ImageBatch::concat(&copies)
    }
}

fn check_square(group: Group, batch: &ImageBatch) -> Result<()> {
    let [_, h, w] = batch.image_shape();
    if group == Group::Rot90 && h != w {
        return Err(Error::group_shape(format!(
            "group {group} needs square images, got {h}x{w}"
        )));
    }
    Ok(())
}

impl FromStr for Group {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "identity" => Ok(Self::Identity),
            "rot90" => Ok(Self::Rot90),
            "flip" => Ok(Self::Flip),
            _ => Err(Error::UnknownGroup {
                name: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Random data augmentation applied to a whole batch before group expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Augmentation {
    /// No augmentation.
    #[default]
    None,
    /// Rotate by a uniformly drawn number of quarter turns.
    Rot90,
    /// Mirror horizontally with probability one half.
    Flip,
}

impl Augmentation {
    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Rot90 => "rot90",
            Self::Flip => "flip",
        }
    }
}

impl FromStr for Augmentation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "rot90" => Ok(Self::Rot90),
            "flip" => Ok(Self::Flip),
            _ => Err(Error::UnknownAugmentation {
                name: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Augmentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Applies one randomly drawn transformation to every image in `batch`.
///
/// The same element is used for the whole batch.
///
/// # Errors
///
/// Returns [`Error::GroupShapeMismatch`] for rotations of non-square images.
pub fn random_transformed_images<R: Rng + ?Sized>(
    batch: &ImageBatch,
    augmentation: Augmentation,
    rng: &mut R,
) -> Result<ImageBatch> {
    let element = match augmentation {
        Augmentation::None => return Ok(batch.clone()),
        Augmentation::Rot90 => {
            check_square(Group::Rot90, batch)?;
            GroupElement::Rotate(rng.gen_range(0..4))
        }
        Augmentation::Flip => {
            if rng.gen_bool(0.5) {
                GroupElement::Mirror
            } else {
                GroupElement::Rotate(0)
            }
        }
    };
    if element.is_identity() {
        return Ok(batch.clone());
    }
    batch.map_images(|image| element.apply(image))
}
