//! Lazily decoded datasets.
//!
//! Full-size benchmark sets are kept as raw bytes or file paths and only
//! preprocessed when a loader worker asks for an example, so memory stays
//! proportional to the encoded data.

use std::{fmt, path::PathBuf, sync::Arc};

use super::preprocess::Preprocess;
use crate::{
    dataset::{Dataset, Sample},
    error::{Error, Result},
};

/// Byte layout of one raw image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// One 8-bit channel.
    Gray,
    /// Three 8-bit planes: red, green, blue.
    RgbPlanar,
}

impl PixelLayout {
    fn channels(self) -> usize {
        match self {
            Self::Gray => 1,
            Self::RgbPlanar => 3,
        }
    }
}

/// Images stored back to back as raw 8-bit pixels.
#[derive(Clone)]
pub struct RawImageDataset {
    pixels: Arc<[u8]>,
    layout: PixelLayout,
    width: u32,
    height: u32,
    labels: Vec<usize>,
    num_classes: usize,
    preprocess: Preprocess,
}

impl RawImageDataset {
    /// Wraps `pixels`, which must hold one `width x height` image per label.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the byte count does not match.
    pub fn new(
        pixels: Vec<u8>,
        layout: PixelLayout,
        (width, height): (u32, u32),
        labels: Vec<usize>,
        num_classes: usize,
        preprocess: Preprocess,
    ) -> Result<Self> {
        let expected = image_bytes(layout, width, height) * labels.len();
        if pixels.len() != expected {
            return Err(Error::shape(format!(
                "{} pixel bytes for {} images of {width}x{height}x{}",
                pixels.len(),
                labels.len(),
                layout.channels()
            )));
        }
        Ok(Self {
            pixels: pixels.into(),
            layout,
            width,
            height,
            labels,
            num_classes,
            preprocess,
        })
    }
}

fn image_bytes(layout: PixelLayout, width: u32, height: u32) -> usize {
    layout.channels() * width as usize * height as usize
}

impl fmt::Debug for RawImageDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawImageDataset")
            .field("len", &self.labels.len())
            .field("layout", &self.layout)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("num_classes", &self.num_classes)
            .finish_non_exhaustive()
    }
}

impl Dataset for RawImageDataset {
    fn len(&self) -> usize {
        self.labels.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let label = self.label(index).ok_or(Error::IndexOutOfBounds {
            index,
            len: self.len(),
        })?;
        let size = image_bytes(self.layout, self.width, self.height);
        let bytes = &self.pixels[index * size..(index + 1) * size];
        let image = match self.layout {
            PixelLayout::Gray => self.preprocess.gray(bytes, self.width, self.height)?,
            PixelLayout::RgbPlanar => self.preprocess.rgb_planar(bytes, self.width, self.height)?,
        };
        Ok(Sample { image, label })
    }

    fn label(&self, index: usize) -> Option<usize> {
        self.labels.get(index).copied()
    }

    fn labels(&self) -> Vec<usize> {
        self.labels.clone()
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// Image files with known labels, decoded on access.
#[derive(Debug, Clone)]
pub struct ImageFileDataset {
    files: Vec<(PathBuf, usize)>,
    num_classes: usize,
    preprocess: Preprocess,
}

impl ImageFileDataset {
    /// Creates a dataset over `(path, label)` pairs.
    pub fn new(files: Vec<(PathBuf, usize)>, num_classes: usize, preprocess: Preprocess) -> Self {
        Self {
            files,
            num_classes,
            preprocess,
        }
    }

    /// Path of example `index`.
    pub fn path(&self, index: usize) -> Option<&PathBuf> {
        self.files.get(index).map(|(path, _)| path)
    }
}

impl Dataset for ImageFileDataset {
    fn len(&self) -> usize {
        self.files.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let (path, label) = self.files.get(index).ok_or(Error::IndexOutOfBounds {
            index,
            len: self.files.len(),
        })?;
        Ok(Sample {
            image: self.preprocess.load(path)?,
            label: *label,
        })
    }

    fn label(&self, index: usize) -> Option<usize> {
        self.files.get(index).map(|&(_, label)| label)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}
