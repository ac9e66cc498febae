//! MNIST handwritten digits.
//!
//! Reads the IDX files of the torchvision layout
//! (`<root>/MNIST/raw/{train,t10k}-{images-idx3,labels-idx1}-ubyte`). Without
//! them an embedded synthetic sample of stroke-drawn digits is used so runs
//! work offline.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::warn;

use super::{
    preprocess::Preprocess,
    source::{PixelLayout, RawImageDataset},
    DatasetSource, SharedDataset, Split,
};
use crate::{
    dataset::ArrowImageDataset,
    error::{Error, Result},
};

const SIDE: usize = 28;
const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;
/// Embedded examples per digit, train split.
pub const EMBEDDED_TRAIN_PER_DIGIT: usize = 8;
/// Embedded examples per digit, eval split.
pub const EMBEDDED_EVAL_PER_DIGIT: usize = 2;

/// Loads MNIST for `split`.
///
/// # Errors
///
/// Returns an error if the IDX files exist but are malformed.
pub fn load(source: &DatasetSource, split: Split) -> Result<SharedDataset> {
    let (images, labels) = idx_paths(&source.root, split);
    if images.exists() && labels.exists() {
        return Ok(Arc::new(from_idx(&images, &labels, source.preprocess)?));
    }
    warn!(
        path = %images.display(),
        "MNIST files not found, using the embedded sample"
    );
    Ok(Arc::new(embedded(split, source.preprocess)?))
}

fn idx_paths(root: &Path, split: Split) -> (PathBuf, PathBuf) {
    let dir = root.join("MNIST").join("raw");
    let prefix = match split {
        Split::Train => "train",
        Split::Eval => "t10k",
    };
    (
        dir.join(format!("{prefix}-images-idx3-ubyte")),
        dir.join(format!("{prefix}-labels-idx1-ubyte")),
    )
}

/// Builds a lazily decoded dataset from an IDX image/label file pair.
///
/// # Errors
///
/// Returns an I/O error, or [`Error::Parse`] for a bad header or mismatched
/// counts.
pub fn from_idx(images: &Path, labels: &Path, preprocess: Preprocess) -> Result<RawImageDataset> {
    let image_bytes = fs::read(images).map_err(|e| Error::io(e, images))?;
    let label_bytes = fs::read(labels).map_err(|e| Error::io(e, labels))?;
    let (rows, cols, pixels) = parse_idx_images(&image_bytes)?;
    let labels = parse_idx_labels(&label_bytes)?;
    let expected = labels
        .len()
        .checked_mul(frame_len(rows, cols)?)
        .ok_or_else(|| Error::parse("IDX sizes overflow"))?;
    if pixels.len() != expected {
        return Err(Error::parse(format!(
            "{} holds a different number of images than {} has labels",
            images.display(),
            labels.len()
        )));
    }
    RawImageDataset::new(
        pixels.to_vec(),
        PixelLayout::Gray,
        (cols, rows),
        labels,
        10,
        preprocess,
    )
}

fn be_u32(bytes: &[u8], at: usize) -> Result<u32> {
    bytes
        .get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| Error::parse("truncated IDX header"))
}

fn frame_len(rows: u32, cols: u32) -> Result<usize> {
    (rows as usize)
        .checked_mul(cols as usize)
        .ok_or_else(|| Error::parse(format!("IDX frame {rows}x{cols} overflows")))
}

/// Parses an IDX3 image file into `(rows, cols, pixels)`.
///
/// # Errors
///
/// Returns [`Error::Parse`] for a wrong magic number or truncated data.
pub fn parse_idx_images(bytes: &[u8]) -> Result<(u32, u32, &[u8])> {
    let magic = be_u32(bytes, 0)?;
    if magic != IMAGES_MAGIC {
        return Err(Error::parse(format!("bad IDX image magic {magic:#010x}")));
    }
    let count = be_u32(bytes, 4)? as usize;
    let rows = be_u32(bytes, 8)?;
    let cols = be_u32(bytes, 12)?;
    let len = frame_len(rows, cols)?
        .checked_mul(count)
        .ok_or_else(|| Error::parse(format!("IDX header declares {count} oversized images")))?;
    let end = len
        .checked_add(16)
        .ok_or_else(|| Error::parse("IDX image length overflows"))?;
    let pixels = bytes
        .get(16..end)
        .ok_or_else(|| Error::parse(format!("IDX image file truncated, expected {len} pixels")))?;
    Ok((rows, cols, pixels))
}

/// Parses an IDX1 label file.
///
/// # Errors
///
/// Returns [`Error::Parse`] for a wrong magic number or truncated data.
pub fn parse_idx_labels(bytes: &[u8]) -> Result<Vec<usize>> {
    let magic = be_u32(bytes, 0)?;
    if magic != LABELS_MAGIC {
        return Err(Error::parse(format!("bad IDX label magic {magic:#010x}")));
    }
    let count = be_u32(bytes, 4)? as usize;
    let labels = bytes
        .get(8..count.saturating_add(8))
        .ok_or_else(|| Error::parse(format!("IDX label file truncated, expected {count}")))?;
    Ok(labels.iter().map(|&b| usize::from(b)).collect())
}

/// The embedded synthetic sample for `split`, preprocessed eagerly.
///
/// # Errors
///
/// Returns an error if the images cannot be packed into Arrow.
pub fn embedded(split: Split, preprocess: Preprocess) -> Result<ArrowImageDataset> {
    let copies = match split {
        Split::Train => 0..EMBEDDED_TRAIN_PER_DIGIT,
        Split::Eval => EMBEDDED_TRAIN_PER_DIGIT..EMBEDDED_TRAIN_PER_DIGIT + EMBEDDED_EVAL_PER_DIGIT,
    };
    let mut images = Vec::new();
    let mut labels = Vec::new();
    for digit in 0..10 {
        for copy in copies.clone() {
            images.push(preprocess.gray(&draw_digit(digit, copy), SIDE as u32, SIDE as u32)?);
            labels.push(digit);
        }
    }
    ArrowImageDataset::from_images(&images, &labels)
}

// Seven-segment strokes: top, upper-left, upper-right, middle, lower-left,
// lower-right, bottom.
const SEGMENTS: [[bool; 7]; 10] = [
    [true, true, true, false, true, true, true],
    [false, false, true, false, false, true, false],
    [true, false, true, true, true, false, true],
    [true, false, true, true, false, true, true],
    [false, true, true, true, false, true, false],
    [true, true, false, true, false, true, true],
    [true, true, false, true, true, true, true],
    [true, false, true, false, false, true, false],
    [true, true, true, true, true, true, true],
    [true, true, true, true, false, true, true],
];

/// Draws `digit` as 28x28 grayscale bytes, shifted and thickened a little
/// per `copy` so examples of one class differ.
fn draw_digit(digit: usize, copy: usize) -> Vec<u8> {
    let mut img = vec![0u8; SIDE * SIDE];
    let dx = copy % 3;
    let dy = (copy / 3) % 3;
    let (left, right) = (8 + dx, 18 + dx);
    let (top, mid, bottom) = (5 + dy, 13 + dy, 21 + dy);
    let thick = 1 + copy % 2;
    let intensity = 255 - u8::try_from(copy * 8).unwrap_or(0);

    let hline = |img: &mut [u8], y: usize, x0: usize, x1: usize| {
        for t in 0..thick {
            for x in x0..=x1 {
                set_pixel(img, x, y + t, intensity);
            }
        }
    };
    let segs = SEGMENTS.get(digit).copied().unwrap_or([false; 7]);
    if segs[0] {
        hline(&mut img, top, left, right);
    }
    if segs[3] {
        hline(&mut img, mid, left, right);
    }
    if segs[6] {
        hline(&mut img, bottom, left, right);
    }
    let vlines = [
        (segs[1], left, top, mid),
        (segs[2], right, top, mid),
        (segs[4], left, mid, bottom),
        (segs[5], right, mid, bottom),
    ];
    for (on, x, y0, y1) in vlines {
        if on {
            for t in 0..thick {
                for y in y0..=y1 {
                    set_pixel(&mut img, x + t, y, intensity);
                }
            }
        }
    }
    img
}

fn set_pixel(img: &mut [u8], x: usize, y: usize, val: u8) {
    if x < SIDE && y < SIDE {
        img[y * SIDE + x] = val;
    }
}
