//! CIFAR-100.
//!
//! Reads the binary distribution (`<root>/cifar-100-binary/{train,test}.bin`):
//! each record is one coarse label byte, one fine label byte and 3072 pixel
//! bytes (red, green and blue 32x32 planes). Fine labels are used. Without
//! the files an embedded synthetic sample is used.

use std::{fs, path::Path, sync::Arc};

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

const SIDE: usize = 32;
const PIXELS: usize = 3 * SIDE * SIDE;
const RECORD: usize = 2 + PIXELS;
/// Number of fine classes.
pub const NUM_CLASSES: usize = 100;

/// Loads CIFAR-100 for `split`.
///
/// # Errors
///
/// Returns an error if the binary file exists but is malformed.
pub fn load(source: &DatasetSource, split: Split) -> Result<SharedDataset> {
    let file = match split {
        Split::Train => "train.bin",
        Split::Eval => "test.bin",
    };
    let path = source.root.join("cifar-100-binary").join(file);
    if path.exists() {
        return Ok(Arc::new(from_binary(&path, source.preprocess)?));
    }
    warn!(
        path = %path.display(),
        "CIFAR-100 files not found, using the embedded sample"
    );
    Ok(Arc::new(embedded(split, source.preprocess)?))
}

/// Builds a lazily decoded dataset from a CIFAR-100 binary file.
///
/// # Errors
///
/// Returns an I/O error, or [`Error::Parse`] if the file is not a whole
/// number of records or holds an out-of-range label.
pub fn from_binary(path: &Path, preprocess: Preprocess) -> Result<RawImageDataset> {
    let bytes = fs::read(path).map_err(|e| Error::io(e, path))?;
    let (pixels, labels) = parse_records(&bytes)?;
    RawImageDataset::new(
        pixels,
        PixelLayout::RgbPlanar,
        (SIDE as u32, SIDE as u32),
        labels,
        NUM_CLASSES,
        preprocess,
    )
}

/// Splits raw records into planar pixels and fine labels.
///
/// # Errors
///
/// Returns [`Error::Parse`] for a partial record or a label past 99.
pub fn parse_records(bytes: &[u8]) -> Result<(Vec<u8>, Vec<usize>)> {
    if bytes.len() % RECORD != 0 {
        return Err(Error::parse(format!(
            "{} bytes is not a whole number of {RECORD}-byte records",
            bytes.len()
        )));
    }
    let count = bytes.len() / RECORD;
    let mut pixels = Vec::with_capacity(count * PIXELS);
    let mut labels = Vec::with_capacity(count);
    for record in bytes.chunks_exact(RECORD) {
        let fine = usize::from(record[1]);
        if fine >= NUM_CLASSES {
            return Err(Error::parse(format!("fine label {fine} out of range")));
        }
        labels.push(fine);
        pixels.extend_from_slice(&record[2..]);
    }
    Ok((pixels, labels))
}

/// The embedded synthetic sample: one image per class for eval, two for
/// train. Each class is a distinct color with a class-dependent stripe.
///
/// # Errors
///
/// Returns an error if the images cannot be packed into Arrow.
pub fn embedded(split: Split, preprocess: Preprocess) -> Result<ArrowImageDataset> {
    let copies = match split {
        Split::Train => 0..2,
        Split::Eval => 2..3,
    };
    let mut images = Vec::new();
    let mut labels = Vec::new();
    for class in 0..NUM_CLASSES {
        for copy in copies.clone() {
            let planes = synthetic_planes(class, copy);
            images.push(preprocess.rgb_planar(&planes, SIDE as u32, SIDE as u32)?);
            labels.push(class);
        }
    }
    ArrowImageDataset::from_images(&images, &labels)
}

fn synthetic_planes(class: usize, copy: usize) -> Vec<u8> {
    // class -> base color on a 5x5x4 grid
    let base = [
        (class % 5) * 50 + 20,
        ((class / 5) % 5) * 50 + 20,
        (class / 25) * 60 + 30,
    ];
    let stripe_row = (class * 7 + copy * 3) % SIDE;
    let mut planes = vec![0u8; PIXELS];
    for (c, &value) in base.iter().enumerate() {
        let value = u8::try_from(value).unwrap_or(u8::MAX);
        let plane = &mut planes[c * SIDE * SIDE..(c + 1) * SIDE * SIDE];
        for (i, pixel) in plane.iter_mut().enumerate() {
            let y = i / SIDE;
            *pixel = if y.abs_diff(stripe_row) <= 1 {
                u8::MAX - value
            } else {
                value
            };
        }
    }
    planes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;

    fn record(coarse: u8, fine: u8, fill: u8) -> Vec<u8> {
        let mut r = vec![coarse, fine];
        r.extend(std::iter::repeat(fill).take(PIXELS));
        r
    }

    #[test]
    fn test_parse_records_uses_fine_labels() {
        let mut bytes = record(3, 42, 10);
        bytes.extend(record(0, 7, 20));
        let (pixels, labels) = parse_records(&bytes).unwrap();
        assert_eq!(labels, vec![42, 7]);
        assert_eq!(pixels.len(), 2 * PIXELS);
        assert_eq!(pixels[PIXELS], 20);
    }

    #[test]
    fn test_parse_records_rejects_partial_and_bad_label() {
        assert!(matches!(
            parse_records(&[0; RECORD + 1]),
            Err(Error::Parse { .. })
        ));
        assert!(parse_records(&record(0, 100, 0)).is_err());
    }

    #[test]
    fn test_embedded_sample() {
        let pre = Preprocess::clip(16).unwrap();
        let train = embedded(Split::Train, pre).unwrap();
        let eval = embedded(Split::Eval, pre).unwrap();
        assert_eq!(train.len(), 200);
        assert_eq!(eval.len(), 100);
        assert_eq!(eval.num_classes(), NUM_CLASSES);
        assert_eq!(train.image_shape(), [3, 16, 16]);
        assert_ne!(synthetic_planes(1, 0), synthetic_planes(2, 0));
    }

    #[test]
    fn test_load_binary_file() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("cifar-100-binary");
        std::fs::create_dir_all(&bin).unwrap();
        let mut bytes = record(1, 5, 255);
        bytes.extend(record(1, 99, 0));
        std::fs::write(bin.join("train.bin"), bytes).unwrap();

        let source = DatasetSource::new(dir.path(), Preprocess::clip(8).unwrap());
        let ds = load(&source, Split::Train).unwrap();
        assert_eq!(ds.labels(), vec![5, 99]);
        assert_eq!(ds.num_classes(), NUM_CLASSES);
        assert_eq!(ds.get(0).unwrap().image.shape(), [3, 8, 8]);
    }
}
