//! ISIC 2018 Task 3 skin lesion classification.
//!
//! Labels come from the ground-truth CSV: an `image` id column followed by
//! one-hot columns `MEL, NV, BCC, AKIEC, BKL, DF, VASC`. Images are
//! `<image_dir>/<image>.jpg`, decoded on access. Two directory layouts are
//! supported: the standard one under `<root>/ISIC2018/` and the Kaggle
//! mirror, where every directory is nested inside one of the same name.
//!
//! The class distribution is heavily skewed towards `NV`; the embedded
//! sample used when the files are missing keeps that skew so resampling has
//! something to do.

use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};

use arrow::{
    array::{Array, Float64Array, StringArray},
    datatypes::{DataType, Field, Schema},
};
use tracing::{info, warn};

use super::{
    preprocess::Preprocess, source::ImageFileDataset, DatasetSource, SharedDataset, Split,
};
use crate::{
    dataset::ArrowImageDataset,
    error::{Error, Result},
};

/// Diagnosis columns in label order.
pub const DIAGNOSIS_COLUMNS: [&str; 7] = ["MEL", "NV", "BCC", "AKIEC", "BKL", "DF", "VASC"];

/// Class counts of the embedded train sample (ISIC 2018 proportions / 100).
pub const EMBEDDED_TRAIN_COUNTS: [usize; 7] = [11, 67, 5, 3, 11, 1, 1];
/// Class counts of the embedded eval sample.
pub const EMBEDDED_EVAL_COUNTS: [usize; 7] = [2, 13, 1, 1, 2, 1, 1];

const EMBEDDED_SIDE: usize = 32;

/// Image directory and ground-truth CSV of one split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsicPaths {
    /// Directory holding `<image>.jpg` files.
    pub image_dir: PathBuf,
    /// Ground-truth CSV.
    pub label_file: PathBuf,
}

impl IsicPaths {
    /// Paths for `split` under `root`.
    ///
    /// With `kaggle`, `root` is the Kaggle dataset root (for example
    /// `/kaggle/input/isic-2018-task-3`).
    pub fn new(root: &Path, split: Split, kaggle: bool) -> Self {
        let stage = match split {
            Split::Train => "Training",
            Split::Eval => "Validation",
        };
        let input = format!("ISIC2018_Task3_{stage}_Input");
        let truth = format!("ISIC2018_Task3_{stage}_GroundTruth");
        if kaggle {
            Self {
                image_dir: root.join(&input).join(&input),
                label_file: root.join(&truth).join(&truth).join(format!("{truth}.csv")),
            }
        } else {
            let base = root.join("ISIC2018");
            Self {
                image_dir: base.join(&input),
                label_file: base.join(format!("{truth}.csv")),
            }
        }
    }
}

/// Loads ISIC 2018 for `split`.
///
/// # Errors
///
/// Returns an error if the ground-truth CSV exists but cannot be parsed.
pub fn load(source: &DatasetSource, split: Split) -> Result<SharedDataset> {
    let paths = IsicPaths::new(&source.root, split, source.kaggle);
    if paths.label_file.exists() {
        return Ok(Arc::new(from_ground_truth(&paths, source.preprocess)?));
    }
    warn!(
        path = %paths.label_file.display(),
        "ISIC 2018 ground truth not found, using the embedded sample"
    );
    Ok(Arc::new(embedded(split, source.preprocess)?))
}

/// Builds a lazily decoded dataset from a ground-truth CSV.
///
/// # Errors
///
/// Returns an I/O or Arrow error for an unreadable CSV, and [`Error::Data`]
/// for a row without a positive diagnosis.
pub fn from_ground_truth(paths: &IsicPaths, preprocess: Preprocess) -> Result<ImageFileDataset> {
    let rows = read_ground_truth(&paths.label_file)?;
    info!(
        examples = rows.len(),
        dir = %paths.image_dir.display(),
        "loaded ISIC 2018 ground truth"
    );
    let files = rows
        .into_iter()
        .map(|(id, label)| (paths.image_dir.join(format!("{id}.jpg")), label))
        .collect();
    Ok(ImageFileDataset::new(
        files,
        DIAGNOSIS_COLUMNS.len(),
        preprocess,
    ))
}

/// Reads `(image id, label)` pairs; the label is the column index of the
/// largest diagnosis value.
///
/// # Errors
///
/// See [`from_ground_truth`].
pub fn read_ground_truth(path: &Path) -> Result<Vec<(String, usize)>> {
    let mut fields = vec![Field::new("image", DataType::Utf8, false)];
    fields.extend(
        DIAGNOSIS_COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Float64, false)),
    );
    let schema = Arc::new(Schema::new(fields));

    let file = File::open(path).map_err(|e| Error::io(e, path))?;
    let reader = arrow_csv::ReaderBuilder::new(schema)
        .with_header(true)
        .build(file)?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;
        let ids = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| Error::column_not_found("image"))?;
        let diagnoses = (1..=DIAGNOSIS_COLUMNS.len())
            .map(|c| {
                batch
                    .column(c)
                    .as_any()
                    .downcast_ref::<Float64Array>()
                    .ok_or_else(|| Error::column_not_found(DIAGNOSIS_COLUMNS[c - 1]))
            })
            .collect::<Result<Vec<_>>>()?;

        for row in 0..batch.num_rows() {
            let (label, score) = diagnoses
                .iter()
                .map(|col| col.value(row))
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (i, v)| {
                    if v > best.1 {
                        (i, v)
                    } else {
                        best
                    }
                });
            if score <= 0.0 || ids.is_null(row) {
                return Err(Error::data(format!(
                    "{}: row {row} has no diagnosis",
                    path.display()
                )));
            }
            rows.push((ids.value(row).to_string(), label));
        }
    }
    Ok(rows)
}

/// The embedded imbalanced sample for `split`.
///
/// # Errors
///
/// Returns an error if the images cannot be packed into Arrow.
pub fn embedded(split: Split, preprocess: Preprocess) -> Result<ArrowImageDataset> {
    let counts = match split {
        Split::Train => EMBEDDED_TRAIN_COUNTS,
        Split::Eval => EMBEDDED_EVAL_COUNTS,
    };
    let mut images = Vec::new();
    let mut labels = Vec::new();
    for (class, &count) in counts.iter().enumerate() {
        for copy in 0..count {
            let planes = lesion_planes(class, copy);
            let side = EMBEDDED_SIDE as u32;
            images.push(preprocess.rgb_planar(&planes, side, side)?);
            labels.push(class);
        }
    }
    ArrowImageDataset::from_images(&images, &labels)
}

/// A skin-toned square with a dark disc whose radius and hue depend on the
/// class.
fn lesion_planes(class: usize, copy: usize) -> Vec<u8> {
    let side = EMBEDDED_SIDE;
    let skin = [224u8, 172, 150];
    let lesion = [
        u8::try_from(40 + class * 25).unwrap_or(u8::MAX),
        u8::try_from(30 + (class * 13) % 60).unwrap_or(u8::MAX),
        u8::try_from(20 + (class * 31) % 90).unwrap_or(u8::MAX),
    ];
    let radius = 4 + class + copy % 3;
    let center = (side / 2 + copy % 5, side / 2 + copy % 3);

    let mut planes = vec![0u8; 3 * side * side];
    for y in 0..side {
        for x in 0..side {
            let dy = y.abs_diff(center.0);
            let dx = x.abs_diff(center.1);
            let inside = dx * dx + dy * dy <= radius * radius;
            for c in 0..3 {
                planes[c * side * side + y * side + x] = if inside { lesion[c] } else { skin[c] };
            }
        }
    }
    planes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dataset::Dataset, imbalance::ImbalanceDetector};

    const CSV: &str = "image,MEL,NV,BCC,AKIEC,BKL,DF,VASC\n\
        ISIC_0024306,0.0,1.0,0.0,0.0,0.0,0.0,0.0\n\
        ISIC_0024307,1.0,0.0,0.0,0.0,0.0,0.0,0.0\n\
        ISIC_0024308,0.0,0.0,0.0,0.0,0.0,0.0,1.0\n";

    #[test]
    fn test_standard_and_kaggle_layouts() {
        let root = Path::new("/data");
        let std_paths = IsicPaths::new(root, Split::Train, false);
        assert_eq!(
            std_paths.image_dir,
            PathBuf::from("/data/ISIC2018/ISIC2018_Task3_Training_Input")
        );
        assert_eq!(
            std_paths.label_file,
            PathBuf::from("/data/ISIC2018/ISIC2018_Task3_Training_GroundTruth.csv")
        );

        let kaggle = IsicPaths::new(Path::new("/kaggle/input/isic-2018-task-3"), Split::Eval, true);
        assert_eq!(
            kaggle.label_file,
            PathBuf::from(
                "/kaggle/input/isic-2018-task-3/ISIC2018_Task3_Validation_GroundTruth/\
                 ISIC2018_Task3_Validation_GroundTruth/ISIC2018_Task3_Validation_GroundTruth.csv"
            )
        );
        assert!(kaggle
            .image_dir
            .ends_with("ISIC2018_Task3_Validation_Input/ISIC2018_Task3_Validation_Input"));
    }

    #[test]
    fn test_read_ground_truth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gt.csv");
        std::fs::write(&path, CSV).unwrap();
        let rows = read_ground_truth(&path).unwrap();
        assert_eq!(
            rows,
            vec![
                ("ISIC_0024306".to_string(), 1),
                ("ISIC_0024307".to_string(), 0),
                ("ISIC_0024308".to_string(), 6),
            ]
        );
    }

    #[test]
    fn test_row_without_diagnosis_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gt.csv");
        std::fs::write(
            &path,
            "image,MEL,NV,BCC,AKIEC,BKL,DF,VASC\nISIC_1,0,0,0,0,0,0,0\n",
        )
        .unwrap();
        assert!(matches!(read_ground_truth(&path), Err(Error::Data { .. })));
    }

    #[test]
    fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IsicPaths::new(dir.path(), Split::Train, false);
        std::fs::create_dir_all(&paths.image_dir).unwrap();
        std::fs::write(&paths.label_file, CSV).unwrap();
        image::RgbImage::from_pixel(12, 10, image::Rgb([200, 120, 90]))
            .save(paths.image_dir.join("ISIC_0024306.jpg"))
            .unwrap();

        let source = DatasetSource::new(dir.path(), Preprocess::clip(8).unwrap());
        let ds = load(&source, Split::Train).unwrap();
        assert_eq!(ds.labels(), vec![1, 0, 6]);
        assert_eq!(ds.num_classes(), 7);
        assert_eq!(ds.get(0).unwrap().image.shape(), [3, 8, 8]);
        // missing jpg surfaces on access
        assert!(ds.get(1).is_err());
    }

    #[test]
    fn test_embedded_sample_is_imbalanced() {
        let pre = Preprocess::clip(16).unwrap();
        let train = embedded(Split::Train, pre).unwrap();
        assert_eq!(train.len(), EMBEDDED_TRAIN_COUNTS.iter().sum::<usize>());
        let report = ImbalanceDetector::analyze_labels(&train.labels());
        assert!(report.is_imbalanced());
        assert_eq!(report.distribution.majority_class(), Some(1));
    }
}
