//! ImageNet-V2 (matched-frequency).
//!
//! Expects the extracted archive at
//! `<root>/imagenetv2-matched-frequency-format-val/<class_id>/<file>`, where
//! `class_id` is the ImageNet class index `0..1000`. The 10 000 images are
//! split at random into 8 000 for finetuning and 2 000 for evaluation.
//! There is no embedded sample.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::info;

use super::{
    preprocess::Preprocess, source::ImageFileDataset, DatasetSource, SharedDataset, Split,
};
use crate::{
    dataset::{random_split, Dataset},
    error::{Error, Result},
};

/// Directory name of the extracted archive.
pub const FOLDER: &str = "imagenetv2-matched-frequency-format-val";
/// Number of classes.
pub const NUM_CLASSES: usize = 1000;
/// Finetuning share of the full 10 000-image set.
pub const TRAIN_SIZE: usize = 8000;
/// Evaluation share of the full 10 000-image set.
pub const EVAL_SIZE: usize = 2000;

/// Loads `split` of ImageNet-V2; the split is drawn with `source.seed`.
///
/// # Errors
///
/// Returns [`Error::Data`] if the folder is missing or holds no images.
pub fn load(source: &DatasetSource, split: Split) -> Result<SharedDataset> {
    let full = Arc::new(from_folder(&source.root.join(FOLDER), source.preprocess)?);
    let lengths = split_lengths(full.len());
    let mut parts = random_split(full, &lengths, source.seed)?;
    let part = match split {
        Split::Train => parts.swap_remove(0),
        Split::Eval => parts.swap_remove(1),
    };
    Ok(Arc::new(part))
}

/// `[train, eval]` sizes for a set of `total` images: 8000/2000 for the
/// full set, otherwise 80/20.
pub fn split_lengths(total: usize) -> [usize; 2] {
    if total == TRAIN_SIZE + EVAL_SIZE {
        [TRAIN_SIZE, EVAL_SIZE]
    } else {
        let train = total * 4 / 5;
        [train, total - train]
    }
}

/// Indexes a `<class_id>/<file>` folder tree.
///
/// Entries whose directory name is not a class index below 1000 are
/// skipped. Files are ordered by class, then by name.
///
/// # Errors
///
/// Returns [`Error::Data`] if `dir` is missing or contains no images, and
/// an I/O error if it cannot be listed.
pub fn from_folder(dir: &Path, preprocess: Preprocess) -> Result<ImageFileDataset> {
    if !dir.is_dir() {
        return Err(Error::data(format!(
            "ImageNet-V2 not found at {}",
            dir.display()
        )));
    }
    let mut files: Vec<(PathBuf, usize)> = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| Error::io(e, dir))? {
        let entry = entry.map_err(|e| Error::io(e, dir))?;
        let Some(class) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<usize>().ok())
            .filter(|&c| c < NUM_CLASSES)
        else {
            continue;
        };
        let class_dir = entry.path();
        if !class_dir.is_dir() {
            continue;
        }
        for file in fs::read_dir(&class_dir).map_err(|e| Error::io(e, &class_dir))? {
            let path = file.map_err(|e| Error::io(e, &class_dir))?.path();
            if path.is_file() {
                files.push((path, class));
            }
        }
    }
    if files.is_empty() {
        return Err(Error::data(format!("no images under {}", dir.display())));
    }
    files.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    info!(examples = files.len(), dir = %dir.display(), "indexed ImageNet-V2");
    Ok(ImageFileDataset::new(files, NUM_CLASSES, preprocess))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_tree(root: &Path, per_class: &[(usize, usize)]) {
        for &(class, count) in per_class {
            let dir = root.join(FOLDER).join(class.to_string());
            fs::create_dir_all(&dir).unwrap();
            for i in 0..count {
                image::RgbImage::from_pixel(4, 4, image::Rgb([i as u8, 0, 0]))
                    .save(dir.join(format!("{i}.png")))
                    .unwrap();
            }
        }
        // ignored entries
        fs::create_dir_all(root.join(FOLDER).join("not-a-class")).unwrap();
    }

    #[test]
    fn test_split_lengths() {
        assert_eq!(split_lengths(10_000), [8000, 2000]);
        assert_eq!(split_lengths(10), [8, 2]);
        assert_eq!(split_lengths(0), [0, 0]);
    }

    #[test]
    fn test_missing_folder() {
        let dir = tempfile::tempdir().unwrap();
        let source = DatasetSource::new(dir.path(), Preprocess::clip(4).unwrap());
        assert!(matches!(
            load(&source, Split::Train),
            Err(Error::Data { .. })
        ));
    }

    #[test]
    fn test_folder_index_and_disjoint_split() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), &[(0, 3), (7, 4), (999, 3)]);
        let pre = Preprocess::clip(4).unwrap();

        let full = from_folder(&dir.path().join(FOLDER), pre).unwrap();
        assert_eq!(full.len(), 10);
        assert_eq!(full.num_classes(), NUM_CLASSES);
        assert_eq!(full.label(0), Some(0));
        assert_eq!(full.label(9), Some(999));

        let source = DatasetSource::new(dir.path(), pre);
        let train = load(&source, Split::Train).unwrap();
        let eval = load(&source, Split::Eval).unwrap();
        assert_eq!((train.len(), eval.len()), (8, 2));

        assert_eq!(eval.get(1).unwrap().image.shape(), [3, 4, 4]);

        // both splits come from one seeded permutation
        let train_again = load(&source, Split::Train).unwrap();
        assert_eq!(train.labels(), train_again.labels());

        let mut all = train.labels();
        all.extend(eval.labels());
        all.sort_unstable();
        assert_eq!(all, full.labels());
    }
}
