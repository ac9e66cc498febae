//! Labeled image dataset abstractions.
//!
//! A [`Dataset`] is an indexed collection of `(image, label)` pairs over
//! `[0, len)`. Labels are available without decoding the image so that
//! resampling and stratification never touch pixel data.

use std::sync::Arc;

use arrow::{
    array::{Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch},
    datatypes::{DataType, Field, Schema, SchemaRef},
};
use rand::{seq::SliceRandom, SeedableRng};

use crate::{
    error::{Error, Result},
    tensor::{extract_images, extract_labels, Image},
};

/// Column holding the flattened image values.
pub const IMAGE_COLUMN: &str = "image";
/// Column holding the integer class id.
pub const LABEL_COLUMN: &str = "label";

/// One labeled example.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// The decoded image.
    pub image: Image,
    /// The integer class id.
    pub label: usize,
}

/// Trait for indexed labeled image datasets.
///
/// Implementations must be shareable across loader worker threads.
pub trait Dataset: Send + Sync {
    /// Returns the total number of examples.
    fn len(&self) -> usize;

    /// Returns true if the dataset contains no examples.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decodes the example at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfBounds`] for indices past the end, or a
    /// decoding error from the backing storage.
    fn get(&self, index: usize) -> Result<Sample>;

    /// Returns the label at `index` without decoding the image.
    fn label(&self, index: usize) -> Option<usize>;

    /// Returns the label of every example, in index order.
    ///
    /// Indices without a label are skipped, so positions only line up with
    /// dataset indices when every example is labeled. Use
    /// [`try_labels`](Dataset::try_labels) where that matters.
    fn labels(&self) -> Vec<usize> {
        (0..self.len()).filter_map(|i| self.label(i)).collect()
    }

    /// Returns the label of every example, position `i` holding the label of
    /// index `i`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] if an in-range index has no label.
    fn try_labels(&self) -> Result<Vec<usize>> {
        (0..self.len())
            .map(|i| {
                self.label(i)
                    .ok_or_else(|| Error::data(format!("example {i} has no label")))
            })
            .collect()
    }

    /// Returns the number of classes the labels are drawn from.
    fn num_classes(&self) -> usize {
        self.labels().iter().max().map_or(0, |&m| m + 1)
    }
}

impl<D: Dataset + ?Sized> Dataset for Arc<D> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        (**self).get(index)
    }

    fn label(&self, index: usize) -> Option<usize> {
        (**self).label(index)
    }

    fn labels(&self) -> Vec<usize> {
        (**self).labels()
    }

    fn try_labels(&self) -> Result<Vec<usize>> {
        (**self).try_labels()
    }

    fn num_classes(&self) -> usize {
        (**self).num_classes()
    }
}

/// An in-memory image dataset backed by Arrow RecordBatches.
///
/// Images live in a `FixedSizeList<Float32>` column named `image`, labels in
/// an `Int32` column named `label`. Labels are extracted once at
/// construction.
///
/// # Example
///
/// ```
/// use equitune::{dataset::ArrowImageDataset, tensor::Image, Dataset};
///
/// # fn main() -> equitune::Result<()> {
/// let images = vec![Image::zeros([1, 2, 2]), Image::zeros([1, 2, 2])];
/// let dataset = ArrowImageDataset::from_images(&images, &[0, 1])?;
/// assert_eq!(dataset.len(), 2);
/// assert_eq!(dataset.label(1), Some(1));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ArrowImageDataset {
    batches: Vec<RecordBatch>,
    schema: SchemaRef,
    image_shape: [usize; 3],
    labels: Vec<usize>,
}

impl ArrowImageDataset {
    /// Creates a dataset from RecordBatches sharing one schema.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The batches vector is empty
    /// - The batches have inconsistent schemas
    /// - The image or label column is missing or malformed
    pub fn new(batches: Vec<RecordBatch>, image_shape: [usize; 3]) -> Result<Self> {
        let first = batches.first().ok_or(Error::EmptyDataset)?;
        let schema = first.schema();

        let mut labels = Vec::new();
        for batch in &batches {
            if batch.schema() != schema {
                return Err(Error::data("all batches must share the same schema"));
            }
            // validates the image column up front
            extract_images(&batch.slice(0, batch.num_rows().min(1)), IMAGE_COLUMN, image_shape)?;
            labels.extend(extract_labels(batch, LABEL_COLUMN)?);
        }

        if labels.is_empty() {
            return Err(Error::EmptyDataset);
        }

        Ok(Self {
            batches,
            schema,
            image_shape,
            labels,
        })
    }

    /// Creates a dataset from a single RecordBatch.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch is empty or malformed.
    pub fn from_batch(batch: RecordBatch, image_shape: [usize; 3]) -> Result<Self> {
        Self::new(vec![batch], image_shape)
    }

    /// Creates a dataset from images and their labels.
    ///
    /// # Errors
    ///
    /// Returns an error if the lengths differ, `images` is empty, or image
    /// shapes are inconsistent.
    pub fn from_images(images: &[Image], labels: &[usize]) -> Result<Self> {
        if images.len() != labels.len() {
            return Err(Error::data(format!(
                "{} images but {} labels",
                images.len(),
                labels.len()
            )));
        }
        let shape = images.first().ok_or(Error::EmptyDataset)?.shape();
        let mut values = Vec::with_capacity(images.len() * shape.iter().product::<usize>());
        for image in images {
            if image.shape() != shape {
                return Err(Error::shape(format!(
                    "image shape {:?} differs from {:?}",
                    image.shape(),
                    shape
                )));
            }
            values.extend_from_slice(image.as_slice());
        }
        let label_values = labels
            .iter()
            .map(|&l| i32::try_from(l).map_err(|_| Error::data(format!("label {l} exceeds i32"))))
            .collect::<Result<Vec<i32>>>()?;

        let batch = image_record_batch(values, shape, label_values)?;
        Self::from_batch(batch, shape)
    }

    /// Returns the `[c, h, w]` shape of every image.
    pub fn image_shape(&self) -> [usize; 3] {
        self.image_shape
    }

    /// Returns the Arrow schema.
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    /// Returns the underlying batches.
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    fn find_row(&self, index: usize) -> Option<(usize, usize)> {
        let mut remaining = index;
        for (batch_idx, batch) in self.batches.iter().enumerate() {
            if remaining < batch.num_rows() {
                return Some((batch_idx, remaining));
            }
            remaining -= batch.num_rows();
        }
        None
    }
}

impl Dataset for ArrowImageDataset {
    fn len(&self) -> usize {
        self.labels.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let (batch_idx, local_idx) = self.find_row(index).ok_or(Error::IndexOutOfBounds {
            index,
            len: self.len(),
        })?;
        let row = self.batches[batch_idx].slice(local_idx, 1);
        let image = extract_images(&row, IMAGE_COLUMN, self.image_shape)?
            .image(0)
            .ok_or_else(|| Error::data(format!("row {index} has no image")))?;
        Ok(Sample {
            image,
            label: self.labels[index],
        })
    }

    fn label(&self, index: usize) -> Option<usize> {
        self.labels.get(index).copied()
    }

    fn labels(&self) -> Vec<usize> {
        self.labels.clone()
    }
}

/// Builds a RecordBatch with the `image` / `label` layout.
///
/// # Errors
///
/// Returns an error if `values` does not hold `labels.len()` images of
/// `image_shape`.
pub fn image_record_batch(
    values: Vec<f32>,
    image_shape: [usize; 3],
    labels: Vec<i32>,
) -> Result<RecordBatch> {
    let numel: usize = image_shape.iter().product();
    if values.len() != numel * labels.len() {
        return Err(Error::shape(format!(
            "{} values cannot hold {} images of shape {:?}",
            values.len(),
            labels.len(),
            image_shape
        )));
    }
    let list_size = i32::try_from(numel)
        .map_err(|_| Error::shape(format!("image of {numel} values is too large")))?;

    let item = Arc::new(Field::new("item", DataType::Float32, false));
    let images = FixedSizeListArray::try_new(
        Arc::clone(&item),
        list_size,
        Arc::new(Float32Array::from(values)),
        None,
    )?;
    let schema = Arc::new(Schema::new(vec![
        Field::new(IMAGE_COLUMN, DataType::FixedSizeList(item, list_size), false),
        Field::new(LABEL_COLUMN, DataType::Int32, false),
    ]));
    let columns: Vec<Arc<dyn Array>> = vec![Arc::new(images), Arc::new(Int32Array::from(labels))];
    Ok(RecordBatch::try_new(schema, columns)?)
}

/// A view of a dataset through an index list.
///
/// Indices may repeat (oversampling) or omit entries (undersampling). The
/// parent dataset is shared, never copied or mutated.
#[derive(Debug, Clone)]
pub struct Subset<D: Dataset> {
    dataset: Arc<D>,
    indices: Arc<[usize]>,
}

impl<D: Dataset> Subset<D> {
    /// Creates a subset of `dataset` at `indices`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfBounds`] if any index is past the end of the
    /// parent dataset.
    pub fn new(dataset: Arc<D>, indices: Vec<usize>) -> Result<Self> {
        let len = dataset.len();
        if let Some(&index) = indices.iter().find(|&&i| i >= len) {
            return Err(Error::IndexOutOfBounds { index, len });
        }
        Ok(Self {
            dataset,
            indices: indices.into(),
        })
    }

    /// Returns the parent indices in subset order.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Returns the parent dataset.
    pub fn parent(&self) -> &Arc<D> {
        &self.dataset
    }
}

impl<D: Dataset> Dataset for Subset<D> {
    fn len(&self) -> usize {
        self.indices.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let parent = *self.indices.get(index).ok_or(Error::IndexOutOfBounds {
            index,
            len: self.indices.len(),
        })?;
        self.dataset.get(parent)
    }

    fn label(&self, index: usize) -> Option<usize> {
        self.indices
            .get(index)
            .and_then(|&parent| self.dataset.label(parent))
    }

    fn num_classes(&self) -> usize {
        self.dataset.num_classes()
    }
}

/// Randomly partitions `dataset` into non-overlapping subsets of the given
/// lengths.
///
/// # Errors
///
/// Returns an error if the lengths do not sum to the dataset length.
pub fn random_split<D: Dataset>(
    dataset: Arc<D>,
    lengths: &[usize],
    seed: u64,
) -> Result<Vec<Subset<D>>> {
    let total: usize = lengths.iter().sum();
    if total != dataset.len() {
        return Err(Error::invalid_config(format!(
            "split lengths sum to {total}, dataset has {} examples",
            dataset.len()
        )));
    }

    let mut order: Vec<usize> = (0..total).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let mut start = 0;
    lengths
        .iter()
        .map(|&len| {
            let part = order[start..start + len].to_vec();
            start += len;
            Subset::new(Arc::clone(&dataset), part)
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::cast_precision_loss)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn create_test_dataset(rows: usize) -> ArrowImageDataset {
        let images: Vec<Image> = (0..rows)
            .map(|i| Image::from_vec(vec![i as f32; 4], [1, 2, 2]).unwrap())
            .collect();
        let labels: Vec<usize> = (0..rows).map(|i| i % 3).collect();
        ArrowImageDataset::from_images(&images, &labels).unwrap()
    }

    #[test]
    fn test_len_and_get() {
        let dataset = create_test_dataset(10);
        assert_eq!(dataset.len(), 10);
        assert!(!dataset.is_empty());

        let sample = dataset.get(7).unwrap();
        assert_eq!(sample.label, 1);
        assert_eq!(sample.image.as_slice(), &[7.0; 4]);
    }

    #[test]
    fn test_get_out_of_bounds() {
        let dataset = create_test_dataset(3);
        assert!(matches!(
            dataset.get(3),
            Err(Error::IndexOutOfBounds { index: 3, len: 3 })
        ));
        assert_eq!(dataset.label(3), None);
    }

    #[test]
    fn test_labels_and_num_classes() {
        let dataset = create_test_dataset(5);
        assert_eq!(dataset.labels(), vec![0, 1, 2, 0, 1]);
        assert_eq!(dataset.num_classes(), 3);
    }

    #[test]
    fn test_multi_batch_lookup() {
        let a = create_test_dataset(3).batches()[0].clone();
        let b = create_test_dataset(4).batches()[0].clone();
        let dataset = ArrowImageDataset::new(vec![a, b], [1, 2, 2]).unwrap();
        assert_eq!(dataset.len(), 7);
        // row 5 is row 2 of the second batch
        let sample = dataset.get(5).unwrap();
        assert_eq!(sample.image.as_slice(), &[2.0; 4]);
        assert_eq!(sample.label, 2);
    }

    #[test]
    fn test_from_images_mismatched_lengths() {
        let images = vec![Image::zeros([1, 2, 2])];
        assert!(ArrowImageDataset::from_images(&images, &[0, 1]).is_err());
        assert!(matches!(
            ArrowImageDataset::from_images(&[], &[]),
            Err(Error::EmptyDataset)
        ));
    }

    #[test]
    fn test_subset_repeats_and_bounds() {
        let dataset = Arc::new(create_test_dataset(4));
        let subset = Subset::new(Arc::clone(&dataset), vec![3, 3, 0]).unwrap();
        assert_eq!(subset.len(), 3);
        assert_eq!(subset.labels(), vec![0, 0, 0]);
        assert_eq!(subset.get(1).unwrap().image.as_slice(), &[3.0; 4]);
        assert!(Subset::new(dataset, vec![4]).is_err());
    }

    #[test]
    fn test_random_split_partitions() {
        let dataset = Arc::new(create_test_dataset(10));
        let parts = random_split(Arc::clone(&dataset), &[8, 2], 0).unwrap();
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 2);

        let all: HashSet<usize> = parts
            .iter()
            .flat_map(|p| p.indices().iter().copied())
            .collect();
        assert_eq!(all.len(), 10);

        assert!(random_split(dataset, &[8, 1], 0).is_err());
    }
}
