//! DataLoader for batched iteration over labeled image datasets.
//!
//! The [`DataLoader`] iterates a dataset in fixed-size batches, optionally
//! reshuffling at the start of every pass. [`CyclicLoader`] chains passes
//! forever, which is how iteration-count driven training loops consume it.

use std::sync::Arc;

use rand::{seq::SliceRandom, SeedableRng};

use crate::{
    dataset::Dataset,
    error::{Error, Result},
    parallel::{Batch, BatchIter},
};

/// A data loader that provides batched iteration over a dataset.
///
/// The DataLoader wraps a dataset and provides:
/// - Configurable batch sizes (the final partial batch is kept by default)
/// - Optional shuffling, redone at the start of every pass
/// - Parallel fetch workers with in-order delivery
///
/// # Example
///
/// ```
/// use equitune::{
///     datasets::{mnist, Preprocess, Split},
///     DataLoader,
/// };
///
/// let dataset = mnist::embedded(Split::Train, Preprocess::clip(8).unwrap()).unwrap();
/// let loader = DataLoader::new(dataset).batch_size(32).shuffle(true).seed(42);
///
/// for batch in loader.iter() {
///     let batch = batch.unwrap();
///     println!("Batch with {} images", batch.len());
/// }
/// ```
#[derive(Debug)]
pub struct DataLoader<D: Dataset> {
    dataset: Arc<D>,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    seed: Option<u64>,
    num_workers: usize,
    prefetch: usize,
}

impl<D: Dataset> Clone for DataLoader<D> {
    fn clone(&self) -> Self {
        Self {
            dataset: Arc::clone(&self.dataset),
            batch_size: self.batch_size,
            shuffle: self.shuffle,
            drop_last: self.drop_last,
            seed: self.seed,
            num_workers: self.num_workers,
            prefetch: self.prefetch,
        }
    }
}

impl<D: Dataset + 'static> DataLoader<D> {
    /// Creates a new DataLoader wrapping the given dataset.
    ///
    /// Default configuration:
    /// - batch_size: 1
    /// - shuffle: false
    /// - drop_last: false
    /// - seed: None (random)
    /// - num_workers: 0 (fetch on the calling thread)
    pub fn new(dataset: D) -> Self {
        Self::from_arc(Arc::new(dataset))
    }

    /// Creates a DataLoader over an already shared dataset.
    pub fn from_arc(dataset: Arc<D>) -> Self {
        Self {
            dataset,
            batch_size: 1,
            shuffle: false,
            drop_last: false,
            seed: None,
            num_workers: 0,
            prefetch: 2,
        }
    }

    /// Sets the batch size.
    ///
    /// Each iteration will yield a batch with at most this many images.
    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Enables or disables shuffling.
    ///
    /// When enabled, the index order is randomized before each pass.
    #[must_use]
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Sets whether to drop the last incomplete batch.
    #[must_use]
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Sets the random seed for shuffling.
    ///
    /// Pass `k` shuffles with a generator derived from `seed` and `k`, so
    /// passes differ from each other but a run is reproducible.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the number of fetch worker threads (0 = calling thread only).
    #[must_use]
    pub fn num_workers(mut self, workers: usize) -> Self {
        self.num_workers = workers;
        self
    }

    /// Sets how many batches each worker may decode ahead.
    #[must_use]
    pub fn prefetch(mut self, size: usize) -> Self {
        self.prefetch = size.max(1);
        self
    }

    /// Returns the configured batch size.
    pub fn get_batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns whether shuffling is enabled.
    pub fn is_shuffle(&self) -> bool {
        self.shuffle
    }

    /// Returns whether drop_last is enabled.
    pub fn is_drop_last(&self) -> bool {
        self.drop_last
    }

    /// Returns the number of fetch workers.
    pub fn get_num_workers(&self) -> usize {
        self.num_workers
    }

    /// Returns the number of batches yielded per pass.
    pub fn num_batches(&self) -> usize {
        let len = self.dataset.len();
        if self.drop_last {
            len / self.batch_size
        } else {
            len.div_ceil(self.batch_size)
        }
    }

    /// Returns the total number of examples in the underlying dataset.
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    /// Returns true if the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Returns the underlying dataset.
    pub fn dataset(&self) -> &Arc<D> {
        &self.dataset
    }

    /// Index order for pass `epoch`.
    pub fn epoch_indices(&self, epoch: u64) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            let mut rng = match self.seed {
                Some(seed) => rand::rngs::StdRng::seed_from_u64(seed.wrapping_add(epoch)),
                None => rand::rngs::StdRng::from_entropy(),
            };
            indices.shuffle(&mut rng);
        }
        indices
    }

    /// Starts pass `epoch` over the dataset.
    pub fn epoch(&self, epoch: u64) -> BatchIter<D> {
        let chunks: Vec<Vec<usize>> = self
            .epoch_indices(epoch)
            .chunks(self.batch_size)
            .filter(|chunk| !self.drop_last || chunk.len() == self.batch_size)
            .map(<[usize]>::to_vec)
            .collect();
        BatchIter::spawn(
            Arc::clone(&self.dataset),
            chunks,
            self.num_workers,
            self.prefetch,
        )
    }

    /// Starts the first pass over the dataset.
    pub fn iter(&self) -> BatchIter<D> {
        self.epoch(0)
    }

    /// Turns the loader into an endless batch stream.
    pub fn cycle(self) -> CyclicLoader<D> {
        CyclicLoader::new(self)
    }
}

impl<D: Dataset + 'static> IntoIterator for DataLoader<D> {
    type Item = Result<Batch>;
    type IntoIter = BatchIter<D>;

    fn into_iter(self) -> Self::IntoIter {
        self.epoch(0)
    }
}

/// Endless batch stream that restarts its loader whenever a pass ends.
///
/// Each restart begins a new pass, so a shuffling loader is reshuffled.
/// A loader whose pass yields no batch at all produces
/// [`Error::EmptyDataset`] instead of spinning.
#[derive(Debug)]
pub struct CyclicLoader<D: Dataset> {
    loader: DataLoader<D>,
    current: Option<BatchIter<D>>,
    epoch: u64,
}

impl<D: Dataset + 'static> CyclicLoader<D> {
    /// Wraps `loader`.
    pub fn new(loader: DataLoader<D>) -> Self {
        Self {
            loader,
            current: None,
            epoch: 0,
        }
    }

    /// Number of passes started so far.
    pub fn passes_started(&self) -> u64 {
        if self.current.is_some() {
            self.epoch + 1
        } else {
            self.epoch
        }
    }

    /// Returns the next batch, restarting the loader when needed.
    ///
    /// # Errors
    ///
    /// Propagates fetch errors, and returns [`Error::EmptyDataset`] if a
    /// fresh pass yields nothing.
    pub fn next_batch(&mut self) -> Result<Batch> {
        if let Some(batch) = self.current.as_mut().and_then(Iterator::next) {
            return batch;
        }
        if self.current.is_some() {
            self.epoch += 1;
        }
        let mut pass = self.loader.epoch(self.epoch);
        let first = pass.next();
        self.current = Some(pass);
        first.unwrap_or(Err(Error::EmptyDataset))
    }
}

impl<D: Dataset + 'static> Iterator for CyclicLoader<D> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_batch())
    }
}

/// Builder for creating DataLoaders with more complex configurations.
#[derive(Debug, Default)]
pub struct DataLoaderBuilder {
    batch_size: Option<usize>,
    shuffle: Option<bool>,
    drop_last: Option<bool>,
    seed: Option<u64>,
    num_workers: Option<usize>,
}

impl DataLoaderBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the batch size.
    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Sets whether to shuffle.
    #[must_use]
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = Some(shuffle);
        self
    }

    /// Sets whether to drop the last incomplete batch.
    #[must_use]
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = Some(drop_last);
        self
    }

    /// Sets the random seed.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the number of fetch workers.
    #[must_use]
    pub fn num_workers(mut self, workers: usize) -> Self {
        self.num_workers = Some(workers);
        self
    }

    /// Builds a DataLoader with the given dataset.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch size is zero or the dataset is empty.
    pub fn build<D: Dataset + 'static>(self, dataset: D) -> Result<DataLoader<D>> {
        self.build_arc(Arc::new(dataset))
    }

    /// Builds a DataLoader over a shared dataset.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch size is zero or the dataset is empty.
    pub fn build_arc<D: Dataset + 'static>(self, dataset: Arc<D>) -> Result<DataLoader<D>> {
        let batch_size = self.batch_size.unwrap_or(1);
        if batch_size == 0 {
            return Err(Error::invalid_config("batch_size must be greater than 0"));
        }
        if dataset.is_empty() {
            return Err(Error::EmptyDataset);
        }

        let mut loader = DataLoader::from_arc(dataset).batch_size(batch_size);
        if let Some(shuffle) = self.shuffle {
            loader = loader.shuffle(shuffle);
        }
        if let Some(drop_last) = self.drop_last {
            loader = loader.drop_last(drop_last);
        }
        if let Some(seed) = self.seed {
            loader = loader.seed(seed);
        }
        if let Some(workers) = self.num_workers {
            loader = loader.num_workers(workers);
        }
        Ok(loader)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::{dataset::ArrowImageDataset, tensor::Image};

    fn create_test_dataset(rows: usize) -> ArrowImageDataset {
        let images: Vec<Image> = (0..rows)
            .map(|i| Image::from_vec(vec![i as f32], [1, 1, 1]).unwrap())
            .collect();
        let labels: Vec<usize> = (0..rows).map(|i| i % 4).collect();
        ArrowImageDataset::from_images(&images, &labels).unwrap()
    }

    fn ids(batches: &[Batch]) -> Vec<usize> {
        batches
            .iter()
            .flat_map(|b| b.images.as_slice().iter().map(|&v| v as usize))
            .collect()
    }

    #[test]
    fn test_basic_iteration() {
        let loader = DataLoader::new(create_test_dataset(10)).batch_size(3);
        let batches: Vec<Batch> = loader.iter().collect::<Result<_>>().unwrap();
        assert_eq!(batches.len(), 4); // 3 + 3 + 3 + 1
        assert_eq!(batches[3].len(), 1);
        assert_eq!(ids(&batches), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_drop_last() {
        let loader = DataLoader::new(create_test_dataset(10))
            .batch_size(3)
            .drop_last(true);
        let batches: Vec<Batch> = loader.iter().collect::<Result<_>>().unwrap();
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() == 3));
    }

    #[test]
    fn test_shuffle_deterministic_per_pass() {
        let loader = DataLoader::new(create_test_dataset(100))
            .batch_size(10)
            .shuffle(true)
            .seed(42);
        assert_eq!(loader.epoch_indices(0), loader.epoch_indices(0));
        assert_ne!(loader.epoch_indices(0), loader.epoch_indices(1));
    }

    #[test]
    fn test_all_rows_covered() {
        let loader = DataLoader::new(create_test_dataset(25))
            .batch_size(7)
            .shuffle(true)
            .seed(99)
            .num_workers(2);
        let batches: Vec<Batch> = loader.iter().collect::<Result<_>>().unwrap();
        let seen: HashSet<usize> = ids(&batches).into_iter().collect();
        assert_eq!(seen.len(), 25);
    }

    #[test]
    fn test_workers_match_single_thread_order() {
        let base = DataLoader::new(create_test_dataset(40))
            .batch_size(6)
            .shuffle(true)
            .seed(5);
        let single: Vec<Batch> = base.clone().iter().collect::<Result<_>>().unwrap();
        let multi: Vec<Batch> = base
            .num_workers(3)
            .iter()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(single, multi);
    }

    #[test]
    fn test_num_batches() {
        let dataset = create_test_dataset(10);
        let loader = DataLoader::new(dataset.clone()).batch_size(3);
        assert_eq!(loader.num_batches(), 4);
        let loader = DataLoader::new(dataset).batch_size(3).drop_last(true);
        assert_eq!(loader.num_batches(), 3);
    }

    #[test]
    fn test_cycle_restarts_transparently() {
        let loader = DataLoader::new(create_test_dataset(5)).batch_size(2);
        let mut cyclic = loader.cycle();
        let sizes: Vec<usize> = (0..7).map(|_| cyclic.next_batch().unwrap().len()).collect();
        // passes of [2, 2, 1]
        assert_eq!(sizes, vec![2, 2, 1, 2, 2, 1, 2]);
        assert_eq!(cyclic.passes_started(), 3);
    }

    #[test]
    fn test_builder() {
        let loader = DataLoaderBuilder::new()
            .batch_size(5)
            .shuffle(true)
            .seed(42)
            .num_workers(1)
            .build(create_test_dataset(10))
            .unwrap();
        assert_eq!(loader.get_batch_size(), 5);
        assert!(loader.is_shuffle());
        assert_eq!(loader.get_num_workers(), 1);
    }

    #[test]
    fn test_builder_zero_batch_size_error() {
        let result = DataLoaderBuilder::new()
            .batch_size(0)
            .build(create_test_dataset(10));
        assert!(result.is_err());
    }

    #[test]
    fn test_batch_size_min_one() {
        let loader = DataLoader::new(create_test_dataset(10)).batch_size(0);
        assert_eq!(loader.get_batch_size(), 1);
    }
}
