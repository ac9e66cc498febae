//! Multi-worker batch fetching with ordered delivery.
//!
//! Worker `w` of `n` fetches batch slots `w, w + n, w + 2n, ...` and pushes
//! them into its own bounded channel. The consumer reads slot `k` from
//! channel `k % n`, so batches always arrive in slot order while up to
//! `n * prefetch` batches are decoded ahead of the training loop.
//!
//! With `num_workers == 0` batches are fetched on the calling thread.

use std::{
    sync::{mpsc, Arc},
    thread,
};

use crate::{
    dataset::Dataset,
    error::{Error, Result},
    tensor::ImageBatch,
};

/// A batch of images with their integer targets.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Images stacked as `[n, c, h, w]`.
    pub images: ImageBatch,
    /// Class id of each image, in batch order.
    pub targets: Vec<usize>,
}

impl Batch {
    /// Number of examples in the batch.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Returns true if the batch holds no examples.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Decodes the examples at `indices` into one batch.
///
/// # Errors
///
/// Returns the first decoding error, or an error if the images have
/// different shapes.
pub fn collect_batch<D: Dataset + ?Sized>(dataset: &D, indices: &[usize]) -> Result<Batch> {
    let mut images = Vec::with_capacity(indices.len());
    let mut targets = Vec::with_capacity(indices.len());
    for &index in indices {
        let sample = dataset.get(index)?;
        images.push(sample.image);
        targets.push(sample.label);
    }
    Ok(Batch {
        images: ImageBatch::from_images(&images)?,
        targets,
    })
}

/// Iterator over the batches of one loader pass.
#[allow(missing_docs)]
pub enum BatchIter<D: Dataset> {
    /// Fetch on the calling thread (num_workers = 0)
    SingleThreaded {
        dataset: Arc<D>,
        chunks: Vec<Vec<usize>>,
        position: usize,
    },
    /// Fetch on worker threads, one channel per worker
    MultiThreaded {
        receivers: Vec<mpsc::Receiver<Result<Batch>>>,
        handles: Vec<thread::JoinHandle<()>>,
        position: usize,
        total: usize,
        failed: bool,
    },
}

impl<D: Dataset + 'static> BatchIter<D> {
    /// Starts a pass over `chunks`, each chunk becoming one batch.
    pub fn spawn(
        dataset: Arc<D>,
        chunks: Vec<Vec<usize>>,
        num_workers: usize,
        prefetch: usize,
    ) -> Self {
        let workers = num_workers.min(chunks.len());
        if workers == 0 {
            return Self::SingleThreaded {
                dataset,
                chunks,
                position: 0,
            };
        }

        let total = chunks.len();
        let chunks: Arc<[Vec<usize>]> = chunks.into();
        let mut receivers = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for worker in 0..workers {
            let (tx, rx) = mpsc::sync_channel(prefetch.max(1));
            let dataset = Arc::clone(&dataset);
            let chunks = Arc::clone(&chunks);
            handles.push(thread::spawn(move || {
                for chunk in chunks.iter().skip(worker).step_by(workers) {
                    let batch = collect_batch(&*dataset, chunk);
                    let stop = batch.is_err();
                    if tx.send(batch).is_err() || stop {
                        break;
                    }
                }
            }));
            receivers.push(rx);
        }

        Self::MultiThreaded {
            receivers,
            handles,
            position: 0,
            total,
            failed: false,
        }
    }
}

impl<D: Dataset> std::fmt::Debug for BatchIter<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SingleThreaded {
                position, chunks, ..
            } => f
                .debug_struct("BatchIter::SingleThreaded")
                .field("position", position)
                .field("batches", &chunks.len())
                .finish(),
            Self::MultiThreaded {
                position,
                total,
                handles,
                ..
            } => f
                .debug_struct("BatchIter::MultiThreaded")
                .field("position", position)
                .field("batches", total)
                .field("workers", &handles.len())
                .finish(),
        }
    }
}

impl<D: Dataset> Iterator for BatchIter<D> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::SingleThreaded {
                dataset,
                chunks,
                position,
            } => {
                let chunk = chunks.get(*position)?;
                *position += 1;
                let batch = collect_batch(&**dataset, chunk);
                if batch.is_err() {
                    *position = chunks.len();
                }
                Some(batch)
            }
            Self::MultiThreaded {
                receivers,
                position,
                total,
                failed,
                ..
            } => {
                if *failed || *position >= *total {
                    return None;
                }
                let slot = *position;
                *position += 1;
                let received = receivers[slot % receivers.len()].recv().unwrap_or_else(|_| {
                    Err(Error::worker(format!("worker exited before batch {slot}")))
                });
                if received.is_err() {
                    *failed = true;
                }
                Some(received)
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = match self {
            Self::SingleThreaded {
                chunks, position, ..
            } => chunks.len().saturating_sub(*position),
            Self::MultiThreaded {
                position, total, ..
            } => total.saturating_sub(*position),
        };
        (0, Some(remaining))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::cast_precision_loss)]
mod tests {
    use super::*;
    use crate::{
        dataset::{ArrowImageDataset, Sample},
        tensor::Image,
    };

    fn create_test_dataset(rows: usize) -> Arc<ArrowImageDataset> {
        let images: Vec<Image> = (0..rows)
            .map(|i| Image::from_vec(vec![i as f32], [1, 1, 1]).unwrap())
            .collect();
        let labels: Vec<usize> = (0..rows).map(|i| i % 2).collect();
        Arc::new(ArrowImageDataset::from_images(&images, &labels).unwrap())
    }

    fn chunks(n: usize, size: usize) -> Vec<Vec<usize>> {
        (0..n)
            .collect::<Vec<_>>()
            .chunks(size)
            .map(<[usize]>::to_vec)
            .collect()
    }

    fn first_pixels(batches: &[Batch]) -> Vec<f32> {
        batches
            .iter()
            .flat_map(|b| b.images.as_slice().to_vec())
            .collect()
    }

    #[test]
    fn test_collect_batch() {
        let dataset = create_test_dataset(5);
        let batch = collect_batch(&*dataset, &[4, 1]).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.targets, vec![0, 1]);
        assert_eq!(batch.images.as_slice(), &[4.0, 1.0]);
    }

    #[test]
    fn test_single_threaded_order() {
        let dataset = create_test_dataset(10);
        let batches: Vec<Batch> = BatchIter::spawn(dataset, chunks(10, 3), 0, 2)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(batches.len(), 4);
        assert_eq!(batches[3].len(), 1);
        assert_eq!(
            first_pixels(&batches),
            (0..10).map(|v| v as f32).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_multi_threaded_preserves_order() {
        let dataset = create_test_dataset(50);
        let batches: Vec<Batch> = BatchIter::spawn(dataset, chunks(50, 4), 3, 1)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(batches.len(), 13);
        assert_eq!(
            first_pixels(&batches),
            (0..50).map(|v| v as f32).collect::<Vec<_>>()
        );
    }

    struct FailingDataset;

    impl Dataset for FailingDataset {
        fn len(&self) -> usize {
            4
        }

        fn get(&self, index: usize) -> Result<Sample> {
            if index == 2 {
                Err(Error::data("corrupt image"))
            } else {
                Ok(Sample {
                    image: Image::zeros([1, 1, 1]),
                    label: 0,
                })
            }
        }

        fn label(&self, _index: usize) -> Option<usize> {
            Some(0)
        }
    }

    #[test]
    fn test_error_stops_iteration() {
        for workers in [0, 2] {
            let mut iter = BatchIter::spawn(Arc::new(FailingDataset), chunks(4, 1), workers, 1);
            assert!(iter.next().unwrap().is_ok());
            assert!(iter.next().unwrap().is_ok());
            assert!(iter.next().unwrap().is_err());
            assert!(iter.next().is_none());
        }
    }
}
