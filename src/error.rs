//! Error types for equitune.

use std::path::PathBuf;

/// Result type alias for equitune operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading data or finetuning.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// I/O error during file operations.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        /// The path where the error occurred, if known.
        path: Option<PathBuf>,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Arrow error during data processing.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image decoding error.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Index out of bounds when accessing dataset.
    #[error("Index {index} out of bounds for dataset with {len} rows")]
    IndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// The actual length of the dataset.
        len: usize,
    },

    /// Column not found in schema.
    #[error("Column '{name}' not found in schema")]
    ColumnNotFound {
        /// The name of the missing column.
        name: String,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// Resampling policy other than `oversample` / `undersample`.
    #[error("Unsupported resampling method '{name}'. Choose 'oversample' or 'undersample'.")]
    UnsupportedPolicy {
        /// The rejected policy name.
        name: String,
    },

    /// Dataset name with no registered constructor.
    #[error("Dataset not recognized: '{name}'")]
    UnknownDataset {
        /// The rejected dataset name.
        name: String,
    },

    /// Group name with no known transformation set.
    #[error("Unknown group '{name}'")]
    UnknownGroup {
        /// The rejected group name.
        name: String,
    },

    /// Training-time augmentation (`data_transformations`) that is not recognized.
    #[error("Unknown data_transformations '{name}'. Choose 'none', 'rot90' or 'flip'.")]
    UnknownAugmentation {
        /// The rejected augmentation name.
        name: String,
    },

    /// Output reduction method that is not recognized.
    #[error("Unknown method '{name}'. Choose 'equitune', 'equizero' or 'none'.")]
    UnknownMethod {
        /// The rejected method name.
        name: String,
    },

    /// Device selector that this build cannot run on.
    #[error("Unsupported device '{name}'")]
    UnsupportedDevice {
        /// The rejected device selector.
        name: String,
    },

    /// Tensor layout does not match the group it is reduced or expanded over.
    #[error("Group shape mismatch: {message}")]
    GroupShapeMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// Tensor shapes incompatible for an operation.
    #[error("Shape mismatch: {message}")]
    ShapeMismatch {
        /// Description of the shape mismatch.
        message: String,
    },

    /// Empty dataset error.
    #[error("Dataset is empty")]
    EmptyDataset,

    /// Parse error.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parse error.
        message: String,
    },

    /// Data error.
    #[error("Data error: {message}")]
    Data {
        /// Description of the data error.
        message: String,
    },

    /// Experiment tracker failed to record a value.
    #[error("Tracker error: {message}")]
    Tracker {
        /// Description of the tracker error.
        message: String,
    },

    /// A fetch worker thread stopped before delivering its batches.
    #[error("Loader worker failed: {message}")]
    Worker {
        /// Description of the worker failure.
        message: String,
    },
}

impl Error {
    /// Create an I/O error with a path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            path: Some(path.into()),
            source,
        }
    }

    /// Create an I/O error without path context.
    pub fn io_no_path(source: std::io::Error) -> Self {
        Self::Io { path: None, source }
    }

    /// Create a column not found error.
    pub fn column_not_found(name: impl Into<String>) -> Self {
        Self::ColumnNotFound { name: name.into() }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a group shape mismatch error.
    pub fn group_shape(message: impl Into<String>) -> Self {
        Self::GroupShapeMismatch {
            message: message.into(),
        }
    }

    /// Create a shape mismatch error.
    pub fn shape(message: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            message: message.into(),
        }
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
        }
    }

    /// Create a tracker error.
    pub fn tracker(message: impl Into<String>) -> Self {
        Self::Tracker {
            message: message.into(),
        }
    }

    /// Create a worker error.
    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io(io_err, "/path/to/file");
        assert!(err.to_string().contains("/path/to/file"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_io_error_without_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io_no_path(io_err);
        assert!(err.to_string().contains("None"));
    }

    #[test]
    fn test_index_out_of_bounds() {
        let err = Error::IndexOutOfBounds { index: 10, len: 5 };
        assert!(err.to_string().contains("10"));
        assert!(err.to_string().contains('5'));
    }

    #[test]
    fn test_unsupported_policy_names_choices() {
        let err = Error::UnsupportedPolicy {
            name: "smote".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("smote"));
        assert!(msg.contains("oversample"));
        assert!(msg.contains("undersample"));
    }

    #[test]
    fn test_unknown_dataset() {
        let err = Error::UnknownDataset {
            name: "SVHN".to_string(),
        };
        assert!(err.to_string().contains("SVHN"));
    }

    #[test]
    fn test_group_shape() {
        let err = Error::group_shape("7 rows not divisible by 4");
        assert!(err.to_string().contains("7 rows not divisible by 4"));
    }

    #[test]
    fn test_invalid_config() {
        let err = Error::invalid_config("batch_size must be positive");
        assert!(err.to_string().contains("batch_size must be positive"));
    }

    #[test]
    fn test_empty_dataset() {
        let err = Error::EmptyDataset;
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_tracker_error() {
        let err = Error::tracker("disk full");
        assert!(err.to_string().contains("disk full"));
    }
}
