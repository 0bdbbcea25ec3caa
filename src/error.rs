//! Crate-wide error type.
//!
//! One variant per failure class the engines can report. All fallible
//! operations return [`Result`] and propagate with `?`.

use crate::LabelType;
use thiserror::Error;

/// Errors reported by the index engines and the facade.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Bad metric, data type, dimension, parameter, or call on an
    /// uninitialized index.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Allocation failure, or a brute-force insert past capacity.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// HNSW insert past `max_elements`, or an operation addressing a slot
    /// outside the live range.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// The label is unknown or already removed.
    #[error("label {0} not found")]
    NotFound(LabelType),

    /// Load into an already-initialized index.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A snapshot failed verification on load.
    #[error("data loss: {0}")]
    DataLoss(String),

    /// A structural invariant did not hold: corrupt snapshot geometry,
    /// neighbor-list overflow, or a level out of range.
    #[error("internal error: {0}")]
    Internal(String),

    /// Snapshot file I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let e = IndexError::InvalidArgument("dimension must not be 0".into());
        assert_eq!(e.to_string(), "invalid argument: dimension must not be 0");

        let e = IndexError::NotFound(42);
        assert_eq!(e.to_string(), "label 42 not found");
    }

    #[test]
    fn test_io_error_converts() {
        fn open_missing() -> Result<std::fs::File> {
            Ok(std::fs::File::open("/nonexistent/smallworld/file")?)
        }
        assert!(matches!(open_missing(), Err(IndexError::Io(_))));
    }
}
