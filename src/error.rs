//! Error types for the forecasting pipeline.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading data, fitting, training or persisting a model.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// An input file is missing or one of its rows cannot be parsed.
    #[error("Failed to load {path}: {reason}")]
    DataLoad {
        /// File that was being read
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// Parallel arrays or tensors disagree on their size.
    #[error("Shape mismatch in {context}: expected {expected}, actual {actual}")]
    ShapeMismatch {
        /// Where the mismatch was detected
        context: String,
        /// Expected length or dimension
        expected: usize,
        /// Actual length or dimension
        actual: usize,
    },

    /// Words beyond the vocabulary cap were dropped.
    ///
    /// Never returned from fitting; it is logged as a warning.
    #[error("Vocabulary overflow: {dropped} words beyond cap {cap} were dropped")]
    VocabularyOverflow {
        /// Number of distinct training words without an index
        dropped: usize,
        /// Configured vocabulary cap
        cap: usize,
    },

    /// Saving or loading weights or artifacts failed.
    #[error("Checkpoint error at {path}: {reason}")]
    Checkpoint {
        /// Checkpoint or artifacts file
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// A model output decoded to NaN or infinity.
    #[error("Non-finite value in {context}: {value}")]
    NonFinite {
        /// What was being decoded
        context: String,
        /// The offending value
        value: f64,
    },

    /// Invalid configuration value.
    #[error("Invalid config: {0}")]
    Config(String),

    /// LibTorch operation failed.
    #[error(transparent)]
    Torch(#[from] tch::TchError),
}

impl ForecastError {
    /// Create a DataLoad error.
    pub fn data_load(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        Self::DataLoad {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Create a ShapeMismatch error.
    pub fn shape_mismatch(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }

    /// Create a Checkpoint error.
    pub fn checkpoint(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        Self::Checkpoint {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ForecastError::shape_mismatch("train targets", 90, 89);
        assert_eq!(
            err.to_string(),
            "Shape mismatch in train targets: expected 90, actual 89"
        );

        let err = ForecastError::data_load("data/accounts.csv", "missing column `text`");
        assert!(err.to_string().contains("data/accounts.csv"));
        assert!(err.to_string().contains("missing column"));
    }

    #[test]
    fn test_overflow_and_non_finite_messages() {
        let overflow = ForecastError::VocabularyOverflow {
            dropped: 12,
            cap: 10000,
        };
        assert_eq!(
            overflow.to_string(),
            "Vocabulary overflow: 12 words beyond cap 10000 were dropped"
        );

        let err = ForecastError::NonFinite {
            context: "decoded retweet count".to_string(),
            value: f64::INFINITY,
        };
        assert_eq!(err.to_string(), "Non-finite value in decoded retweet count: inf");
    }
}
