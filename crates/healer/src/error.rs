//! Error types for the Healer
//!
//! Policy rejections, unknown spells and failing spells are not errors: they
//! are reported as decisions, spell results and outcomes. These variants cover
//! the environment being unusable (storage, config, git plumbing).

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for Healer operations
pub type HealerResult<T> = Result<T, HealerError>;

/// Errors that escape the Healer to its caller
#[derive(Error, Debug)]
pub enum HealerError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file present but unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persisted Healer state could not be read or written
    #[error("Storage error at {path}: {message}")]
    Storage { path: PathBuf, message: String },

    /// Git plumbing failed outside of a spell
    #[error("Git error: {0}")]
    Git(String),

    /// Event payload could not be interpreted
    #[error("Invalid event: {0}")]
    InvalidEvent(String),
}

impl HealerError {
    /// Create a storage error
    pub fn storage(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        HealerError::Storage {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        HealerError::Config(msg.into())
    }

    /// Create a git error
    pub fn git(msg: impl Into<String>) -> Self {
        HealerError::Git(msg.into())
    }

    /// Create an invalid event error
    pub fn invalid_event(msg: impl Into<String>) -> Self {
        HealerError::InvalidEvent(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_mentions_path() {
        let err = HealerError::storage("/tmp/attempts.json", "corrupt");
        let msg = err.to_string();
        assert!(msg.contains("/tmp/attempts.json"));
        assert!(msg.contains("corrupt"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: HealerError = io.into();
        assert!(matches!(err, HealerError::Io(_)));
    }
}
