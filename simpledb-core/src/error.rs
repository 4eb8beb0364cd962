//! Error types for SimpleDB

use thiserror::Error;

/// Result type alias for SimpleDB operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// SimpleDB error types
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Invalid data format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Caller supplied an argument the engine does not accept
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Startup recovery could not reconstruct a consistent state
    #[error("Recovery error: {0}")]
    Recovery(String),

    /// Engine has been closed
    #[error("Engine is closed")]
    Closed,
}

impl StorageError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Io(_))
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StorageError::Corruption(_) | StorageError::InvalidFormat(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let io = StorageError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(io.is_retryable());
        assert!(!io.is_corruption());

        let corrupt = StorageError::Corruption("short record".into());
        assert!(corrupt.is_corruption());
        assert!(!corrupt.is_retryable());
        assert_eq!(corrupt.to_string(), "Data corruption: short record");
    }
}
