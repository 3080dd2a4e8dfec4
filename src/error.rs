//! Error types for the relprop engine

use thiserror::Error;

/// Result type alias for relprop operations
pub type Result<T> = std::result::Result<T, RelpropError>;

/// Main error type for the relprop engine
#[derive(Error, Debug)]
pub enum RelpropError {
    #[error("{0}")]
    UserInput(String),

    #[error("Column '{column}' with role '{role}' not found in table '{table}'")]
    ColumnNotFound {
        table: String,
        column: String,
        role: String,
    },

    #[error("Data frame '{0}' is frozen and cannot be mutated")]
    FrameFrozen(String),

    #[error("Capacity error: {0}")]
    Capacity(String),

    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("The feature learner '{0}' is not supported in the community edition")]
    NotSupportedInCommunity(String),

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("Pipeline '{0}' has not been fitted")]
    NotFitted(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("External error: {0}")]
    External(String),
}

impl From<serde_json::Error> for RelpropError {
    fn from(err: serde_json::Error) -> Self {
        RelpropError::Serialization(err.to_string())
    }
}

impl RelpropError {
    /// Errors of this class are reported to the client verbatim; everything
    /// else is logged and surfaced as a generic failure.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, RelpropError::External(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelpropError::ColumnNotFound {
            table: "population".to_string(),
            column: "price".to_string(),
            role: "numerical".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Column 'price' with role 'numerical' not found in table 'population'"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RelpropError = io_err.into();
        assert!(matches!(err, RelpropError::Io(_)));
    }

    #[test]
    fn test_not_supported() {
        let err = RelpropError::NotSupportedInCommunity("Relboost".to_string());
        assert!(err.to_string().contains("Relboost"));
        assert!(err.is_user_facing());
    }
}
