//! Error handling for the spillmr-common crate.

use thiserror::Error;

/// Common error type that abstracts over underlying library errors.
///
/// Every variant carries a human readable message and, where one exists,
/// the underlying error as its source so the full chain survives `?`.
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO operation failed: {message}")]
    IoError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Serialization failed: {message}")]
    SerializationError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Deserialization failed: {message}")]
    DeserializationError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Invalid configuration: {message}")]
    ConfigurationError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Resource not found: {message}")]
    NotFoundError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Internal error: {message}")]
    InternalError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },
}

/// Result type alias for common operations.
pub type Result<T> = std::result::Result<T, CommonError>;

/// Error category for grouping related error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Files, directories and other infrastructure
    Infrastructure,
    /// Record encoding and decoding
    DataProcessing,
    /// Configuration and setup errors
    Configuration,
    /// Internal logic errors
    Internal,
}

impl CommonError {
    /// Create an IO error with a custom message.
    pub fn io_error<S: Into<String>>(message: S) -> Self {
        Self::IoError {
            message: message.into(),
            source: None,
        }
    }

    /// Create an IO error with a custom message and source error.
    pub fn io_error_with_source<S: Into<String>, E: Into<anyhow::Error>>(
        message: S,
        source: E,
    ) -> Self {
        Self::IoError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a serialization error with a custom message.
    pub fn serialization_error<S: Into<String>>(message: S) -> Self {
        Self::SerializationError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a serialization error with a custom message and source error.
    pub fn serialization_error_with_source<S: Into<String>, E: Into<anyhow::Error>>(
        message: S,
        source: E,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a deserialization error with a custom message.
    pub fn deserialization_error<S: Into<String>>(message: S) -> Self {
        Self::DeserializationError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a deserialization error with a custom message and source error.
    pub fn deserialization_error_with_source<S: Into<String>, E: Into<anyhow::Error>>(
        message: S,
        source: E,
    ) -> Self {
        Self::DeserializationError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a configuration error with a custom message.
    pub fn configuration_error<S: Into<String>>(message: S) -> Self {
        Self::ConfigurationError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with a custom message and source error.
    pub fn configuration_error_with_source<S: Into<String>, E: Into<anyhow::Error>>(
        message: S,
        source: E,
    ) -> Self {
        Self::ConfigurationError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create an internal error with a custom message.
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
            source: None,
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::IoError { .. } | Self::NotFoundError { .. } => ErrorCategory::Infrastructure,
            Self::SerializationError { .. } | Self::DeserializationError { .. } => {
                ErrorCategory::DataProcessing
            }
            Self::ConfigurationError { .. } => ErrorCategory::Configuration,
            Self::InternalError { .. } => ErrorCategory::Internal,
        }
    }

    /// The message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::IoError { message, .. }
            | Self::SerializationError { message, .. }
            | Self::DeserializationError { message, .. }
            | Self::ConfigurationError { message, .. }
            | Self::NotFoundError { message, .. }
            | Self::InternalError { message, .. } => message,
        }
    }
}

impl From<std::io::Error> for CommonError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFoundError {
                message: err.to_string(),
                source: Some(err.into()),
            },
            _ => Self::io_error_with_source(err.to_string(), err),
        }
    }
}

impl From<serde_json::Error> for CommonError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            Self::io_error_with_source("JSON stream failed", err)
        } else {
            Self::deserialization_error_with_source(err.to_string(), err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_io_error_conversion_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: CommonError = io.into();
        assert_eq!(err.category(), ErrorCategory::Infrastructure);
        assert!(matches!(err, CommonError::IoError { .. }));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_not_found_maps_to_not_found_variant() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: CommonError = io.into();
        assert!(matches!(err, CommonError::NotFoundError { .. }));
    }

    #[test]
    fn test_json_error_is_data_processing() {
        let err: CommonError = serde_json::from_str::<u32>("not a number")
            .unwrap_err()
            .into();
        assert_eq!(err.category(), ErrorCategory::DataProcessing);
    }

    #[test]
    fn test_display_includes_message() {
        let err = CommonError::configuration_error("merge_fan_in must be at least 2");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: merge_fan_in must be at least 2"
        );
        assert_eq!(err.message(), "merge_fan_in must be at least 2");
    }
}
