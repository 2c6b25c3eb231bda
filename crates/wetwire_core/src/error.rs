//! Core error types for wetwire.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Invalid encoding
    InvalidEncoding,

    /// I/O failure on a specific path
    Io {
        /// Path that failed
        path: String,
        /// Underlying reason
        reason: String,
    },

    /// Parse error
    ParseError { message: String },

    /// Malformed configuration
    Config { reason: String },

    /// Validation error
    Validation { field: String, reason: String },

    /// Not found
    NotFound { kind: String, id: String },

    /// Already exists
    AlreadyExists { kind: String, id: String },

    /// Cancelled
    Cancelled,

    /// Internal error (for unexpected errors)
    Internal {
        /// Error message
        message: String,
    },
}

impl CoreError {
    /// Build an I/O error for `path`
    #[must_use]
    pub fn io(path: impl AsRef<std::path::Path>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            reason: err.to_string(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEncoding => write!(f, "Invalid encoding"),
            Self::Io { path, reason } => write!(f, "I/O error on {}: {}", path, reason),
            Self::ParseError { message } => write!(f, "Parse error: {}", message),
            Self::Config { reason } => write!(f, "Invalid configuration: {}", reason),
            Self::Validation { field, reason } => {
                write!(f, "Validation failed for {}: {}", field, reason)
            }
            Self::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
            Self::AlreadyExists { kind, id } => write!(f, "{} already exists: {}", kind, id),
            Self::Cancelled => write!(f, "Operation cancelled"),
            Self::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<serde_json::Error> for CoreError {
    fn from(_err: serde_json::Error) -> Self {
        Self::InvalidEncoding
    }
}

impl From<toml::de::Error> for CoreError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::InvalidEncoding;
        assert_eq!(format!("{}", err), "Invalid encoding");

        let err = CoreError::NotFound {
            kind: "Job".to_string(),
            id: "deploy".to_string(),
        };
        assert_eq!(format!("{}", err), "Job not found: deploy");
    }

    #[test]
    fn test_io_error_names_path() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = CoreError::io("ci/workflows.py", &io);
        let s = err.to_string();
        assert!(s.contains("ci/workflows.py"));
        assert!(s.contains("denied"));
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(CoreError::Cancelled, CoreError::Cancelled);
        assert_ne!(CoreError::InvalidEncoding, CoreError::Cancelled);
    }
}
