//! Error types for tagrace.
//!
//! All errors are strongly typed using thiserror. Component errors are kept
//! small and specific; `RaceError` aggregates them for the session and the
//! process entry point, which decides the exit code from the variant.

use thiserror::Error;

pub use crate::storage::StorageError;

/// Invalid or missing startup input.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ConfigurationError {
    #[error("at least one keyword must be tracked")]
    EmptyKeywords,

    #[error("keyword at position {index} is empty")]
    EmptyKeyword {
        index: usize,
    },

    #[error("invalid store path '{path}': {reason}")]
    InvalidStorePath {
        path: String,
        reason: String,
    },

    #[error("max_log_size must be at least {min} bytes (got {actual})")]
    InvalidLogSize {
        min: u64,
        actual: u64,
    },

    #[error("cannot read event input '{path}': {reason}")]
    InvalidInput {
        path: String,
        reason: String,
    },

    #[error("cannot open log file '{path}': {reason}")]
    LogFile {
        path: String,
        reason: String,
    },
}

/// Upstream credential or handshake failure.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum AuthenticationError {
    #[error("upstream rejected credentials (status {status})")]
    Rejected {
        status: u16,
    },

    #[error("missing credential: {what}")]
    MissingCredentials {
        what: String,
    },
}

/// A streamed payload that could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed event payload: {0}")]
    Malformed(String),
}

/// Errors raised by the in-memory tally.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TallyError {
    #[error("keyword is not tracked: {0}")]
    UnknownKeyword(String),
}

/// Errors raised by an upstream event source.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum SourceError {
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthenticationError),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("stream terminated by upstream (status {status})")]
    Transport {
        status: u16,
    },

    #[error("stream read failed: {0}")]
    Io(String),

    #[error("interrupted by operator")]
    Interrupted,
}

/// Top-level error type for tagrace.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum RaceError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthenticationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Source error: {0}")]
    Source(SourceError),

    #[error("Tally error: {0}")]
    Tally(#[from] TallyError),

    #[error("Interrupted by operator")]
    Interrupted,

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl From<SourceError> for RaceError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Authentication(auth) => Self::Authentication(auth),
            SourceError::Interrupted => Self::Interrupted,
            other => Self::Source(other),
        }
    }
}

impl RaceError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if the operator stopped the process.
    #[must_use]
    pub const fn is_interruption(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Returns true if this error aborts the process before streaming begins.
    #[must_use]
    pub const fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Authentication(_) | Self::Storage(_)
        )
    }

    /// Process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Interrupted => 0,
            Self::Configuration(_) | Self::Authentication(_) | Self::Storage(_) => 2,
            Self::Source(_) | Self::Tally(_) | Self::Internal { .. } => 1,
        }
    }
}

/// Result type alias for tagrace operations.
pub type RaceResult<T> = Result<T, RaceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let err = ConfigurationError::InvalidLogSize { min: 4096, actual: 10 };
        let msg = format!("{err}");
        assert!(msg.contains("4096"));
        assert!(msg.contains("10"));
    }

    #[test]
    fn test_source_interrupt_maps_to_interruption() {
        let err: RaceError = SourceError::Interrupted.into();
        assert!(err.is_interruption());
        assert_eq!(err.exit_code(), 0);
    }

    #[test]
    fn test_source_auth_maps_to_authentication() {
        let err: RaceError = SourceError::Authentication(AuthenticationError::Rejected { status: 401 }).into();
        assert!(matches!(err, RaceError::Authentication(_)));
        assert!(err.is_fatal_at_startup());
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_transport_error_is_not_startup_fatal() {
        let err: RaceError = SourceError::Transport { status: 420 }.into();
        assert!(!err.is_fatal_at_startup());
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("420"));
    }

    #[test]
    fn test_configuration_exit_code() {
        let err: RaceError = ConfigurationError::EmptyKeywords.into();
        assert!(err.is_configuration());
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_storage_error_converts() {
        let err: RaceError = StorageError::Closed.into();
        assert!(err.is_storage());
    }

    #[test]
    fn test_internal() {
        let err = RaceError::internal("unexpected state");
        assert!(err.to_string().contains("unexpected state"));
        assert!(!err.is_fatal_at_startup());
    }
}
