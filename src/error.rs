//! Error types for fieldscribe.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScribeError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Remote store errors
    #[error("Remote store unreachable: {message}")]
    RemoteUnavailable { message: String },

    // Pipeline taxonomy
    #[error("Transient I/O error: {message}")]
    TransientIo { message: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Resource unavailable: {message}")]
    ResourceUnavailable { message: String },

    // Transcription errors
    #[error("Transcription model not found at {path}")]
    TranscriptionModelNotFound { path: String },

    #[error("Transcription of window {window} failed: {message}")]
    WindowFailed { window: usize, message: String },

    // Ledger errors
    #[error("Invalid stage transition for {file_id}: {from} -> {to}")]
    InvalidTransition {
        file_id: String,
        from: String,
        to: String,
    },

    #[error("Unknown file id: {file_id}")]
    NotFound { file_id: String },

    #[error("Work for {file_id} was cancelled")]
    Cancelled { file_id: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl ScribeError {
    /// Whether the failed operation may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScribeError::TransientIo { .. } | ScribeError::WindowFailed { .. } => true,
            ScribeError::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            _ => false,
        }
    }

    /// Faults that must stop a whole invocation before per-file work starts.
    pub fn is_configuration_fault(&self) -> bool {
        matches!(
            self,
            ScribeError::ConfigFileNotFound { .. }
                | ScribeError::ConfigInvalidValue { .. }
                | ScribeError::Config(_)
                | ScribeError::RemoteUnavailable { .. }
        )
    }

    pub(crate) fn transient(message: impl Into<String>) -> Self {
        ScribeError::TransientIo {
            message: message.into(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        ScribeError::Validation {
            message: message.into(),
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, ScribeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_file_not_found_display() {
        let error = ScribeError::ConfigFileNotFound {
            path: "/path/to/config.toml".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Configuration file not found at /path/to/config.toml"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = ScribeError::ConfigInvalidValue {
            key: "sync.concurrency".to_string(),
            message: "must be positive".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for sync.concurrency: must be positive"
        );
    }

    #[test]
    fn test_window_failed_display() {
        let error = ScribeError::WindowFailed {
            window: 3,
            message: "out of memory".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Transcription of window 3 failed: out of memory"
        );
    }

    #[test]
    fn test_invalid_transition_display() {
        let error = ScribeError::InvalidTransition {
            file_id: "A".to_string(),
            from: "converted".to_string(),
            to: "downloading".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid stage transition for A: converted -> downloading"
        );
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(ScribeError::transient("connection reset").is_retryable());
        assert!(
            ScribeError::WindowFailed {
                window: 0,
                message: "x".into()
            }
            .is_retryable()
        );
        let io_error = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(ScribeError::from(io_error).is_retryable());
    }

    #[test]
    fn test_validation_is_not_retryable() {
        assert!(!ScribeError::validation("size mismatch").is_retryable());
        let missing = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(!ScribeError::from(missing).is_retryable());
    }

    #[test]
    fn test_configuration_faults() {
        assert!(
            ScribeError::RemoteUnavailable {
                message: "dns".into()
            }
            .is_configuration_fault()
        );
        assert!(!ScribeError::validation("x").is_configuration_fault());
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: ScribeError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: ScribeError = io_error.into();
        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<ScribeError>();
        assert_sync::<ScribeError>();
    }
}
