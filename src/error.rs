//! Error types for fleetrun

use crate::models::RunStatus;
use thiserror::Error;

/// fleetrun error types
#[derive(Error, Debug)]
pub enum FleetError {
    /// Bad job or host input, detected before any connection is opened
    #[error("validation error: {0}")]
    Validation(String),

    /// Unreachable host, rejected authentication, or connect timeout
    #[error("connection to {host} failed: {message}")]
    Connection { host: String, message: String },

    /// Upload or download I/O failure
    #[error("transfer with {host} failed: {message}")]
    Transfer { host: String, message: String },

    /// Remote command exceeded its execution bound
    #[error("command on {host} timed out after {seconds} seconds")]
    Timeout { host: String, seconds: u64 },

    /// Remote command reported failure (stderr text or nonzero exit,
    /// depending on the configured policy)
    #[error("remote execution on {host} failed: {detail}")]
    RemoteExecution { host: String, detail: String },

    /// Fleet run was canceled by the caller
    #[error("fleet run canceled")]
    Canceled,

    /// Fleet file parse errors
    #[error("fleet file parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Fleet file size exceeded limit
    #[error("fleet file exceeds {limit} bytes (size: {size})")]
    FleetFileTooLarge { size: usize, limit: usize },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FleetError {
    /// Terminal status class recorded on a host result when this error
    /// ends its pipeline.
    pub fn status_class(&self) -> RunStatus {
        match self {
            FleetError::Connection { .. } => RunStatus::Unreachable,
            FleetError::Timeout { .. } => RunStatus::Timeout,
            _ => RunStatus::Failed,
        }
    }
}

/// Result type alias using FleetError
pub type Result<T> = std::result::Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_class_mapping() {
        let err = FleetError::Connection {
            host: "10.0.0.5".to_string(),
            message: "refused".to_string(),
        };
        assert_eq!(err.status_class(), RunStatus::Unreachable);

        let err = FleetError::Timeout {
            host: "10.0.0.5".to_string(),
            seconds: 180,
        };
        assert_eq!(err.status_class(), RunStatus::Timeout);

        let err = FleetError::RemoteExecution {
            host: "10.0.0.5".to_string(),
            detail: "Traceback".to_string(),
        };
        assert_eq!(err.status_class(), RunStatus::Failed);

        let err = FleetError::Validation("bad".to_string());
        assert_eq!(err.status_class(), RunStatus::Failed);
    }

    #[test]
    fn test_error_messages_preserve_cause() {
        let err = FleetError::Transfer {
            host: "10.0.0.5".to_string(),
            message: "remote file vanished".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("10.0.0.5"));
        assert!(text.contains("remote file vanished"));
    }
}
