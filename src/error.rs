/*!
 * Error types for Conductor
 */

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use conductor_core_breaker::ConfigError;

pub type Result<T> = std::result::Result<T, ConductorError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Error, Debug)]
pub enum ConductorError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Breaker or retry settings are invalid
    #[error("Invalid breaker configuration for {scope}: {source}")]
    InvalidBreaker {
        scope: String,
        #[source]
        source: ConfigError,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Audit log error
    #[error("Audit log error: {0}")]
    AuditLog(String),

    /// Audit log file could not be opened
    #[error("Failed to open audit log: {path}")]
    AuditLogOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Metrics export error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Simulation script is malformed
    #[error("Invalid simulation pattern at position {position}: {reason}")]
    InvalidPattern { position: usize, reason: String },
}

impl ConductorError {
    /// Wrap a breaker configuration error with the profile it came from
    pub fn invalid_breaker<S: Into<String>>(scope: S, source: ConfigError) -> Self {
        ConductorError::InvalidBreaker {
            scope: scope.into(),
            source,
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ConductorError::ConfigParse(_)
            | ConductorError::ConfigSerialize(_)
            | ConductorError::InvalidBreaker { .. }
            | ConductorError::Config(_)
            | ConductorError::InvalidPattern { .. } => EXIT_FATAL,
            _ => EXIT_PARTIAL,
        }
    }

    /// Whether the error stems from user-supplied configuration
    pub fn is_config_error(&self) -> bool {
        self.exit_code() == EXIT_FATAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_breaker_message() {
        let err = ConductorError::invalid_breaker(
            "breakers.postgres",
            ConfigError::must_be_positive("failure_threshold"),
        );
        let msg = err.to_string();
        assert!(msg.contains("breakers.postgres"));
        assert!(msg.contains("failure_threshold"));
        assert_eq!(err.exit_code(), EXIT_FATAL);
        assert!(err.is_config_error());
    }

    #[test]
    fn test_io_is_partial() {
        let err: ConductorError = io::Error::new(io::ErrorKind::Other, "disk").into();
        assert_eq!(err.exit_code(), EXIT_PARTIAL);
        assert!(!err.is_config_error());
    }

    #[test]
    fn test_invalid_pattern() {
        let err = ConductorError::InvalidPattern {
            position: 3,
            reason: "unexpected 'x'".to_string(),
        };
        assert!(err.to_string().contains("position 3"));
    }
}
