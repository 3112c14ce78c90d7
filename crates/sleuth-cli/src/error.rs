//! Error types for the CLI

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// The workflow ran and at least one stage failed
    #[error("Workflow failed: {message}")]
    WorkflowFailed {
        /// Error message
        message: String,
    },

    /// Two artifacts or tallies disagree
    #[error("Mismatch: {message}")]
    Mismatch {
        /// Error message
        message: String,
    },

    /// A command needs a feature this binary was built without
    #[error("{command} needs the '{feature}' feature; rebuild with --features {feature}")]
    FeatureDisabled {
        /// Command name
        command: String,
        /// Cargo feature
        feature: String,
    },

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Sleuth library error
    #[error("Sleuth error: {0}")]
    Sleuth(#[from] sleuth::SleuthError),

    /// Invalid argument
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message
        message: String,
    },
}

impl CliError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a workflow failure
    #[must_use]
    pub fn workflow_failed(message: impl Into<String>) -> Self {
        Self::WorkflowFailed {
            message: message.into(),
        }
    }

    /// Create a mismatch error
    #[must_use]
    pub fn mismatch(message: impl Into<String>) -> Self {
        Self::Mismatch {
            message: message.into(),
        }
    }

    /// Create a missing-feature error
    #[must_use]
    pub fn feature_disabled(command: impl Into<String>, feature: impl Into<String>) -> Self {
        Self::FeatureDisabled {
            command: command.into(),
            feature: feature.into(),
        }
    }

    /// Create an invalid argument error
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error() {
        let err = CliError::config("bad config");
        assert!(err.to_string().contains("Configuration"));
        assert!(err.to_string().contains("bad config"));
    }

    #[test]
    fn test_workflow_failed_error() {
        let err = CliError::workflow_failed("2 stage(s) failed");
        assert_eq!(err.to_string(), "Workflow failed: 2 stage(s) failed");
    }

    #[test]
    fn test_mismatch_error() {
        let err = CliError::mismatch("High: observed 2 vs reference 3");
        assert!(err.to_string().starts_with("Mismatch"));
    }

    #[test]
    fn test_feature_disabled_names_the_feature() {
        let err = CliError::feature_disabled("run", "browser");
        assert_eq!(
            err.to_string(),
            "run needs the 'browser' feature; rebuild with --features browser"
        );
    }

    #[test]
    fn test_invalid_argument_error() {
        let err = CliError::invalid_argument("bad arg");
        assert!(err.to_string().contains("Invalid argument"));
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CliError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_sleuth_error_from() {
        let err: CliError = sleuth::SleuthError::config("mail.sender is required").into();
        assert!(err.to_string().contains("mail.sender is required"));
    }
}
