//! Result and error types for Sleuth.

use thiserror::Error;

/// Result type for Sleuth operations
pub type SleuthResult<T> = Result<T, SleuthError>;

/// Errors that can occur in Sleuth
#[derive(Debug, Error)]
pub enum SleuthError {
    /// Mailbox or browser transport failed (network, TLS, dropped connection)
    #[error("Connectivity failure: {message}")]
    Connectivity {
        /// Error message
        message: String,
    },

    /// Credentials were rejected
    #[error("Authentication rejected: {message}")]
    Auth {
        /// Error message
        message: String,
    },

    /// A single observation failed; the poller treats it as "not yet"
    #[error("Transient observation error: {message}")]
    TransientObservation {
        /// Error message
        message: String,
    },

    /// Every attempt of a poll failed
    #[error("All {attempts} observation attempts of '{label}' failed, last error: {last_error}")]
    ObservationFailed {
        /// Poll label
        label: String,
        /// Attempts made
        attempts: u32,
        /// Last error seen
        last_error: String,
    },

    /// Attempt budget parameters are out of range
    #[error("Invalid attempt budget: {message}")]
    InvalidBudget {
        /// Error message
        message: String,
    },

    /// Element lookup failed
    #[error("Element not found: {locator}")]
    ElementNotFound {
        /// Locator description
        locator: String,
    },

    /// UI driver command failed
    #[error("Driver error: {message}")]
    Driver {
        /// Error message
        message: String,
    },

    /// Configuration is missing or invalid
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// A named workflow stage did not complete
    #[error("Stage '{stage}' failed: {message}")]
    StageFailure {
        /// Stage name
        stage: String,
        /// Error message
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl SleuthError {
    /// Create a connectivity error
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a transient observation error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientObservation {
            message: message.into(),
        }
    }

    /// Create a driver error
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a stage failure
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StageFailure {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Create an element-not-found error
    pub fn not_found(locator: impl std::fmt::Display) -> Self {
        Self::ElementNotFound {
            locator: locator.to_string(),
        }
    }

    /// Whether a retry at the call site may succeed.
    ///
    /// `Auth` is not transient: the OTP engine counts consecutive
    /// rejections itself and gives up on the second one.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connectivity { .. }
                | Self::TransientObservation { .. }
                | Self::ElementNotFound { .. }
                | Self::Driver { .. }
                | Self::Io(_)
        )
    }

    /// Whether this is a credential rejection
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}
