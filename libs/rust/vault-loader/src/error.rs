//! Loader error types using thiserror 2.0.
//!
//! `VaultError` covers everything a refresh cycle can fail with at runtime.
//! `ConfigError` covers construction problems, which `Loader::new` treats as
//! fatal.

use thiserror::Error;

/// Runtime errors of a refresh cycle or of the live Vault clients.
#[derive(Error, Debug)]
pub enum VaultError {
    /// Vault server unavailable
    #[error("Vault unavailable: {0}")]
    Unavailable(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Secret not found
    #[error("Secret not found at path: {0}")]
    SecretNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Rate limited
    #[error("Rate limited")]
    RateLimited,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The poll watcher gave up after exhausting its retries
    #[error("Refresh failed after {attempts} attempts: {source}")]
    RetryExhausted {
        /// Attempts made, including the first one
        attempts: u32,
        /// Error of the last attempt
        source: Box<VaultError>,
    },

    /// The poll watcher task ended abnormally
    #[error("Poll watcher aborted: {0}")]
    WatcherAborted(String),
}

/// Result type for loader operations.
pub type VaultResult<T> = Result<T, VaultError>;

impl VaultError {
    /// Check if error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::RateLimited | Self::Http(_)
        )
    }

    /// Create an unavailable error.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create an authentication failed error.
    #[must_use]
    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::AuthenticationFailed(msg.into())
    }

    /// Create a secret not found error.
    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::SecretNotFound(path.into())
    }
}

/// Construction-time configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No secret descriptor configured
    #[error("at least one secret must be configured")]
    NoSecrets,

    /// No auth provider configured
    #[error("an auth provider is required")]
    NoAuthProvider,

    /// No secret store client configured
    #[error("a secret store client is required")]
    NoClient,

    /// Renewal requested without a sink to write into
    #[error("background renewal requires a configuration sink")]
    NoSink,

    /// Renewal requested outside a Tokio runtime
    #[error("background renewal must be configured inside a Tokio runtime")]
    NoRuntime,

    /// Invalid URL
    #[error("Invalid URL for {field}: {reason}")]
    InvalidUrl {
        /// Offending field or variable
        field: String,
        /// Parse failure
        reason: String,
    },
}
