//! Error types for secret store operations.

use thiserror::Error;

/// Result type for secret store operations.
pub type Result<T> = std::result::Result<T, SecretError>;

/// Errors that can occur when talking to secret backends.
#[derive(Error, Debug)]
pub enum SecretError {
    /// Key does not decompose into the required four segments.
    #[error("Invalid secret key: {key:?}")]
    InvalidKey { key: String },

    /// Transport or connection failure talking to a backend.
    #[error("Error talking to secret backend: {message}")]
    BackendUnavailable { message: String },

    /// No backend is configured for the key's deploy group.
    #[error("No secret backend configured for deploy group '{deploy_group}'")]
    NoBackend { deploy_group: String },
}

impl SecretError {
    /// Create an invalid key error.
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
    }

    /// Create a backend unavailable error.
    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable { message: message.into() }
    }

    /// Create a missing backend error.
    pub fn no_backend(deploy_group: impl Into<String>) -> Self {
        Self::NoBackend { deploy_group: deploy_group.into() }
    }
}
