//! Unified error type for the public API
//!
//! Each module keeps its own error enum for precise handling. This type
//! gathers them for callers that only need one `Result` type.
//!
//! # Example
//!
//! ```no_run
//! use decrypt_and_start::{Config, Error};
//!
//! fn prepare(config: &Config) -> Result<(), Error> {
//!     config.validate()?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Unified error type for all decryption operations
///
/// # Error Categories
///
/// - **Decode**: malformed or unsupported envelope message
/// - **Unwrap**: key service failures
/// - **Decrypt**: authentication and key derivation failures
/// - **Pipeline**: per-variable failures from the worker pool
/// - **Config**: invalid configuration
/// - **Env**: a decrypted value the environment cannot hold
#[derive(Debug, Error)]
pub enum Error {
    #[error("Decode error: {0}")]
    Decode(#[from] crate::message::DecodeError),

    #[error("Key service error: {0}")]
    Unwrap(#[from] crate::kms::UnwrapError),

    #[error("Decryption error: {0}")]
    Decrypt(#[from] crate::engine::DecryptError),

    #[error("{0}")]
    Pipeline(#[from] crate::pool::PipelineError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Environment error: {0}")]
    Env(#[from] crate::env::EnvError),
}

impl Error {
    /// The innermost decryption error, looking through pipeline wrappers
    fn decrypt_error(&self) -> Option<&crate::engine::DecryptError> {
        match self {
            Self::Decrypt(e) => Some(e),
            Self::Pipeline(crate::pool::PipelineError::Value { source, .. }) => Some(source),
            _ => None,
        }
    }

    /// Returns true if the message could not be parsed
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::Decode(_))
            || matches!(
                self.decrypt_error(),
                Some(crate::engine::DecryptError::Decode(_))
            )
    }

    /// Returns true if a tag check failed
    pub fn is_authentication_error(&self) -> bool {
        self.decrypt_error()
            .is_some_and(|e| e.is_authentication_error())
    }

    /// Returns true if the key service (or its credentials) failed
    pub fn is_unwrap_error(&self) -> bool {
        matches!(
            self,
            Self::Unwrap(_) | Self::Pipeline(crate::pool::PipelineError::ClientInit(_))
        ) || matches!(
            self.decrypt_error(),
            Some(crate::engine::DecryptError::Unwrap(_))
        )
    }

    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Variable the failure belongs to, if any
    pub fn variable(&self) -> Option<&str> {
        match self {
            Self::Pipeline(e) => e.variable(),
            Self::Env(crate::env::EnvError::InvalidEntry { name }) => Some(name),
            _ => None,
        }
    }
}
