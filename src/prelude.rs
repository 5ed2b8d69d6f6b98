//! Prelude
//!
//! Commonly used types and traits in one import.
//!
//! # Example
//!
//! ```rust
//! use decrypt_and_start::prelude::*;
//!
//! let config = Config::default();
//! let pool = WorkerPool::new(config.workers, config.alphabet);
//! assert_eq!(pool.workers(), 10);
//! ```

pub use crate::config::{Base64Alphabet, Config, ConfigError};
pub use crate::decrypt::{decrypt_value, DecryptOptions, Decryptor};
pub use crate::engine::{DecryptError, Engine};
pub use crate::env::{EnvJob, MARKER};
pub use crate::error::Error;
pub use crate::kms::{KeyUnwrap, KmsSettings, UnwrapError};
pub use crate::message::{DecodeError, EncryptionContext, Message};
pub use crate::pool::{DecryptedVar, PipelineError, WorkerPool};
pub use crate::suite::AlgorithmSuite;

#[cfg(feature = "kms")]
pub use crate::kms::KmsClient;
