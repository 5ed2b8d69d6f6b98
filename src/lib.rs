mod binary;
pub mod config;
pub mod decrypt;
pub mod engine;
pub mod env;
mod error;
pub mod kms;
pub mod message;
pub mod pool;
pub mod prelude;
pub mod suite;

pub use config::{Base64Alphabet, Config, ConfigError};
pub use decrypt::{decrypt_value, DecryptOptions, Decryptor};
pub use engine::{DecryptError, Engine};
pub use env::{EnvError, EnvJob};
pub use error::Error;
pub use kms::{KeyUnwrap, KmsSettings, UnwrapError};
pub use message::{DecodeError, EncryptionContext, Message};
pub use pool::{DecryptedVar, PipelineError, WorkerPool};
pub use suite::AlgorithmSuite;

#[cfg(feature = "kms")]
pub use kms::KmsClient;
