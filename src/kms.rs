//! Key unwrap client for AWS KMS
//!
//! The decryption core only needs two calls from the key management service:
//!
//! 1. `unwrap` - decrypt a wrapped data key taken from an envelope message,
//!    bound to the message's encryption context
//! 2. `unwrap_opaque` - decrypt a whole payload that was encrypted directly
//!    under a KMS key (no envelope)
//!
//! Both are expressed by the [`KeyUnwrap`] trait so that the engine and the
//! worker pool can be driven by test doubles. [`KmsClient`] is the production
//! implementation (feature `kms`).
//!
//! # Error classes
//!
//! KMS answers `InvalidCiphertextException` when handed bytes it did not
//! produce. That answer is the signal the entry point uses to fall back to
//! envelope decoding, so it has its own variant,
//! [`UnwrapError::InvalidCiphertext`]. Every other failure is opaque.
//!
//! # Example
//!
//! ```no_run
//! use decrypt_and_start::kms::{KmsClient, KmsSettings};
//! use decrypt_and_start::KeyUnwrap;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = KmsSettings {
//!     region: Some("eu-west-1".to_string()),
//!     role_arn: Some("arn:aws:iam::123456789012:role/secrets-reader".to_string()),
//!     ..KmsSettings::default()
//! };
//! let client = KmsClient::connect(&settings)?;
//! let plaintext = client.unwrap_opaque(b"...ciphertext blob...")?;
//! # Ok(())
//! # }
//! ```

use crate::message::EncryptionContext;
use thiserror::Error;
use zeroize::Zeroizing;

#[cfg(feature = "kms")]
use {
    aws_config::{meta::region::RegionProviderChain, BehaviorVersion},
    aws_sdk_kms::{
        error::{DisplayErrorContext, SdkError},
        operation::decrypt::DecryptError,
        primitives::Blob,
    },
    aws_types::{region::Region, SdkConfig},
    std::time::SystemTime,
    tokio::runtime::Runtime,
    tracing::{debug, info},
};

/// Region used when nothing else names one
pub const FALLBACK_REGION: &str = "us-east-1";

/// STS session name used for assumed roles
pub const DEFAULT_SESSION_NAME: &str = "decrypt-and-start-session";

/// Key unwrap errors
#[derive(Debug, Error)]
pub enum UnwrapError {
    /// The service does not recognise the ciphertext
    #[error("ciphertext not recognized by key service: {0}")]
    InvalidCiphertext(String),

    #[error("key service request failed: {0}")]
    Service(String),

    #[error("unable to obtain credentials: {0}")]
    Credentials(String),

    #[error("key service returned no plaintext")]
    EmptyResponse,

    #[error("client runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

impl UnwrapError {
    /// True for the "ciphertext not recognized" class
    pub fn is_invalid_ciphertext(&self) -> bool {
        matches!(self, Self::InvalidCiphertext(_))
    }
}

/// Contract between the decryption core and a key management service
pub trait KeyUnwrap: Send {
    /// Unwrap an envelope data key bound to `context`
    fn unwrap(
        &self,
        wrapped_key: &[u8],
        context: &EncryptionContext,
    ) -> Result<Zeroizing<Vec<u8>>, UnwrapError>;

    /// Decrypt a payload encrypted directly under a service key
    fn unwrap_opaque(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, UnwrapError>;
}

impl<T: KeyUnwrap + Sync + ?Sized> KeyUnwrap for &T {
    fn unwrap(
        &self,
        wrapped_key: &[u8],
        context: &EncryptionContext,
    ) -> Result<Zeroizing<Vec<u8>>, UnwrapError> {
        (**self).unwrap(wrapped_key, context)
    }

    fn unwrap_opaque(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, UnwrapError> {
        (**self).unwrap_opaque(ciphertext)
    }
}

impl<T: KeyUnwrap + ?Sized> KeyUnwrap for Box<T> {
    fn unwrap(
        &self,
        wrapped_key: &[u8],
        context: &EncryptionContext,
    ) -> Result<Zeroizing<Vec<u8>>, UnwrapError> {
        (**self).unwrap(wrapped_key, context)
    }

    fn unwrap_opaque(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, UnwrapError> {
        (**self).unwrap_opaque(ciphertext)
    }
}

/// Construction-time settings for [`KmsClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmsSettings {
    /// Region override; discovered when `None`
    pub region: Option<String>,
    /// Role to assume for every KMS call
    pub role_arn: Option<String>,
    pub session_name: String,
}

impl Default for KmsSettings {
    fn default() -> Self {
        Self {
            region: None,
            role_arn: None,
            session_name: DEFAULT_SESSION_NAME.to_string(),
        }
    }
}

/// Blocking AWS KMS client
///
/// Owns a current-thread tokio runtime, so every worker can hold its own
/// client without sharing any state.
#[cfg(feature = "kms")]
pub struct KmsClient {
    runtime: Runtime,
    client: aws_sdk_kms::Client,
}

#[cfg(feature = "kms")]
impl KmsClient {
    /// Resolve region and credentials, then build the client
    pub fn connect(settings: &KmsSettings) -> Result<Self, UnwrapError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let config = runtime.block_on(load_config(settings))?;
        let client = aws_sdk_kms::Client::new(&config);

        Ok(Self { runtime, client })
    }

    fn decrypt(
        &self,
        ciphertext: &[u8],
        context: Option<&EncryptionContext>,
    ) -> Result<Zeroizing<Vec<u8>>, UnwrapError> {
        let mut request = self
            .client
            .decrypt()
            .ciphertext_blob(Blob::new(ciphertext.to_vec()));
        if let Some(context) = context.filter(|c| !c.is_empty()) {
            request = request.set_encryption_context(Some(
                context
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ));
        }

        let output = self
            .runtime
            .block_on(request.send())
            .map_err(classify_decrypt_error)?;

        let plaintext = output.plaintext().ok_or(UnwrapError::EmptyResponse)?;
        Ok(Zeroizing::new(plaintext.as_ref().to_vec()))
    }
}

#[cfg(feature = "kms")]
impl KeyUnwrap for KmsClient {
    fn unwrap(
        &self,
        wrapped_key: &[u8],
        context: &EncryptionContext,
    ) -> Result<Zeroizing<Vec<u8>>, UnwrapError> {
        self.decrypt(wrapped_key, Some(context))
    }

    fn unwrap_opaque(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, UnwrapError> {
        self.decrypt(ciphertext, None)
    }
}

#[cfg(feature = "kms")]
fn classify_decrypt_error<R: std::fmt::Debug>(err: SdkError<DecryptError, R>) -> UnwrapError {
    match err.as_service_error() {
        Some(service) if service.is_invalid_ciphertext_exception() => {
            UnwrapError::InvalidCiphertext(service.to_string())
        }
        _ => UnwrapError::Service(DisplayErrorContext(&err).to_string()),
    }
}

/// Region lookup: explicit setting, `AWS_DEFAULT_REGION`, the SDK provider
/// chain (environment, profile, instance metadata), then [`FALLBACK_REGION`]
#[cfg(feature = "kms")]
pub async fn resolve_region(explicit: Option<&str>) -> Region {
    if let Some(region) = explicit {
        return Region::new(region.to_string());
    }
    if let Some(region) = std::env::var("AWS_DEFAULT_REGION")
        .ok()
        .filter(|r| !r.is_empty())
    {
        return Region::new(region);
    }
    RegionProviderChain::default_provider()
        .or_else(FALLBACK_REGION)
        .region()
        .await
        .unwrap_or_else(|| Region::new(FALLBACK_REGION))
}

#[cfg(feature = "kms")]
async fn load_config(settings: &KmsSettings) -> Result<SdkConfig, UnwrapError> {
    let region = resolve_region(settings.region.as_deref()).await;
    debug!(region = %region, "resolved AWS region");

    let base = aws_config::defaults(BehaviorVersion::latest())
        .region(region.clone())
        .load()
        .await;

    let Some(role_arn) = settings.role_arn.as_deref() else {
        return Ok(base);
    };

    let sts = aws_sdk_sts::Client::new(&base);
    let response = sts
        .assume_role()
        .role_arn(role_arn)
        .role_session_name(&settings.session_name)
        .send()
        .await
        .map_err(|e| {
            UnwrapError::Credentials(format!(
                "assume role {} failed: {}",
                role_arn,
                DisplayErrorContext(&e)
            ))
        })?;

    let assumed = response.credentials().ok_or_else(|| {
        UnwrapError::Credentials(format!("assume role {} returned no credentials", role_arn))
    })?;

    let credentials = aws_credential_types::Credentials::new(
        assumed.access_key_id(),
        assumed.secret_access_key(),
        Some(assumed.session_token().to_string()),
        SystemTime::try_from(*assumed.expiration()).ok(),
        "decrypt-and-start-sts",
    );
    info!(role = role_arn, "assumed role for KMS access");

    Ok(aws_config::defaults(BehaviorVersion::latest())
        .region(region)
        .credentials_provider(credentials)
        .load()
        .await)
}
