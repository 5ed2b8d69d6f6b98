//! Envelope decryption engine
//!
//! Turns a decoded [`Message`] into plaintext:
//!
//! 1. unwrap the encrypted data keys through a [`KeyUnwrap`] client
//! 2. derive the content key from the first data key (HKDF for suites that
//!    carry a KDF hash, identity otherwise)
//! 3. optionally verify the header authentication tag
//! 4. open every frame with AES-GCM in wire order and concatenate
//!
//! Frame AAD layout:
//!
//! ```text
//! ┌──────────────┬────────────────────────┬──────────┬─────────────────┐
//! │ message id   │ content label          │ seq (BE) │ length (u64 BE) │
//! │ 16 bytes     │ "...Frame" / "...Final │ 4 bytes  │ 8 bytes         │
//! │              │  Frame"                │          │                 │
//! └──────────────┴────────────────────────┴──────────┴─────────────────┘
//! ```

use crate::kms::{KeyUnwrap, UnwrapError};
use crate::message::{DecodeError, Frame, Message};
use crate::suite::{AlgorithmSuite, KdfHash};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};
use hkdf::Hkdf;
use sha2::{Sha256, Sha384};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

type Aes192Gcm = AesGcm<aes_gcm::aes::Aes192, U12>;

/// GCM nonce length accepted by the frame cipher
const GCM_NONCE_LEN: usize = 12;

/// Errors raised while turning an envelope message into plaintext
#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("malformed envelope message: {0}")]
    Decode(#[from] DecodeError),

    #[error("data key unwrap failed: {0}")]
    Unwrap(#[from] UnwrapError),

    /// Frame tag check failed; no plaintext from this message is released
    #[error("authentication failed for frame {sequence}")]
    Authentication { sequence: u32 },

    #[error("header authentication failed")]
    HeaderAuthentication,

    #[error("message carries no encrypted data keys")]
    NoDataKeys,

    #[error("invalid data key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("content key derivation failed")]
    Derivation,
}

impl DecryptError {
    /// Tag mismatch on a frame or on the header
    pub fn is_authentication_error(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::HeaderAuthentication
        )
    }
}

/// AES-GCM keyed for one message, sized by the content key
enum FrameCipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl FrameCipher {
    fn new(key: &[u8]) -> Result<Self, DecryptError> {
        let invalid = |_| DecryptError::InvalidKeyLength {
            expected: 32,
            got: key.len(),
        };
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key).map(Self::Aes128).map_err(invalid),
            24 => Aes192Gcm::new_from_slice(key).map(Self::Aes192).map_err(invalid),
            _ => Aes256Gcm::new_from_slice(key).map(Self::Aes256).map_err(invalid),
        }
    }

    /// Open `ciphertext_and_tag`; `None` on any authentication failure
    fn open(&self, iv: &[u8], aad: &[u8], ciphertext_and_tag: &[u8]) -> Option<Vec<u8>> {
        if iv.len() != GCM_NONCE_LEN {
            return None;
        }
        let nonce = Nonce::from_slice(iv);
        let payload = Payload {
            msg: ciphertext_and_tag,
            aad,
        };
        match self {
            Self::Aes128(cipher) => cipher.decrypt(nonce, payload),
            Self::Aes192(cipher) => cipher.decrypt(nonce, payload),
            Self::Aes256(cipher) => cipher.decrypt(nonce, payload),
        }
        .ok()
    }
}

/// Build the AAD for one frame
pub fn frame_aad(message_id: &[u8], frame: &Frame) -> Vec<u8> {
    let label = frame.aad_content_label();
    let mut aad = Vec::with_capacity(message_id.len() + label.len() + 4 + 8);
    aad.extend_from_slice(message_id);
    aad.extend_from_slice(label);
    aad.extend_from_slice(&frame.sequence_number.to_be_bytes());
    aad.extend_from_slice(&(frame.encrypted_content_length as u64).to_be_bytes());
    aad
}

/// Decrypts envelope messages with data keys unwrapped by `C`
pub struct Engine<'a, C: KeyUnwrap + ?Sized> {
    client: &'a C,
    verify_header_auth: bool,
}

impl<'a, C: KeyUnwrap + ?Sized> Engine<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self {
            client,
            verify_header_auth: false,
        }
    }

    /// Check the header authentication tag before decrypting frames
    pub fn with_header_verification(mut self, enabled: bool) -> Self {
        self.verify_header_auth = enabled;
        self
    }

    /// Unwrap every encrypted data key, in wire order
    pub fn unwrap_data_keys(
        &self,
        message: &Message,
    ) -> Result<Vec<Zeroizing<Vec<u8>>>, DecryptError> {
        if message.encrypted_data_keys.is_empty() {
            return Err(DecryptError::NoDataKeys);
        }
        message
            .encrypted_data_keys
            .iter()
            .map(|edk| {
                debug!(provider = %edk.provider_id, "unwrapping data key");
                self.client
                    .unwrap(&edk.wrapped_key, &message.encryption_context)
                    .map_err(DecryptError::from)
            })
            .collect()
    }

    /// Expand a raw data key into the content key for this message
    ///
    /// Suites with a KDF hash run HKDF with no salt over the raw key, using
    /// the suite id and message id as info. Suites without one use the raw
    /// key as is.
    pub fn derive_content_key(
        &self,
        raw_key: &[u8],
        message: &Message,
    ) -> Result<Zeroizing<Vec<u8>>, DecryptError> {
        let suite = message.suite;
        if raw_key.len() != suite.data_key_length {
            return Err(DecryptError::InvalidKeyLength {
                expected: suite.data_key_length,
                got: raw_key.len(),
            });
        }

        let Some(hash) = suite.kdf_hash else {
            return Ok(Zeroizing::new(raw_key.to_vec()));
        };

        let mut info = Vec::with_capacity(2 + message.message_id.len());
        info.extend_from_slice(&suite.id.to_be_bytes());
        info.extend_from_slice(&message.message_id);

        let mut okm = Zeroizing::new(vec![0u8; suite.data_key_length]);
        match hash {
            KdfHash::Sha256 => Hkdf::<Sha256>::new(None, raw_key)
                .expand(&info, okm.as_mut_slice())
                .map_err(|_| DecryptError::Derivation)?,
            KdfHash::Sha384 => Hkdf::<Sha384>::new(None, raw_key)
                .expand(&info, okm.as_mut_slice())
                .map_err(|_| DecryptError::Derivation)?,
        }
        Ok(okm)
    }

    pub fn build_frame_aad(&self, message: &Message, frame: &Frame) -> Vec<u8> {
        frame_aad(&message.message_id, frame)
    }

    /// Open one frame; the tag is checked before any plaintext is returned
    pub fn decrypt_frame(
        &self,
        key: &[u8],
        suite: &AlgorithmSuite,
        frame: &Frame,
        aad: &[u8],
    ) -> Result<Vec<u8>, DecryptError> {
        let cipher = FrameCipher::new(key)?;
        open_frame(&cipher, suite, frame, aad)
    }

    /// Verify the header authentication tag against the serialized header
    pub fn verify_header(&self, key: &[u8], message: &Message) -> Result<(), DecryptError> {
        let cipher = FrameCipher::new(key)?;
        cipher
            .open(
                &message.header_auth.iv,
                &message.header_bytes,
                &message.header_auth.tag,
            )
            .filter(|plaintext| plaintext.is_empty())
            .map(|_| ())
            .ok_or(DecryptError::HeaderAuthentication)
    }

    /// Decrypt a whole message
    ///
    /// Only the first data key is used to derive the content key.
    pub fn decrypt(&self, message: &Message) -> Result<Zeroizing<Vec<u8>>, DecryptError> {
        let data_keys = self.unwrap_data_keys(message)?;
        let raw_key = data_keys.first().ok_or(DecryptError::NoDataKeys)?;
        let content_key = self.derive_content_key(raw_key, message)?;

        if self.verify_header_auth {
            self.verify_header(&content_key, message)?;
            debug!("header authentication verified");
        }

        let cipher = FrameCipher::new(&content_key)?;
        let mut plaintext = Zeroizing::new(Vec::new());
        for frame in &message.frames {
            let aad = self.build_frame_aad(message, frame);
            let chunk = Zeroizing::new(open_frame(&cipher, message.suite, frame, &aad)?);
            plaintext.extend_from_slice(&chunk);
        }

        debug!(
            frames = message.frames.len(),
            bytes = plaintext.len(),
            "envelope message decrypted"
        );
        Ok(plaintext)
    }
}

fn open_frame(
    cipher: &FrameCipher,
    suite: &AlgorithmSuite,
    frame: &Frame,
    aad: &[u8],
) -> Result<Vec<u8>, DecryptError> {
    let sequence = frame.sequence_number;
    if frame.auth_tag.len() != suite.tag_length {
        return Err(DecryptError::Authentication { sequence });
    }

    let mut sealed = Vec::with_capacity(frame.encrypted_content.len() + frame.auth_tag.len());
    sealed.extend_from_slice(&frame.encrypted_content);
    sealed.extend_from_slice(&frame.auth_tag);

    debug!(
        sequence,
        final_frame = frame.is_final,
        length = frame.encrypted_content_length,
        "decrypting frame"
    );
    cipher
        .open(&frame.iv, aad, &sealed)
        .ok_or(DecryptError::Authentication { sequence })
}
