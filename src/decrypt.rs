//! Decryption entry point
//!
//! A value is first handed to the key service as an opaque ciphertext. Only
//! when the service answers that it does not recognise the ciphertext is the
//! value treated as an envelope message and decrypted locally.

use crate::engine::{DecryptError, Engine};
use crate::kms::KeyUnwrap;
use crate::message::Message;
use tracing::debug;
use zeroize::Zeroizing;

/// Options for [`Decryptor`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecryptOptions {
    /// Verify the envelope header tag before decrypting frames
    pub verify_header_auth: bool,
}

/// Decrypts single values through a key unwrap client
pub struct Decryptor<C: KeyUnwrap> {
    client: C,
    options: DecryptOptions,
}

impl<C: KeyUnwrap> Decryptor<C> {
    pub fn new(client: C) -> Self {
        Self::with_options(client, DecryptOptions::default())
    }

    pub fn with_options(client: C, options: DecryptOptions) -> Self {
        Self { client, options }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Decrypt a ciphertext, falling back to envelope decoding when the key
    /// service rejects it as unrecognised
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, DecryptError> {
        match self.client.unwrap_opaque(ciphertext) {
            Ok(plaintext) => {
                debug!("decrypted directly by key service");
                Ok(plaintext)
            }
            Err(err) if err.is_invalid_ciphertext() => {
                debug!("not a direct ciphertext, decoding envelope message");
                let message = Message::from_bytes(ciphertext)?;
                Engine::new(&self.client)
                    .with_header_verification(self.options.verify_header_auth)
                    .decrypt(&message)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Decrypt one value with default options
pub fn decrypt_value<C: KeyUnwrap + Sync + ?Sized>(
    client: &C,
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, DecryptError> {
    Decryptor::new(client).decrypt(ciphertext)
}
