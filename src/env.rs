//! Environment scanning and rewrite
//!
//! A variable is a candidate when its value starts with [`MARKER`]; the rest of
//! the value is the base64 ciphertext.

use crate::config::Base64Alphabet;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use std::ffi::OsString;
use thiserror::Error;
use tracing::{debug, info};

/// Prefix marking a value for decryption
pub const MARKER: &str = "decrypt:";

/// Environment rewrite errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
    /// The value itself is never included
    #[error("cannot set {name}: name or value contains '=' or a NUL byte")]
    InvalidEntry { name: String },
}

/// One variable waiting to be decrypted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvJob {
    pub name: String,
    /// Full value, marker included
    pub value: String,
}

/// Collect candidates from `(name, value)` pairs
///
/// Entries whose name or value is not valid UTF-8 are never candidates.
pub fn candidates_from<I>(vars: I) -> Vec<EnvJob>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(name, value)| {
            let name = name.into_string().ok()?;
            let value = value.into_string().ok()?;
            value
                .starts_with(MARKER)
                .then_some(EnvJob { name, value })
        })
        .collect()
}

/// Candidates from the current process environment
pub fn candidates() -> Vec<EnvJob> {
    let jobs = candidates_from(std::env::vars_os());
    debug!(count = jobs.len(), "scanned environment for encrypted values");
    jobs
}

/// Strip the marker and base64-decode the ciphertext
pub fn decode_payload(
    value: &str,
    alphabet: Base64Alphabet,
) -> Result<Vec<u8>, base64::DecodeError> {
    let payload = value.strip_prefix(MARKER).unwrap_or(value);
    match alphabet {
        Base64Alphabet::Standard => STANDARD.decode(payload),
        Base64Alphabet::UrlSafe => URL_SAFE.decode(payload),
    }
}

/// Replace a variable in the current process environment
///
/// Entries `set_var` would panic on are rejected instead.
pub fn apply(name: &str, value: &str) -> Result<(), EnvError> {
    if name.is_empty() || name.contains(['=', '\0']) || value.contains('\0') {
        return Err(EnvError::InvalidEntry {
            name: name.replace('\0', "\\0"),
        });
    }
    std::env::set_var(name, value);
    info!(name, "replaced encrypted environment variable");
    Ok(())
}
