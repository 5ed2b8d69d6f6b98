//! Runtime configuration
//!
//! Built by the binary from command-line flags and environment fallbacks,
//! then validated once before any worker starts.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default worker-pool size
pub const DEFAULT_WORKERS: usize = 10;

/// Upper bound on the worker-pool size
pub const MAX_WORKERS: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("worker count must be between 1 and {max}, got {got}")]
    InvalidWorkerCount { got: usize, max: usize },

    #[error("invalid IAM role ARN: {0}")]
    InvalidRoleArn(String),

    #[error("unknown base64 alphabet {0:?} (expected \"standard\" or \"url-safe\")")]
    UnknownAlphabet(String),

    #[error("region must not be empty")]
    EmptyRegion,
}

/// Alphabet of the base64 payload following the `decrypt:` marker
///
/// Both alphabets expect padding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Base64Alphabet {
    #[default]
    Standard,
    UrlSafe,
}

impl FromStr for Base64Alphabet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" | "std" => Ok(Self::Standard),
            "url-safe" | "urlsafe" | "url" => Ok(Self::UrlSafe),
            _ => Err(ConfigError::UnknownAlphabet(s.to_string())),
        }
    }
}

impl fmt::Display for Base64Alphabet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => f.write_str("standard"),
            Self::UrlSafe => f.write_str("url-safe"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub workers: usize,
    /// Role assumed through STS before calling KMS
    pub role_arn: Option<String>,
    /// Region override; discovered from the environment when unset
    pub region: Option<String>,
    pub alphabet: Base64Alphabet,
    pub verify_header_auth: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            role_arn: None,
            region: None,
            alphabet: Base64Alphabet::Standard,
            verify_header_auth: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_WORKERS).contains(&self.workers) {
            return Err(ConfigError::InvalidWorkerCount {
                got: self.workers,
                max: MAX_WORKERS,
            });
        }
        if let Some(arn) = &self.role_arn {
            validate_role_arn(arn)?;
        }
        if matches!(&self.region, Some(region) if region.trim().is_empty()) {
            return Err(ConfigError::EmptyRegion);
        }
        Ok(())
    }
}

/// Accepts `arn:<partition>:iam::<account>:role/<name>`
fn validate_role_arn(arn: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidRoleArn(arn.to_string());

    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    let [prefix, partition, service, region, account, resource] = parts.as_slice() else {
        return Err(invalid());
    };

    if *prefix != "arn" || partition.is_empty() || *service != "iam" || !region.is_empty() {
        return Err(invalid());
    }
    if account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    match resource.strip_prefix("role/") {
        Some(name) if !name.is_empty() => Ok(()),
        _ => Err(invalid()),
    }
}
