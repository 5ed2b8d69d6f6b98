//! Algorithm suite registry
//!
//! Every envelope message names the algorithm suite it was encrypted with by a
//! 16-bit identifier in its header. The suite fixes the data key length, the
//! IV and authentication tag lengths, and whether the data key is expanded
//! with HKDF before use.
//!
//! ```text
//! ┌────────┬──────────┬─────┬─────┬──────────┐
//! │ id     │ key (B)  │ IV  │ tag │ KDF hash │
//! ├────────┼──────────┼─────┼─────┼──────────┤
//! │ 0x0378 │ 32       │ 12  │ 16  │ SHA-384  │
//! │ 0x0346 │ 24       │ 12  │ 16  │ SHA-384  │
//! │ 0x0214 │ 16       │ 12  │ 16  │ SHA-256  │
//! │ 0x0178 │ 32       │ 12  │ 16  │ SHA-256  │
//! │ 0x0146 │ 24       │ 12  │ 16  │ SHA-256  │
//! │ 0x0114 │ 16       │ 12  │ 16  │ SHA-256  │
//! │ 0x0078 │ 32       │ 12  │ 16  │ -        │
//! │ 0x0046 │ 24       │ 12  │ 16  │ -        │
//! │ 0x0014 │ 16       │ 12  │ 16  │ -        │
//! └────────┴──────────┴─────┴─────┴──────────┘
//! ```

use crate::message::DecodeError;

/// Block cipher family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherFamily {
    Aes,
}

/// AEAD mode of operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadMode {
    Gcm,
}

/// Hash function used for HKDF content key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfHash {
    Sha256,
    Sha384,
}

/// Parameters of one algorithm suite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmSuite {
    pub id: u16,
    pub cipher: CipherFamily,
    pub data_key_length: usize,
    pub mode: AeadMode,
    pub iv_length: usize,
    pub tag_length: usize,
    /// `None` means the unwrapped data key is the content key
    pub kdf_hash: Option<KdfHash>,
}

const fn aes_gcm(id: u16, data_key_length: usize, kdf_hash: Option<KdfHash>) -> AlgorithmSuite {
    AlgorithmSuite {
        id,
        cipher: CipherFamily::Aes,
        data_key_length,
        mode: AeadMode::Gcm,
        iv_length: 12,
        tag_length: 16,
        kdf_hash,
    }
}

/// All supported suites
pub static SUITES: [AlgorithmSuite; 9] = [
    aes_gcm(0x0378, 32, Some(KdfHash::Sha384)),
    aes_gcm(0x0346, 24, Some(KdfHash::Sha384)),
    aes_gcm(0x0214, 16, Some(KdfHash::Sha256)),
    aes_gcm(0x0178, 32, Some(KdfHash::Sha256)),
    aes_gcm(0x0146, 24, Some(KdfHash::Sha256)),
    aes_gcm(0x0114, 16, Some(KdfHash::Sha256)),
    aes_gcm(0x0078, 32, None),
    aes_gcm(0x0046, 24, None),
    aes_gcm(0x0014, 16, None),
];

/// Look up a suite by its wire identifier
pub fn lookup(id: u16) -> Option<&'static AlgorithmSuite> {
    SUITES.iter().find(|suite| suite.id == id)
}

impl AlgorithmSuite {
    /// Resolve a suite, failing with `UnknownAlgorithmSuite` when the id is not registered
    pub fn require(id: u16) -> Result<&'static AlgorithmSuite, DecodeError> {
        lookup(id).ok_or(DecodeError::UnknownAlgorithmSuite(id))
    }

    /// Whether the content key is derived from the data key with HKDF
    pub fn derives_key(&self) -> bool {
        self.kdf_hash.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DOCUMENTED_IDS: [u16; 9] = [
        0x0014, 0x0046, 0x0078, 0x0114, 0x0146, 0x0178, 0x0214, 0x0346, 0x0378,
    ];

    #[test]
    fn test_every_documented_id_resolves() {
        for id in DOCUMENTED_IDS {
            let suite = lookup(id).unwrap_or_else(|| panic!("suite 0x{:04x} missing", id));
            assert_eq!(suite.id, id);
            assert_eq!(suite.cipher, CipherFamily::Aes);
            assert_eq!(suite.mode, AeadMode::Gcm);
            assert_eq!(suite.iv_length, 12);
            assert_eq!(suite.tag_length, 16);
        }
    }

    #[test]
    fn test_key_lengths_and_hashes() {
        assert_eq!(lookup(0x0014).unwrap().data_key_length, 16);
        assert_eq!(lookup(0x0046).unwrap().data_key_length, 24);
        assert_eq!(lookup(0x0078).unwrap().data_key_length, 32);
        assert!(!lookup(0x0078).unwrap().derives_key());

        assert_eq!(lookup(0x0114).unwrap().kdf_hash, Some(KdfHash::Sha256));
        assert_eq!(lookup(0x0214).unwrap().kdf_hash, Some(KdfHash::Sha256));
        assert_eq!(lookup(0x0346).unwrap().kdf_hash, Some(KdfHash::Sha384));
        assert_eq!(lookup(0x0378).unwrap().data_key_length, 32);
    }

    #[test]
    fn test_unknown_id() {
        assert!(lookup(0x0000).is_none());
        assert!(matches!(
            AlgorithmSuite::require(0x0578),
            Err(DecodeError::UnknownAlgorithmSuite(0x0578))
        ));
    }

    proptest! {
        #[test]
        fn prop_lookup_is_total_over_u16(id in any::<u16>()) {
            let found = lookup(id);
            prop_assert_eq!(found.is_some(), DOCUMENTED_IDS.contains(&id));
            if let Some(suite) = found {
                prop_assert_eq!(suite.id, id);
            }
        }
    }
}
