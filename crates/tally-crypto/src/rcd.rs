//! RCD (reveal-commit descriptor) type 1 handling.
//!
//! An RCD-1 is the byte `0x01` followed by an Ed25519 public key. Its
//! double-SHA-256 hash is the address that signed entries commit to.

use crate::ed25519::VerifyingKey;
use crate::hash::sha256d;
use crate::{CryptoError, Result};

/// RCD type tag for a single Ed25519 key.
pub const RCD_TYPE_1: u8 = 0x01;

/// Length of a marshaled RCD-1: type byte plus 32-byte public key.
pub const RCD_1_LEN: usize = 33;

/// Compose an RCD-1 from a public key.
pub fn compose(key: &VerifyingKey) -> [u8; RCD_1_LEN] {
    let mut rcd = [0u8; RCD_1_LEN];
    rcd[0] = RCD_TYPE_1;
    rcd[1..].copy_from_slice(&key.to_bytes());
    rcd
}

/// The address committed to by an RCD: `sha256(sha256(rcd))`.
pub fn hash(rcd: &[u8]) -> [u8; 32] {
    sha256d(rcd)
}

/// The address of a public key's RCD-1.
pub fn hash_of_key(key: &VerifyingKey) -> [u8; 32] {
    hash(&compose(key))
}

/// Parse a marshaled RCD-1 into its public key.
pub fn parse(rcd: &[u8]) -> Result<VerifyingKey> {
    if rcd.len() != RCD_1_LEN || rcd[0] != RCD_TYPE_1 {
        return Err(CryptoError::InvalidInput("not an RCD-1".to_string()));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&rcd[1..]);
    VerifyingKey::from_bytes(&key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ed25519::SigningKey;

    #[test]
    fn test_compose_parse_roundtrip() {
        let sk = SigningKey::generate();
        let vk = sk.verifying_key();
        let rcd = compose(&vk);
        assert_eq!(parse(&rcd).expect("valid rcd"), vk);
    }

    #[test]
    fn test_parse_rejects_bad_type() {
        let sk = SigningKey::generate();
        let mut rcd = compose(&sk.verifying_key());
        rcd[0] = 0x02;
        assert!(parse(&rcd).is_err());
    }

    #[test]
    fn test_parse_rejects_bad_length() {
        assert!(parse(&[RCD_TYPE_1; 10]).is_err());
    }

    #[test]
    fn test_hash_matches_manual_computation() {
        let sk = SigningKey::generate();
        let rcd = compose(&sk.verifying_key());
        assert_eq!(hash(&rcd), sha256d(&rcd));
        assert_eq!(hash_of_key(&sk.verifying_key()), sha256d(&rcd));
    }
}
