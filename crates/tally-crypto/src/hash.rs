//! SHA-2 hash functions and the ledger's derived hashes.

use sha2::{Digest, Sha256, Sha512};

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Double SHA-256: `sha256(sha256(data))`. Used for RCD hashes and Wasm
/// data hashes.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// SHA-512 of `data`.
pub fn sha512(data: &[u8]) -> [u8; 64] {
    Sha512::digest(data).into()
}

/// The content hash of a marshaled entry: `sha256(sha512(data) || data)`.
pub fn entry_hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(sha512(data));
    hasher.update(data);
    hasher.finalize().into()
}

/// The chain id derived from a first entry's external IDs:
/// `sha256(concat(sha256(extid_i)))`.
pub fn compute_chain_id<T: AsRef<[u8]>>(ext_ids: &[T]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for ext_id in ext_ids {
        hasher.update(sha256(ext_id.as_ref()));
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        // sha256("abc")
        let expected =
            hex::decode("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
                .expect("valid hex");
        assert_eq!(sha256(b"abc").as_slice(), expected.as_slice());
    }

    #[test]
    fn test_sha256d_is_double_hash() {
        let once = sha256(b"tally");
        assert_eq!(sha256d(b"tally"), sha256(&once));
    }

    #[test]
    fn test_entry_hash_depends_on_data() {
        assert_ne!(entry_hash(b"a"), entry_hash(b"b"));
    }

    #[test]
    fn test_chain_id_deterministic() {
        let ids = [b"token".to_vec(), b"TST".to_vec()];
        assert_eq!(compute_chain_id(&ids), compute_chain_id(&ids));
        let other = [b"token".to_vec(), b"TST2".to_vec()];
        assert_ne!(compute_chain_id(&ids), compute_chain_id(&other));
    }

    #[test]
    fn test_chain_id_sensitive_to_boundaries() {
        // ["ab", "c"] and ["a", "bc"] must not collide.
        let left = [b"ab".to_vec(), b"c".to_vec()];
        let right = [b"a".to_vec(), b"bc".to_vec()];
        assert_ne!(compute_chain_id(&left), compute_chain_id(&right));
    }
}
