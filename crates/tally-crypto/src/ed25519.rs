//! Ed25519 signing and verification (RFC 8032).
//!
//! The indexer only ever verifies: issuance and transaction entries carry
//! Ed25519 signatures that must check out against the issuer identity's ID1
//! key or the input addresses' RCD keys. Signing exists for tests and
//! tooling. This module wraps `ed25519-dalek` with tally-specific types.

use ed25519_dalek::{Signer, Verifier};

use crate::{CryptoError, Result};

/// An Ed25519 signing key (private key).
pub struct SigningKey {
    inner: ed25519_dalek::SigningKey,
}

/// An Ed25519 verification key (public key).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifyingKey {
    inner: ed25519_dalek::VerifyingKey,
}

/// An Ed25519 signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    inner: ed25519_dalek::Signature,
}

impl SigningKey {
    /// Generate a new random signing key.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            inner: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

    /// Create a signing key from raw bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(bytes),
        }
    }

    /// Get the corresponding verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey {
            inner: self.inner.verifying_key(),
        }
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature {
            inner: self.inner.sign(message),
        }
    }
}

impl VerifyingKey {
    /// Create a verifying key from raw bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let inner = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidInput(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Get the raw bytes of this verifying key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Verify a signature on a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        self.inner
            .verify(message, &signature.inner)
            .map_err(|_| CryptoError::SignatureVerification)
    }
}

impl Signature {
    /// Create a signature from a 64-byte slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let inner = ed25519_dalek::Signature::from_slice(bytes)
            .map_err(|e| CryptoError::InvalidInput(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Get the raw bytes of this signature.
    pub fn to_bytes(&self) -> [u8; 64] {
        self.inner.to_bytes()
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("public", &self.verifying_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let sk = SigningKey::generate();
        let msg = b"tally protocol test";
        let sig = sk.sign(msg);
        assert!(sk.verifying_key().verify(msg, &sig).is_ok());
    }

    #[test]
    fn test_wrong_message_fails() {
        let sk = SigningKey::generate();
        let sig = sk.sign(b"correct message");
        assert!(sk.verifying_key().verify(b"wrong message", &sig).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sk1 = SigningKey::generate();
        let sk2 = SigningKey::generate();
        let sig = sk1.sign(b"test");
        assert!(sk2.verifying_key().verify(b"test", &sig).is_err());
    }

    #[test]
    fn test_signature_serialization() {
        let sk = SigningKey::generate();
        let sig = sk.sign(b"test");
        let restored = Signature::from_slice(&sig.to_bytes()).expect("valid bytes");
        assert_eq!(sig, restored);
    }

    #[test]
    fn test_deterministic_key_derivation() {
        let seed = [42u8; 32];
        let sk1 = SigningKey::from_bytes(&seed);
        let sk2 = SigningKey::from_bytes(&seed);
        assert_eq!(sk1.verifying_key(), sk2.verifying_key());

        let sk3 = SigningKey::from_bytes(&[43u8; 32]);
        assert_ne!(sk1.verifying_key(), sk3.verifying_key());
    }
}
