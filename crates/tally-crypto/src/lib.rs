//! # tally-crypto
//!
//! Hashing and signature primitives for the tally workspace. Everything in
//! the ledger format is SHA-256 addressed: entry hashes, chain ids, RCD
//! hashes and Wasm data hashes all come from this crate. Signatures are
//! Ed25519, wrapped in crate-local types so callers never touch
//! `ed25519-dalek` directly.

pub mod ed25519;
pub mod hash;
pub mod rcd;

/// Crypto error types.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("signature verification failed")]
    SignatureVerification,
}

pub type Result<T> = std::result::Result<T, CryptoError>;
