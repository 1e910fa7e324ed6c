//! # tally-types
//!
//! Shared domain types for the tally workspace: 32-byte identifiers, entry
//! and entry-block records in their canonical binary form, identity records,
//! and the transaction-rule error channel shared by every layer above.

pub mod cancel;
pub mod eblock;
pub mod entry;
pub mod error;
pub mod identity;

pub use cancel::Cancel;
pub use eblock::EBlock;
pub use entry::Entry;
pub use error::{TxError, TxResult};
pub use identity::Identity;

/// A chain identifier: the SHA-256 chain id derived from the first entry's
/// external IDs.
pub type ChainId = [u8; 32];

/// An entry content hash.
pub type EntryHash = [u8; 32];

/// A key Merkle root of an entry block or directory block.
pub type KeyMr = [u8; 32];

/// An address: the double-SHA-256 hash of an RCD (public-key commitment).
pub type RcdHash = [u8; 32];

/// The 4-byte network identifier carried by directory blocks.
pub type NetworkId = [u8; 4];

/// The distinguished all-zero address that minted balances are drawn from.
pub const COINBASE_RCD_HASH: RcdHash = [0u8; 32];

/// Number of read-only connections in a chain store's pool.
pub const READ_POOL_SIZE: usize = 10;

/// Parse a 64-character hex string into a 32-byte identifier.
pub fn parse_hash32(s: &str) -> Option<[u8; 32]> {
    if s.len() != 64 {
        return None;
    }
    let bytes = hex::decode(s).ok()?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Some(out)
}

/// Lowercase hex rendering of a 32-byte identifier.
pub fn hash32_hex(h: &[u8; 32]) -> String {
    hex::encode(h)
}
