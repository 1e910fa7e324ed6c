//! Issuer identity records.

use serde::{Deserialize, Serialize};

use crate::ChainId;

/// A published key record authorizing issuance and coinbase signatures on
/// the chains that name it as issuer. Stored as JSON in the chain store's
/// metadata row once fetched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// The identity chain's id.
    #[serde(with = "hex_32")]
    pub chain_id: ChainId,
    /// The ID1 Ed25519 public key.
    #[serde(with = "hex_32")]
    pub id1_key: [u8; 32],
    /// Directory-block height the key record was published at.
    pub height: u32,
    /// Unix seconds of the publishing block.
    pub timestamp: u64,
}

impl Identity {
    /// Marshal for the metadata blob column.
    pub fn marshal(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("identity serializes")
    }

    /// Unmarshal from the metadata blob column.
    pub fn unmarshal(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

mod hex_32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        crate::parse_hash32(&s).ok_or_else(|| serde::de::Error::custom("expected 64 hex chars"))
    }
}
