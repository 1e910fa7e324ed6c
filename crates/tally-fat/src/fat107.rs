//! FAT-107 Wasm data-store manifests.
//!
//! A contract's code lives on its own content-addressed chain whose first
//! entry declares the blob's double-SHA-256 hash, its size, and the ABI.
//! The manifest entry's external IDs must found the chain it sits on.

use serde::Deserialize;
use tally_crypto::hash::sha256d;
use tally_types::{ChainId, Entry, TxError, TxResult};

use crate::fat104::Abi;

/// A validated data-store manifest.
#[derive(Clone, Debug)]
pub struct Manifest {
    /// The chain the manifest founds, from its external IDs.
    pub chain_id: ChainId,
    /// `sha256(sha256(wasm))` of the stored blob.
    pub data_hash: [u8; 32],
    pub size: u64,
    pub abi: Abi,
    pub abi_json: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestContent {
    #[serde(rename = "data-hash")]
    data_hash: String,
    size: u64,
    abi: serde_json::Value,
}

impl Manifest {
    /// Parse a data-store chain's first entry.
    pub fn parse_entry(e: &Entry) -> TxResult<Self> {
        if e.derived_chain_id() != e.chain_id {
            return Err(TxError::ContractSetup(
                "manifest external IDs do not match chain id".to_string(),
            ));
        }
        let content: ManifestContent = serde_json::from_slice(&e.content)
            .map_err(|err| TxError::ContractSetup(format!("manifest: {err}")))?;
        let data_hash = tally_types::parse_hash32(&content.data_hash)
            .ok_or_else(|| TxError::ContractSetup("bad data-hash".to_string()))?;
        let abi_json = content.abi.to_string();
        let abi = crate::fat104::parse_abi(&abi_json)?;
        Ok(Self {
            chain_id: e.chain_id,
            data_hash,
            size: content.size,
            abi,
            abi_json,
        })
    }

    /// Check a downloaded blob against the declared size and hash.
    pub fn verify(&self, wasm: &[u8]) -> TxResult<()> {
        if wasm.len() as u64 != self.size {
            return Err(TxError::ContractSetup(format!(
                "wasm blob is {} bytes, manifest declares {}",
                wasm.len(),
                self.size
            )));
        }
        if sha256d(wasm) != self.data_hash {
            return Err(TxError::ContractSetup(
                "wasm blob hash does not match manifest".to_string(),
            ));
        }
        Ok(())
    }
}

/// Build a manifest entry for a Wasm blob. Used by tests and tooling; the
/// indexer itself only consumes manifests.
pub fn build_entry(wasm: &[u8], abi_json: &str) -> Entry {
    let content = format!(
        r#"{{"data-hash":"{}","size":{},"abi":{}}}"#,
        hex::encode(sha256d(wasm)),
        wasm.len(),
        abi_json
    );
    let ext_ids = vec![b"wasm-data-store".to_vec(), sha256d(wasm).to_vec()];
    let chain_id = tally_crypto::hash::compute_chain_id(&ext_ids);
    Entry::new(chain_id, ext_ids, content.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_parse_verify_roundtrip() {
        let wasm = b"\0asm pretend module";
        let e = build_entry(wasm, r#"{"foo":{"args":[]}}"#);
        let m = Manifest::parse_entry(&e).expect("parse");
        assert_eq!(m.size, wasm.len() as u64);
        assert!(m.abi.contains_key("foo"));
        m.verify(wasm).expect("verify");
    }

    #[test]
    fn test_verify_rejects_wrong_blob() {
        let e = build_entry(b"module-a", "{}");
        let m = Manifest::parse_entry(&e).expect("parse");
        assert!(m.verify(b"module-b").is_err());
        assert!(m.verify(b"module-a-padded").is_err());
    }

    #[test]
    fn test_parse_rejects_mismatched_chain_id() {
        let mut e = build_entry(b"module", "{}");
        e.chain_id = [0xee; 32];
        assert!(Manifest::parse_entry(&e).is_err());
    }
}
