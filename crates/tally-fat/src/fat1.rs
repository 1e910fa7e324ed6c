//! FAT-1 non-fungible token transactions.
//!
//! The shape mirrors FAT-0 with sorted, duplicate-free arrays of NF token
//! ids in place of amounts. Coinbase entries mint the listed ids and may
//! attach per-token metadata.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use tally_types::{Entry, RcdHash, TxError, TxResult, COINBASE_RCD_HASH};

/// A validated FAT-1 transaction.
#[derive(Clone, Debug)]
pub struct Transaction {
    pub inputs: BTreeMap<RcdHash, Vec<u64>>,
    pub outputs: BTreeMap<RcdHash, Vec<u64>>,
    pub metadata: Option<serde_json::Value>,
    /// Per-token metadata on coinbase mints, keyed by NF token id.
    pub token_metadata: BTreeMap<u64, serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TxContent {
    inputs: BTreeMap<String, Vec<u64>>,
    outputs: BTreeMap<String, Vec<u64>>,
    metadata: Option<serde_json::Value>,
    #[serde(default)]
    tokenmetadata: BTreeMap<String, serde_json::Value>,
}

impl Transaction {
    /// Parse and signature-verify a FAT-1 transaction entry.
    pub fn from_entry(e: &Entry, id1_key: &[u8; 32]) -> TxResult<Self> {
        let content: TxContent = serde_json::from_slice(&e.content)
            .map_err(|err| TxError::Invalid(format!("transaction content: {err}")))?;

        let mut token_metadata = BTreeMap::new();
        for (key, value) in content.tokenmetadata {
            let id: u64 = key
                .parse()
                .map_err(|_| TxError::Invalid(format!("bad NF token id {key:?}")))?;
            token_metadata.insert(id, value);
        }

        let tx = Self {
            inputs: crate::parse_address_keys(content.inputs)?,
            outputs: crate::parse_address_keys(content.outputs)?,
            metadata: content.metadata,
            token_metadata,
        };
        tx.validate()?;

        if tx.is_coinbase() {
            crate::verify_id1(e, id1_key)?;
        } else {
            crate::verify_inputs(e, |adr| tx.inputs.contains_key(adr), tx.inputs.len())?;
        }
        Ok(tx)
    }

    fn validate(&self) -> TxResult<()> {
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(TxError::Invalid("inputs and outputs required".to_string()));
        }

        let collect = |m: &BTreeMap<RcdHash, Vec<u64>>| -> TxResult<BTreeSet<u64>> {
            let mut all = BTreeSet::new();
            for ids in m.values() {
                if ids.is_empty() {
                    return Err(TxError::Invalid("empty NF token id set".to_string()));
                }
                if ids.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(TxError::Invalid(
                        "NF token ids must be sorted and unique".to_string(),
                    ));
                }
                for &id in ids {
                    if !all.insert(id) {
                        return Err(TxError::Invalid(format!("NFToken{{{id}}} listed twice")));
                    }
                }
            }
            Ok(all)
        };
        let in_ids = collect(&self.inputs)?;
        let out_ids = collect(&self.outputs)?;
        if in_ids != out_ids {
            return Err(TxError::Invalid(
                "input and output NF token sets differ".to_string(),
            ));
        }

        if self.outputs.contains_key(&COINBASE_RCD_HASH) {
            return Err(TxError::Invalid("coinbase cannot receive".to_string()));
        }
        if self.is_coinbase() {
            if self.inputs.len() != 1 {
                return Err(TxError::Invalid(
                    "coinbase must be the only input".to_string(),
                ));
            }
        } else {
            if self.inputs.keys().any(|adr| self.outputs.contains_key(adr)) {
                return Err(TxError::Invalid(
                    "inputs and outputs must be disjoint".to_string(),
                ));
            }
            if !self.token_metadata.is_empty() {
                return Err(TxError::Invalid(
                    "tokenmetadata only allowed on coinbase".to_string(),
                ));
            }
        }
        if self.token_metadata.keys().any(|id| !in_ids.contains(id)) {
            return Err(TxError::Invalid(
                "tokenmetadata for an id not being minted".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether this transaction mints from the coinbase address.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.contains_key(&COINBASE_RCD_HASH)
    }
}
