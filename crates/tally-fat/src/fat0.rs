//! FAT-0 fungible token transactions.

use std::collections::BTreeMap;

use serde::Deserialize;
use tally_types::{ChainId, Entry, RcdHash, TxError, TxResult, COINBASE_RCD_HASH};

/// A validated FAT-0 transaction.
#[derive(Clone, Debug)]
pub struct Transaction {
    pub inputs: BTreeMap<RcdHash, u64>,
    pub outputs: BTreeMap<RcdHash, u64>,
    pub metadata: Option<serde_json::Value>,
    /// Data-store chain of a contract the outputs delegate to.
    pub contract: Option<ChainId>,
    /// Function name of a contract call against the output address.
    pub func: Option<String>,
    pub args: Vec<i64>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TxContent {
    inputs: BTreeMap<String, u64>,
    outputs: BTreeMap<String, u64>,
    metadata: Option<serde_json::Value>,
    contract: Option<String>,
    func: Option<String>,
    #[serde(default)]
    args: Vec<i64>,
}

impl Transaction {
    /// Parse and signature-verify a FAT-0 transaction entry. Coinbase
    /// entries must be signed by the identity's ID1 key, ordinary entries
    /// by every input address.
    pub fn from_entry(e: &Entry, id1_key: &[u8; 32]) -> TxResult<Self> {
        let content: TxContent = serde_json::from_slice(&e.content)
            .map_err(|err| TxError::Invalid(format!("transaction content: {err}")))?;

        let inputs = crate::parse_address_keys(content.inputs)?;
        let outputs = crate::parse_address_keys(content.outputs)?;
        let contract = content
            .contract
            .as_deref()
            .map(|s| {
                tally_types::parse_hash32(s)
                    .ok_or_else(|| TxError::Invalid(format!("bad contract chain id {s:?}")))
            })
            .transpose()?;

        let tx = Self {
            inputs,
            outputs,
            metadata: content.metadata,
            contract,
            func: content.func,
            args: content.args,
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
        if self.inputs.values().chain(self.outputs.values()).any(|&n| n == 0) {
            return Err(TxError::Invalid("zero amount".to_string()));
        }

        let sum = |m: &BTreeMap<RcdHash, u64>| -> TxResult<u64> {
            m.values().try_fold(0u64, |acc, &n| {
                acc.checked_add(n)
                    .ok_or_else(|| TxError::Invalid("amount overflow".to_string()))
            })
        };
        if sum(&self.inputs)? != sum(&self.outputs)? {
            return Err(TxError::Invalid("inputs do not equal outputs".to_string()));
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
        } else if self.inputs.keys().any(|adr| self.outputs.contains_key(adr)) {
            return Err(TxError::Invalid(
                "inputs and outputs must be disjoint".to_string(),
            ));
        }

        if self.contract.is_some() && self.func.is_some() {
            return Err(TxError::Invalid(
                "contract delegation and call are exclusive".to_string(),
            ));
        }
        if self.func.is_none() && !self.args.is_empty() {
            return Err(TxError::Invalid("args without func".to_string()));
        }
        Ok(())
    }

    /// Whether this transaction mints from the coinbase address.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.contains_key(&COINBASE_RCD_HASH)
    }

    /// Whether the outputs carry a contract delegation.
    pub fn is_contract_delegation(&self) -> bool {
        self.contract.is_some()
    }

    /// Whether this transaction calls a contract on the output address.
    pub fn is_contract_call(&self) -> bool {
        self.func.is_some()
    }
}
