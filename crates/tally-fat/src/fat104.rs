//! FAT-104 contract ABI declarations.

use std::collections::BTreeMap;

use serde::Deserialize;
use tally_types::{TxError, TxResult};

/// Scalar types a contract function may take or return.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum AbiType {
    #[serde(rename = "i32")]
    I32,
    #[serde(rename = "i64")]
    I64,
}

/// One declared contract function.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Func {
    #[serde(default)]
    pub args: Vec<AbiType>,
    #[serde(rename = "return")]
    pub ret: Option<AbiType>,
}

/// A contract's full ABI: exported function name to its signature.
pub type Abi = BTreeMap<String, Func>;

/// Parse an ABI from its stored JSON.
pub fn parse_abi(json: &str) -> TxResult<Abi> {
    serde_json::from_str(json).map_err(|err| TxError::ContractSetup(format!("abi: {err}")))
}
