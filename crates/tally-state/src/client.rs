//! The upstream block-explorer client, as the core sees it.
//!
//! The real client lives outside this workspace; the core only consumes
//! this trait. Identity lookups tolerate a protocol-level "not found" (the
//! chain stays without an identity). Everywhere else a client error is an
//! infrastructure failure, except during contract ingestion, where the
//! token rules make any lookup failure reject the delegating transaction.

use tally_types::{ChainId, EBlock, Entry, EntryHash, Identity, KeyMr, NetworkId};

/// Client failure modes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The node answered, but the requested object does not exist.
    #[error("not found")]
    NotFound,

    /// Transport or protocol failure.
    #[error("transport: {0}")]
    Transport(String),
}

/// A directory block header, as needed by the sync driver.
#[derive(Debug, Clone)]
pub struct DBlock {
    pub height: u32,
    pub key_mr: KeyMr,
    pub network_id: NetworkId,
    pub timestamp: u64,
}

/// A contract's data-store chain, fully fetched: the manifest entry plus
/// the reassembled Wasm blob.
#[derive(Debug, Clone)]
pub struct ContractSource {
    pub first_entry: Entry,
    pub wasm: Vec<u8>,
}

/// Read access to a block-explorer node.
pub trait BlockClient: Send + Sync {
    fn dblock_by_height(&self, height: u32) -> std::result::Result<DBlock, ClientError>;

    fn eblock(&self, key_mr: &KeyMr) -> std::result::Result<EBlock, ClientError>;

    fn entry(&self, hash: &EntryHash) -> std::result::Result<Entry, ClientError>;

    /// The issuer identity published on `chain_id`, if any.
    fn identity(&self, chain_id: &ChainId) -> std::result::Result<Identity, ClientError>;

    /// Fetch and reassemble a contract's data-store chain.
    fn contract_source(&self, chain_id: &ChainId) -> std::result::Result<ContractSource, ClientError>;
}

/// A client for daemons that only serve reads: every lookup fails. Chains
/// already on disk open and answer queries; nothing new syncs.
pub struct OfflineClient;

impl BlockClient for OfflineClient {
    fn dblock_by_height(&self, _height: u32) -> std::result::Result<DBlock, ClientError> {
        Err(ClientError::Transport("no upstream configured".to_string()))
    }

    fn eblock(&self, _key_mr: &KeyMr) -> std::result::Result<EBlock, ClientError> {
        Err(ClientError::Transport("no upstream configured".to_string()))
    }

    fn entry(&self, _hash: &EntryHash) -> std::result::Result<Entry, ClientError> {
        Err(ClientError::Transport("no upstream configured".to_string()))
    }

    fn identity(&self, _chain_id: &ChainId) -> std::result::Result<Identity, ClientError> {
        Err(ClientError::NotFound)
    }

    fn contract_source(
        &self,
        _chain_id: &ChainId,
    ) -> std::result::Result<ContractSource, ClientError> {
        Err(ClientError::NotFound)
    }
}
