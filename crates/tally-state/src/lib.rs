//! # tally-state
//!
//! The per-chain replay engine: a deterministic state machine that ingests
//! entry blocks for a tracked token chain, applies each entry under
//! transactional storage semantics, and enforces the FAT-0/FAT-1 token
//! rules plus the FAT-104/107 contract rules.
//!
//! ## Error channels
//!
//! Appliers return `Result<TxResult<T>, Error>`. The outer `Result` is the
//! infrastructure channel: I/O failures, invariant breaches, client
//! transport errors; it rolls back everything and halts the chain. The
//! inner [`TxResult`] is the token-rule channel: the entry row persists
//! with `valid = false`, its balance and contract effects are rolled back,
//! and the chain keeps replaying.

pub mod chain;
pub mod client;
pub mod contract;
pub mod query;
pub mod sync;

pub use chain::{Chain, ChainState};
pub use client::{BlockClient, ClientError, ContractSource, DBlock, OfflineClient};
pub use sync::{Cancel, ChainHandle, Registry};

use tally_db::DbError;
use tally_runtime::RuntimeError;

/// Infrastructure failures. Any of these halts the affected chain.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("client: {0}")]
    Client(#[from] ClientError),

    #[error("invariant: {0}")]
    Invariant(String),

    #[error("cancelled")]
    Cancelled,

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
