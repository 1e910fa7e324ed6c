//! The transaction-rule error channel.
//!
//! Every entry application distinguishes two failure channels: a [`TxError`]
//! means the entry is well-formed input that the token rules reject; the
//! entry row stays in the store with `valid = false` and the chain keeps
//! going. Infrastructure errors (I/O, invariant breaches) are a different
//! type in each layer and always propagate.

use crate::hash32_hex;

/// Rejection of an entry by the token rules. Never halts a chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxError {
    /// Another entry with the same content hash was already marked valid.
    #[error("replay: hash previously marked valid")]
    Replay,

    /// The entry content or its signatures do not form a valid record.
    #[error("invalid transaction: {0}")]
    Invalid(String),

    /// The issuer identity is missing or newer than the entry.
    #[error("identity not set up prior to this entry")]
    IdentityNotReady,

    /// An input address holds less than it tries to spend.
    #[error("insufficient balance: {address} has {have}, needs {need}")]
    InsufficientBalance {
        address: String,
        have: u64,
        need: u64,
    },

    /// A coinbase mint would push `num_issued` past the declared supply.
    #[error("coinbase exceeds max supply")]
    SupplyExceeded,

    /// A transfer references an NF token id that was never minted.
    #[error("no such NFToken{{{0}}}")]
    NoSuchNfToken(u64),

    /// A transfer input does not own the NF token it tries to move.
    #[error("NFToken{{{id}}} not owned by {owner}")]
    NfTokenNotOwned { id: u64, owner: String },

    /// The NF token id was already minted on this chain.
    #[error("NFToken{{{0}}} already minted")]
    NfTokenExists(u64),

    /// The contract is recorded as permanently invalid.
    #[error("invalid contract code")]
    InvalidContract,

    /// Fetching, parsing, compiling or ABI-checking a new contract failed.
    #[error("invalid contract: {0}")]
    ContractSetup(String),

    /// A contract call targeted an address with no contract binding.
    #[error("address is not contract controlled")]
    NotContract,

    /// The called function is not declared by the contract's ABI.
    #[error("contract does not define {0:?}")]
    UndefinedFunc(String),

    /// The Wasm call ran out of its metering budget.
    #[error("execution limit exceeded")]
    ExecLimitExceeded,

    /// The Wasm call trapped for any other reason.
    #[error("contract trap: {0}")]
    Trap(String),
}

impl TxError {
    /// Shorthand for an insufficient-balance rejection on `address`.
    pub fn insufficient(address: &[u8; 32], have: u64, need: u64) -> Self {
        TxError::InsufficientBalance {
            address: hash32_hex(address),
            have,
            need,
        }
    }
}

/// The inner result of the two-channel error discipline: `Ok` is a valid
/// application, `Err` a token-rule rejection. Infrastructure errors wrap
/// this in an outer `Result`.
pub type TxResult<T> = Result<T, TxError>;
