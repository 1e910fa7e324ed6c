//! Read API adapter: balance, transaction, NF-token and issuance queries
//! served from a chain's read-only pool.

use tally_db::{address, entry, metadata, nftoken};
use tally_types::{EntryHash, KeyMr, RcdHash};

use crate::sync::ChainHandle;
use crate::{Error, Result};

/// Filters and pagination for [`get_transactions`].
#[derive(Debug, Clone)]
pub struct TxQuery {
    /// Restrict to entries that credited or debited this address.
    pub address: Option<RcdHash>,
    pub page: u64,
    pub limit: u64,
    pub ascending: bool,
}

impl Default for TxQuery {
    fn default() -> Self {
        Self {
            address: None,
            page: 0,
            limit: 25,
            ascending: true,
        }
    }
}

/// Ownership and metadata of one NF token.
#[derive(Debug, Clone)]
pub struct NfTokenRecord {
    pub id: u64,
    pub owner: RcdHash,
    pub creation_entry_hash: EntryHash,
    pub metadata: Option<Vec<u8>>,
}

/// Aggregate chain statistics.
#[derive(Debug, Clone)]
pub struct Stats {
    pub sync_height: u32,
    pub sync_db_key_mr: KeyMr,
    pub num_issued: u64,
    pub entries: i64,
    pub valid_entries: i64,
}

/// Current balance of an address; unknown addresses hold zero.
pub async fn get_balance(handle: &ChainHandle, rcd_hash: &RcdHash) -> Result<u64> {
    let conn = handle.pool.get().await;
    Ok(address::select_balance(&conn, rcd_hash)?)
}

/// The valid transaction entry with this content hash, if any.
pub async fn get_transaction(
    handle: &ChainHandle,
    hash: &EntryHash,
) -> Result<Option<entry::EntryRow>> {
    let conn = handle.pool.get().await;
    Ok(entry::select_valid_by_hash(&conn, hash)?)
}

/// Page through valid transaction entries.
pub async fn get_transactions(handle: &ChainHandle, q: &TxQuery) -> Result<Vec<entry::EntryRow>> {
    let conn = handle.pool.get().await;
    let address_id = match &q.address {
        None => None,
        Some(rcd_hash) => match address::select_id(&conn, rcd_hash)? {
            // An address the chain never saw has no transactions.
            None => return Ok(Vec::new()),
            id => id,
        },
    };
    Ok(entry::select_valid_paginated(
        &conn, address_id, q.page, q.limit, q.ascending,
    )?)
}

/// Ownership and metadata of an NF token.
pub async fn get_nf_token(handle: &ChainHandle, nf_id: u64) -> Result<Option<NfTokenRecord>> {
    let conn = handle.pool.get().await;
    let row = match nftoken::select(&conn, nf_id)? {
        None => return Ok(None),
        Some(row) => row,
    };
    let owner = address::select_rcd_hash(&conn, row.owner_id)?
        .ok_or_else(|| Error::Invariant(format!("nf token {nf_id} owner row missing")))?;
    let creation = entry::select_by_id(&conn, row.creation_entry_id)?
        .ok_or_else(|| Error::Invariant(format!("nf token {nf_id} creation entry missing")))?;
    Ok(Some(NfTokenRecord {
        id: row.id,
        owner,
        creation_entry_hash: creation.hash,
        metadata: row.metadata,
    }))
}

/// The accepted issuance entry, if the chain has issued.
pub async fn get_issuance(handle: &ChainHandle) -> Result<Option<entry::EntryRow>> {
    let conn = handle.pool.get().await;
    let md = metadata::select(&conn)?;
    match md.init_entry_id {
        None => Ok(None),
        Some(init_id) => Ok(entry::select_by_id(&conn, init_id)?),
    }
}

/// Aggregate statistics for a chain.
pub async fn get_stats(handle: &ChainHandle) -> Result<Stats> {
    let conn = handle.pool.get().await;
    let md = metadata::select(&conn)?;
    let (entries, valid_entries) = entry::counts(&conn)?;
    Ok(Stats {
        sync_height: md.sync_height,
        sync_db_key_mr: md.sync_db_key_mr,
        num_issued: md.num_issued,
        entries,
        valid_entries,
    })
}
