//! A tracked token chain: its store, its in-memory head state, and the
//! appliers that replay entry blocks into it.
//!
//! Transactional discipline: each entry block is applied under an outer
//! savepoint released only on full success; each entry's token effects run
//! under an inner savepoint that is rolled back on a token-rule rejection
//! while the entry row itself stays behind with `valid = 0`.

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use tracing::{debug, info, info_span, warn, Span};

use tally_db::{address, eblock, entry, metadata, ReadPool, Savepoint};
use tally_fat::{fat0, fat1, Issuance, TokenType};
use tally_types::{
    ChainId, EBlock, Entry, Identity, KeyMr, NetworkId, TxError, TxResult, COINBASE_RCD_HASH,
    READ_POOL_SIZE,
};

use crate::client::BlockClient;
use crate::contract::{self, PendingInvalidContract};
use crate::sync::{Cancel, ChainHandle};
use crate::{ClientError, Error, Result};

/// Default per-call fuel budget for contract execution.
pub const DEFAULT_EXEC_LIMIT: u64 = 10_000_000;

/// The in-memory mirror of a chain's metadata and issuance state.
pub struct ChainState {
    pub id: ChainId,
    pub token_id: String,
    pub issuer_chain_id: ChainId,
    pub network_id: NetworkId,
    pub head: Option<eblock::EBlockRow>,
    pub sync_height: u32,
    pub sync_db_key_mr: KeyMr,
    pub identity: Option<Identity>,
    /// Set once the issuance entry has been seen and validated.
    pub issuance: Option<Issuance>,
    pub num_issued: u64,
    /// Fuel budget handed to each contract call.
    pub exec_limit: u64,
    /// A contract that failed ingestion during the current entry. Written
    /// back as an invalid row after the inner savepoint rolls back, so the
    /// rejection outlives the rejected transaction.
    pub(crate) pending_invalid_contract: Option<PendingInvalidContract>,
}

/// A tracked chain and its exclusive store handles.
pub struct Chain {
    pub(crate) conn: Connection,
    pool: Arc<ReadPool>,
    client: Arc<dyn BlockClient>,
    runtime: Arc<tally_runtime::Runtime>,
    span: Span,
    pub state: ChainState,
}

impl Chain {
    /// Create a fresh chain store from its first entry block and apply it.
    ///
    /// The first entry's name IDs determine the token id and issuer; the
    /// coinbase address is forced to row id 1 before any entry applies.
    pub fn create(
        dir: &Path,
        client: Arc<dyn BlockClient>,
        runtime: Arc<tally_runtime::Runtime>,
        db_key_mr: &KeyMr,
        eb: &EBlock,
        network_id: NetworkId,
    ) -> Result<Chain> {
        let first = eb
            .entries
            .first()
            .ok_or_else(|| Error::Invariant("first entry block has no entries".to_string()))?;
        let (token_id, issuer_chain_id) = tally_fat::parse_token_name_ids(&first.ext_ids)
            .ok_or_else(|| Error::Invariant("invalid token chain name IDs".to_string()))?;
        if first.derived_chain_id() != eb.chain_id {
            return Err(Error::Invariant(
                "first entry does not found this chain".to_string(),
            ));
        }

        let path = dir.join(tally_db::chain_file_name(&eb.chain_id));
        if path.exists() {
            return Err(Error::Invariant(format!("already exists: {}", path.display())));
        }

        let span = info_span!("chain", id = %tally_types::hash32_hex(&eb.chain_id));
        let _guard = span.clone().entered();
        info!(%token_id, "creating chain store");

        let conn = tally_db::open(&path)?;
        let pool = ReadPool::open(&path, READ_POOL_SIZE)?;

        metadata::insert(&conn, eb.height, db_key_mr, &network_id, None)?;
        let coinbase = address::add(&conn, &COINBASE_RCD_HASH, 0)?;
        if coinbase != 1 {
            panic!("coinbase address row id is {coinbase}, expected 1");
        }

        let mut chain = Chain {
            conn,
            pool,
            client,
            runtime,
            span: span.clone(),
            state: ChainState {
                id: eb.chain_id,
                token_id,
                issuer_chain_id,
                network_id,
                head: None,
                sync_height: eb.height,
                sync_db_key_mr: *db_key_mr,
                identity: None,
                issuance: None,
                num_issued: 0,
                exec_limit: DEFAULT_EXEC_LIMIT,
                pending_invalid_contract: None,
            },
        };

        // The identity may already exist; tolerate its absence.
        chain.update_sidechain_data()?;
        chain.apply_eblock(db_key_mr, eb, &Cancel::new())?;
        Ok(chain)
    }

    /// Open an existing chain store and load its metadata.
    pub fn open(
        dir: &Path,
        file_name: &str,
        client: Arc<dyn BlockClient>,
        runtime: Arc<tally_runtime::Runtime>,
    ) -> Result<Chain> {
        let path = dir.join(file_name);
        let conn = tally_db::open(&path)?;
        let pool = ReadPool::open(&path, READ_POOL_SIZE)?;

        let first = entry::select_by_id(&conn, 1)?
            .ok_or_else(|| Error::Invariant("no first entry".to_string()))?
            .entry()?;
        let (token_id, issuer_chain_id) = tally_fat::parse_token_name_ids(&first.ext_ids)
            .ok_or_else(|| Error::Invariant("invalid token chain name IDs".to_string()))?;
        let id = first.chain_id;

        let head = eblock::select_latest(&conn)?
            .ok_or_else(|| Error::Invariant("no entry block in store".to_string()))?;

        let md = metadata::select(&conn)?;
        if let Some(identity) = &md.identity {
            if identity.chain_id != issuer_chain_id {
                return Err(Error::Invariant(
                    "stored identity does not belong to the issuer".to_string(),
                ));
            }
        }

        // Re-validate the stored issuance entry; a store that accepted one
        // must still accept it.
        let issuance = match md.init_entry_id {
            None => None,
            Some(init_id) => {
                let identity = md.identity.as_ref().ok_or_else(|| {
                    Error::Invariant("issuance recorded without identity".to_string())
                })?;
                let row = entry::select_by_id(&conn, init_id)?
                    .ok_or_else(|| Error::Invariant("missing issuance entry".to_string()))?;
                let iss = Issuance::from_entry(&row.entry()?, &identity.id1_key)
                    .map_err(|e| Error::Invariant(format!("stored issuance invalid: {e}")))?;
                Some(iss)
            }
        };

        let span = info_span!("chain", id = %tally_types::hash32_hex(&id));
        span.in_scope(|| {
            debug!(
                %token_id,
                sync_height = md.sync_height,
                num_issued = md.num_issued,
                "opened chain store"
            );
        });

        Ok(Chain {
            conn,
            pool,
            client,
            runtime,
            span,
            state: ChainState {
                id,
                token_id,
                issuer_chain_id,
                network_id: md.network_id,
                head: Some(head),
                sync_height: md.sync_height,
                sync_db_key_mr: md.sync_db_key_mr,
                identity: md.identity,
                issuance,
                num_issued: md.num_issued,
                exec_limit: DEFAULT_EXEC_LIMIT,
                pending_invalid_contract: None,
            },
        })
    }

    /// A shareable read-side handle for the RPC surface.
    pub fn handle(&self) -> Arc<ChainHandle> {
        Arc::new(ChainHandle {
            id: self.state.id,
            token_id: self.state.token_id.clone(),
            issuer_chain_id: self.state.issuer_chain_id,
            network_id: self.state.network_id,
            pool: Arc::clone(&self.pool),
        })
    }

    /// Refresh the issuer identity from the node. A missing identity chain
    /// is tolerated; the chain simply stays without one.
    pub fn update_sidechain_data(&mut self) -> Result<()> {
        let issuer = self.state.issuer_chain_id;
        match self.client.identity(&issuer) {
            Err(ClientError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
            Ok(identity) => {
                if self.state.identity.as_ref() == Some(&identity) {
                    return Ok(());
                }
                metadata::update_identity(&self.conn, &identity)?;
                self.state.identity = Some(identity);
                Ok(())
            }
        }
    }

    /// Apply one entry block atomically: either every row it implies
    /// becomes visible, or none of them do.
    pub fn apply_eblock(&mut self, db_key_mr: &KeyMr, eb: &EBlock, cancel: &Cancel) -> Result<()> {
        let span = self.span.clone();
        let _guard = span.entered();

        if eb.chain_id != self.state.id {
            return Err(Error::Invariant("entry block from another chain".to_string()));
        }
        match &self.state.head {
            Some(head) => {
                if eb.height <= self.state.sync_height {
                    return Err(Error::Invariant(format!(
                        "entry block height {} not above sync height {}",
                        eb.height, self.state.sync_height
                    )));
                }
                if eb.prev_key_mr != head.key_mr {
                    return Err(Error::Invariant(
                        "entry block does not extend the chain head".to_string(),
                    ));
                }
            }
            None => {
                if !eb.is_first() {
                    return Err(Error::Invariant(
                        "chain store is empty but entry block has a predecessor".to_string(),
                    ));
                }
            }
        }

        let conn = &self.conn;
        let state = &mut self.state;
        let sp = Savepoint::new(conn, "sp_eblock")?;
        let eb_seq = eblock::insert(conn, eb, db_key_mr)?;
        for e in &eb.entries {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match apply_entry(
                conn,
                state,
                self.client.as_ref(),
                &self.runtime,
                cancel,
                eb_seq,
                e,
            ) {
                Ok(Ok(e_id)) => debug!(entry = e_id, "entry applied"),
                Ok(Err(tx_err)) => {
                    debug!(hash = %tally_types::hash32_hex(&e.hash()), %tx_err, "entry rejected")
                }
                Err(e) => return Err(e),
            }
        }
        metadata::set_sync(conn, eb.height, db_key_mr)?;
        sp.commit()?;

        state.head = Some(eblock::EBlockRow {
            seq: eb_seq,
            key_mr: eb.key_mr,
            height: eb.height,
            db_key_mr: *db_key_mr,
            timestamp: eb.timestamp,
        });
        state.sync_height = eb.height;
        state.sync_db_key_mr = *db_key_mr;
        info!(height = eb.height, entries = eb.entries.len(), "entry block applied");
        Ok(())
    }

    /// Advance the sync watermark for a directory block that carried no
    /// entry block for this chain. Stale heights are a no-op.
    pub fn set_sync(&mut self, height: u32, db_key_mr: &KeyMr) -> Result<()> {
        if height <= self.state.sync_height {
            return Ok(());
        }
        metadata::set_sync(&self.conn, height, db_key_mr)?;
        self.state.sync_height = height;
        self.state.sync_db_key_mr = *db_key_mr;
        Ok(())
    }

    /// Re-verify every valid stored contract's hashes against its manifest.
    pub fn validate_contracts(&self) -> Result<()> {
        contract::validate(&self.conn)
    }

    /// Drop the serialized-module cache for every contract. Needed after a
    /// runtime upgrade changes the serialization format; modules recompile
    /// and re-cache on their next call.
    pub fn clear_contract_cache(&self) -> Result<()> {
        tally_db::contract::clear_compiled_cache(&self.conn)?;
        Ok(())
    }

    /// Close the store. The read pool goes first so the write connection
    /// can reclaim the WAL and SHM sidecars on its way out.
    pub fn close(self) {
        drop(self.pool);
        if let Err((_conn, e)) = self.conn.close() {
            self.span.in_scope(|| warn!("closing write connection: {e}"));
        }
    }
}

/// What a successfully applied entry did, for the in-memory mirror.
enum EntryEffect {
    Issuance(Issuance),
    Minted(u64),
}

/// Apply one entry: insert its row, then run the token state machine under
/// an inner savepoint. Returns the entry row id on the inner channel.
fn apply_entry(
    conn: &Connection,
    state: &mut ChainState,
    client: &dyn BlockClient,
    runtime: &tally_runtime::Runtime,
    cancel: &Cancel,
    eb_seq: i64,
    e: &Entry,
) -> Result<TxResult<i64>> {
    let e_id = entry::insert(conn, eb_seq, e)?;

    let sp = Savepoint::new(conn, "sp_entry")?;
    let outcome = if state.issuance.is_none() {
        apply_issuance(state, e).map(|r| r.map(EntryEffect::Issuance))
    } else {
        apply_tx(conn, state, client, runtime, cancel, e_id, e)
            .map(|r| r.map(EntryEffect::Minted))
    };

    match outcome {
        Err(err) => {
            // Infrastructure: discard the inner savepoint; the caller
            // discards the outer one.
            drop(sp);
            state.pending_invalid_contract = None;
            Err(err)
        }
        Ok(Err(tx_err)) => {
            sp.rollback()?;
            // A contract that failed ingestion stays rejected even though
            // the transaction that carried it rolled back.
            if let Some(pending) = state.pending_invalid_contract.take() {
                contract::insert_invalid(conn, &pending)?;
            }
            Ok(Err(tx_err))
        }
        Ok(Ok(effect)) => {
            match effect {
                EntryEffect::Issuance(issuance) => {
                    metadata::set_init_entry_id(conn, e_id)?;
                    state.issuance = Some(issuance);
                    state.num_issued = 0;
                }
                EntryEffect::Minted(0) => {}
                EntryEffect::Minted(minted) => {
                    metadata::add_num_issued(conn, minted)?;
                    state.num_issued += minted;
                }
            }
            sp.commit()?;
            state.pending_invalid_contract = None;
            Ok(Ok(e_id))
        }
    }
}

/// Validate an issuance entry. The identity must exist and predate the
/// entry (inclusive at equal block timestamps).
fn apply_issuance(state: &ChainState, e: &Entry) -> Result<TxResult<Issuance>> {
    let identity = match &state.identity {
        None => return Ok(Err(TxError::IdentityNotReady)),
        Some(identity) => identity,
    };
    if e.timestamp < identity.timestamp {
        return Ok(Err(TxError::IdentityNotReady));
    }
    Ok(Issuance::from_entry(e, &identity.id1_key))
}

/// The shared transaction prelude: replay protection, dispatch by token
/// type, and the final `valid` flip. Returns the minted amount.
fn apply_tx(
    conn: &Connection,
    state: &mut ChainState,
    client: &dyn BlockClient,
    runtime: &tally_runtime::Runtime,
    cancel: &Cancel,
    e_id: i64,
    e: &Entry,
) -> Result<TxResult<u64>> {
    if !entry::check_uniquely_valid(conn, e_id, &e.hash())? {
        return Ok(Err(TxError::Replay));
    }

    let token_type = match &state.issuance {
        Some(issuance) => issuance.token_type,
        // apply_tx is only dispatched once the issuance is recorded.
        None => panic!("transaction dispatch without issuance"),
    };
    let minted = match token_type {
        TokenType::Fat0 => apply_fat0_tx(conn, state, client, runtime, cancel, e_id, e)?,
        TokenType::Fat1 => apply_fat1_tx(conn, state, e_id, e)?,
    };
    let minted = match minted {
        Err(tx_err) => return Ok(Err(tx_err)),
        Ok(minted) => minted,
    };

    entry::set_valid(conn, e_id)?;
    Ok(Ok(minted))
}

fn identity_key(state: &ChainState) -> Result<[u8; 32]> {
    state
        .identity
        .as_ref()
        .map(|identity| identity.id1_key)
        .ok_or_else(|| Error::Invariant("issuance present but identity missing".to_string()))
}

/// Whether a coinbase mint of `add` units fits under the declared supply.
fn supply_allows(state: &ChainState, add: u64) -> bool {
    let supply = state
        .issuance
        .as_ref()
        .map(|issuance| issuance.supply)
        .unwrap_or(-1);
    supply <= 0 || state.num_issued + add <= supply as u64
}

fn apply_fat0_tx(
    conn: &Connection,
    state: &mut ChainState,
    client: &dyn BlockClient,
    runtime: &tally_runtime::Runtime,
    cancel: &Cancel,
    e_id: i64,
    e: &Entry,
) -> Result<TxResult<u64>> {
    let id1_key = identity_key(state)?;
    let tx = match fat0::Transaction::from_entry(e, &id1_key) {
        Err(tx_err) => return Ok(Err(tx_err)),
        Ok(tx) => tx,
    };

    let mut minted = 0;
    if tx.is_coinbase() {
        let add = tx.inputs[&COINBASE_RCD_HASH];
        if !supply_allows(state, add) {
            return Ok(Err(TxError::SupplyExceeded));
        }
        minted = add;
        address::insert_transaction(conn, 1, e_id, false)?;
    } else {
        for (adr, &amount) in &tx.inputs {
            let ai = match address::sub(conn, adr, amount)? {
                Err(tx_err) => return Ok(Err(tx_err)),
                Ok(ai) => ai,
            };
            address::insert_transaction(conn, ai, e_id, false)?;
        }
    }

    for (adr, &amount) in &tx.outputs {
        let ai = address::add(conn, adr, amount)?;
        address::insert_transaction(conn, ai, e_id, true)?;

        if let Some(con_chain_id) = tx.contract {
            if let Err(tx_err) =
                contract::delegate(conn, state, client, runtime, cancel, ai, &con_chain_id)?
            {
                return Ok(Err(tx_err));
            }
        } else if let Some(func) = &tx.func {
            if let Err(tx_err) =
                contract::call(conn, state, runtime, cancel, ai, e_id, func, &tx.args)?
            {
                return Ok(Err(tx_err));
            }
        }
    }

    Ok(Ok(minted))
}

fn apply_fat1_tx(
    conn: &Connection,
    state: &mut ChainState,
    e_id: i64,
    e: &Entry,
) -> Result<TxResult<u64>> {
    let id1_key = identity_key(state)?;
    let tx = match fat1::Transaction::from_entry(e, &id1_key) {
        Err(tx_err) => return Ok(Err(tx_err)),
        Ok(tx) => tx,
    };

    let mut minted = 0;
    if tx.is_coinbase() {
        let nf_ids = &tx.inputs[&COINBASE_RCD_HASH];
        let add = nf_ids.len() as u64;
        if !supply_allows(state, add) {
            return Ok(Err(TxError::SupplyExceeded));
        }
        minted = add;
        let adr_tx_id = address::insert_transaction(conn, 1, e_id, false)?;
        for &nf_id in nf_ids {
            if let Err(tx_err) = tally_db::nftoken::insert(conn, nf_id, 1, e_id)? {
                return Ok(Err(tx_err));
            }
            tally_db::nftoken::insert_transaction(conn, nf_id, adr_tx_id)?;
            if let Some(metadata) = tx.token_metadata.get(&nf_id) {
                let bytes = serde_json::to_vec(metadata)
                    .map_err(|err| Error::Invariant(format!("token metadata: {err}")))?;
                tally_db::nftoken::set_metadata(conn, nf_id, &bytes)?;
            }
        }
    } else {
        for (adr, nf_ids) in &tx.inputs {
            let ai = match address::sub(conn, adr, nf_ids.len() as u64)? {
                Err(tx_err) => return Ok(Err(tx_err)),
                Ok(ai) => ai,
            };
            let adr_tx_id = address::insert_transaction(conn, ai, e_id, false)?;
            for &nf_id in nf_ids {
                match tally_db::nftoken::select_owner_id(conn, nf_id)? {
                    None => return Ok(Err(TxError::NoSuchNfToken(nf_id))),
                    Some(owner) if owner != ai => {
                        return Ok(Err(TxError::NfTokenNotOwned {
                            id: nf_id,
                            owner: tally_types::hash32_hex(adr),
                        }))
                    }
                    Some(_) => {}
                }
                tally_db::nftoken::insert_transaction(conn, nf_id, adr_tx_id)?;
            }
        }
    }

    for (adr, nf_ids) in &tx.outputs {
        let ai = address::add(conn, adr, nf_ids.len() as u64)?;
        let adr_tx_id = address::insert_transaction(conn, ai, e_id, true)?;
        for &nf_id in nf_ids {
            tally_db::nftoken::set_owner(conn, nf_id, ai)?;
            tally_db::nftoken::insert_transaction(conn, nf_id, adr_tx_id)?;
        }
    }

    Ok(Ok(minted))
}
