//! Contract delegation, contract calls, and store-wide contract integrity.
//!
//! A contract is ingested the first time a transaction delegates to its
//! data-store chain: fetched through the block client, hash-verified
//! against its manifest, compiled with metering, ABI-checked, and cached in
//! serialized form. Any failure along that path rejects the transaction
//! *and* pins the contract as permanently invalid, so later delegations
//! fail fast without refetching.

use rusqlite::Connection;
use tracing::debug;

use tally_db::{address, contract as contract_table, DbError};
use tally_fat::{fat104, fat107};
use tally_runtime::{Runtime, RuntimeError, StateAccessor};
use tally_types::{ChainId, Entry, RcdHash, TxError, TxResult};

use crate::chain::ChainState;
use crate::client::BlockClient;
use crate::sync::Cancel;
use crate::{Error, Result};

/// A contract that failed ingestion, queued for persistence after the
/// failing transaction's savepoint rolls back.
pub(crate) struct PendingInvalidContract {
    pub first_entry: Entry,
    pub wasm: Vec<u8>,
}

/// Persist a failed contract as an invalid row.
pub(crate) fn insert_invalid(conn: &Connection, pending: &PendingInvalidContract) -> Result<()> {
    contract_table::insert(conn, &pending.first_entry, &pending.wasm, None, None)?;
    Ok(())
}

/// Delegate `address_id` to the contract stored on `con_chain_id`,
/// ingesting the contract if this chain has never seen it.
pub(crate) fn delegate(
    conn: &Connection,
    state: &mut ChainState,
    client: &dyn BlockClient,
    runtime: &Runtime,
    cancel: &Cancel,
    address_id: i64,
    con_chain_id: &ChainId,
) -> Result<TxResult<()>> {
    let con_id = match contract_table::select_valid(conn, con_chain_id)? {
        Some((false, _)) => return Ok(Err(TxError::InvalidContract)),
        Some((true, con_id)) => con_id,
        None => {
            match ingest(conn, state, client, runtime, cancel, con_chain_id)? {
                Err(tx_err) => return Ok(Err(tx_err)),
                Ok(con_id) => con_id,
            }
        }
    };
    address::insert_contract(conn, address_id, con_id, con_chain_id)?;
    Ok(Ok(()))
}

/// Fetch, verify, compile and store a contract seen for the first time.
fn ingest(
    conn: &Connection,
    state: &mut ChainState,
    client: &dyn BlockClient,
    runtime: &Runtime,
    cancel: &Cancel,
    con_chain_id: &ChainId,
) -> Result<TxResult<i64>> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    // Lookup failures reject the delegating transaction; nothing can be
    // pinned because there is no manifest to pin.
    let src = match client.contract_source(con_chain_id) {
        Err(e) => return Ok(Err(TxError::ContractSetup(format!("lookup: {e}")))),
        Ok(src) => src,
    };
    if src.first_entry.chain_id != *con_chain_id {
        return Ok(Err(TxError::ContractSetup(
            "manifest entry is on the wrong chain".to_string(),
        )));
    }

    // From here on the manifest entry is known, so a failed contract is
    // pinned invalid once the failing transaction rolls back.
    let mut reject = |tx_err: TxError| -> TxResult<i64> {
        state.pending_invalid_contract = Some(PendingInvalidContract {
            first_entry: src.first_entry.clone(),
            wasm: src.wasm.clone(),
        });
        Err(tx_err)
    };

    let manifest = match fat107::Manifest::parse_entry(&src.first_entry) {
        Err(tx_err) => return Ok(reject(tx_err)),
        Ok(manifest) => manifest,
    };
    if let Err(tx_err) = manifest.verify(&src.wasm) {
        return Ok(reject(tx_err));
    }
    let module = match runtime.compile(&src.wasm) {
        Err(tx_err) => return Ok(reject(tx_err)),
        Ok(module) => module,
    };
    if let Err(tx_err) = runtime.validate_abi(&module, &manifest.abi) {
        return Ok(reject(tx_err));
    }

    let compiled = runtime.serialize(&module)?;
    let con_id = contract_table::insert(
        conn,
        &src.first_entry,
        &src.wasm,
        Some(&manifest.abi_json),
        Some(&compiled),
    )?;
    debug!(contract = %tally_types::hash32_hex(con_chain_id), "contract ingested");
    Ok(Ok(con_id))
}

/// Execute a contract call against a bound output address. The applier's
/// cancellation signal reaches the guest through the VM's metering hooks.
pub(crate) fn call(
    conn: &Connection,
    state: &ChainState,
    runtime: &Runtime,
    cancel: &Cancel,
    address_id: i64,
    entry_id: i64,
    func_name: &str,
    args: &[i64],
) -> Result<TxResult<()>> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let (con_id, _) = match address::select_contract(conn, address_id)? {
        None => return Ok(Err(TxError::NotContract)),
        Some(binding) => binding,
    };
    let row = contract_table::select_by_id(conn, con_id)?
        .ok_or_else(|| Error::Invariant(format!("bound contract {con_id} missing")))?;
    if !row.valid {
        return Ok(Err(TxError::InvalidContract));
    }
    let wasm = row
        .wasm
        .ok_or_else(|| Error::Invariant(format!("valid contract {con_id} has no wasm")))?;

    let module = runtime.load(row.compiled.as_deref(), &wasm)?;
    if row.compiled.is_none() {
        contract_table::cache(conn, con_id, &runtime.serialize(&module)?)?;
    }

    let abi_json = contract_table::select_abi(conn, con_id)?
        .ok_or_else(|| Error::Invariant(format!("valid contract {con_id} has no abi")))?;
    let abi = fat104::parse_abi(&abi_json)
        .map_err(|e| Error::Invariant(format!("stored abi unparseable: {e}")))?;
    let func = match abi.get(func_name) {
        None => return Ok(Err(TxError::UndefinedFunc(func_name.to_string()))),
        Some(func) => func,
    };

    let caller_rcd = address::select_rcd_hash(conn, address_id)?
        .ok_or_else(|| Error::Invariant(format!("address row {address_id} missing")))?;
    let mut accessor = ChainStateAccessor {
        conn,
        chain_id: state.id,
        contract_id: con_id,
        caller_rcd,
        entry_id,
        infra: None,
    };
    let outcome = match runtime.call(
        &module,
        func_name,
        func,
        args,
        &mut accessor,
        cancel,
        state.exec_limit,
    ) {
        Err(RuntimeError::Cancelled) => return Err(Error::Cancelled),
        Err(e) => return Err(e.into()),
        Ok(outcome) => outcome,
    };
    if let Some(db_err) = accessor.infra {
        return Err(db_err.into());
    }
    match outcome {
        Err(tx_err) => Ok(Err(tx_err)),
        Ok(out) => {
            debug!(func = func_name, fuel_used = out.fuel_used, "contract call");
            Ok(Ok(()))
        }
    }
}

/// Chain state as exposed to the guest. Storage failures are parked in
/// `infra` and re-raised on the infrastructure channel after the call;
/// token-rule failures surface as traps and reject the transaction.
struct ChainStateAccessor<'c> {
    conn: &'c Connection,
    chain_id: ChainId,
    contract_id: i64,
    caller_rcd: RcdHash,
    entry_id: i64,
    infra: Option<DbError>,
}

impl ChainStateAccessor<'_> {
    fn park<T>(&mut self, result: tally_db::Result<T>) -> std::result::Result<T, String> {
        result.map_err(|e| {
            let msg = e.to_string();
            self.infra = Some(e);
            msg
        })
    }
}

impl StateAccessor for ChainStateAccessor<'_> {
    fn chain_id(&self) -> [u8; 32] {
        self.chain_id
    }

    fn kv_get(&mut self, key: &[u8]) -> std::result::Result<Option<Vec<u8>>, String> {
        let result = contract_table::kv_get(self.conn, self.contract_id, key);
        self.park(result)
    }

    fn kv_set(&mut self, key: &[u8], value: &[u8]) -> std::result::Result<(), String> {
        let result = contract_table::kv_set(self.conn, self.contract_id, key, value);
        self.park(result)
    }

    fn transfer(&mut self, to: &[u8; 32], amount: u64) -> std::result::Result<(), String> {
        let caller_rcd = self.caller_rcd;
        let from_id = match self.park(address::sub(self.conn, &caller_rcd, amount))? {
            Err(tx_err) => return Err(tx_err.to_string()),
            Ok(id) => id,
        };
        let to_id = self.park(address::add(self.conn, to, amount))?;
        let entry_id = self.entry_id;
        self.park(address::insert_transaction(self.conn, from_id, entry_id, false))?;
        self.park(address::insert_transaction(self.conn, to_id, entry_id, true))?;
        Ok(())
    }
}

/// Re-verify every valid stored contract against its manifest: the first
/// entry must found its chain id, and the stored Wasm must match the
/// declared size and hash. Corruption is an infrastructure error. Rows
/// marked invalid are skipped: their stored material legitimately fails
/// these checks, and the invalid flag is sticky either way.
pub fn validate(conn: &Connection) -> Result<()> {
    for (id, chain_id, first_entry, wasm) in contract_table::select_all_for_validation(conn)? {
        let valid: bool = conn
            .query_row("SELECT valid FROM contract WHERE id = ?1", [id], |row| row.get(0))
            .map_err(DbError::Sqlite)?;
        if !valid {
            continue;
        }
        let entry = Entry::unmarshal_binary(&first_entry)
            .map_err(|e| Error::Invariant(format!("contract {id}: first entry: {e}")))?;
        if entry.chain_id != chain_id || entry.derived_chain_id() != chain_id {
            return Err(Error::Invariant(format!(
                "contract {id}: first entry does not found its chain"
            )));
        }
        let manifest = fat107::Manifest::parse_entry(&entry).map_err(|e| {
            Error::Invariant(format!("contract {id}: manifest unparseable: {e}"))
        })?;
        let wasm =
            wasm.ok_or_else(|| Error::Invariant(format!("contract {id}: wasm missing")))?;
        if manifest.verify(&wasm).is_err() {
            return Err(Error::Invariant(format!(
                "contract {id}: wasm blob does not match manifest"
            )));
        }
    }
    Ok(())
}
