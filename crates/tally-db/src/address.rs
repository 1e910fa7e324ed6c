//! The `address` table and its join tables.
//!
//! Address rows are created lazily on first credit. Row id 1 is reserved at
//! chain creation for the coinbase address. Balance underflow is a
//! token-rule rejection, not a storage error.

use rusqlite::{Connection, OptionalExtension};
use tally_types::{ChainId, RcdHash, TxError, TxResult};

use crate::{blob32, Result};

/// Credit `n` units to `rcd_hash`, creating the row if needed. Returns the
/// address row id.
pub fn add(conn: &Connection, rcd_hash: &RcdHash, n: u64) -> Result<i64> {
    conn.execute(
        "INSERT INTO address (rcd_hash, balance) VALUES (?1, ?2)
         ON CONFLICT(rcd_hash) DO UPDATE SET balance = balance + ?2",
        rusqlite::params![rcd_hash.as_slice(), n as i64],
    )?;
    let id: i64 = conn.query_row(
        "SELECT id FROM address WHERE rcd_hash = ?1",
        [rcd_hash.as_slice()],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Debit `n` units from `rcd_hash`. Underflow (including a missing row)
/// comes back on the transaction channel.
pub fn sub(conn: &Connection, rcd_hash: &RcdHash, n: u64) -> Result<TxResult<i64>> {
    let row = conn
        .query_row(
            "SELECT id, balance FROM address WHERE rcd_hash = ?1",
            [rcd_hash.as_slice()],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;

    let (id, balance) = match row {
        Some(r) => r,
        None => return Ok(Err(TxError::insufficient(rcd_hash, 0, n))),
    };
    if (balance as u64) < n {
        return Ok(Err(TxError::insufficient(rcd_hash, balance as u64, n)));
    }
    let changes = conn.execute(
        "UPDATE address SET balance = balance - ?1 WHERE id = ?2",
        rusqlite::params![n as i64, id],
    )?;
    if changes == 0 {
        panic!("address {id} balance update affected no rows");
    }
    Ok(Ok(id))
}

/// Row id for an address, if it has ever been credited.
pub fn select_id(conn: &Connection, rcd_hash: &RcdHash) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM address WHERE rcd_hash = ?1",
            [rcd_hash.as_slice()],
            |row| row.get(0),
        )
        .optional()?)
}

/// Current balance of an address; unknown addresses hold zero.
pub fn select_balance(conn: &Connection, rcd_hash: &RcdHash) -> Result<u64> {
    let balance: Option<i64> = conn
        .query_row(
            "SELECT balance FROM address WHERE rcd_hash = ?1",
            [rcd_hash.as_slice()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(balance.unwrap_or(0) as u64)
}

/// RCD hash stored at an address row id.
pub fn select_rcd_hash(conn: &Connection, id: i64) -> Result<Option<RcdHash>> {
    conn.query_row(
        "SELECT rcd_hash FROM address WHERE id = ?1",
        [id],
        |row| row.get::<_, Vec<u8>>(0),
    )
    .optional()?
    .map(|bytes| blob32(bytes, "address.rcd_hash"))
    .transpose()
}

/// Link an address to an entry. `to` is true for a credit, false for a
/// debit. Returns the link row id.
pub fn insert_transaction(conn: &Connection, address_id: i64, entry_id: i64, to: bool) -> Result<i64> {
    conn.execute(
        "INSERT INTO address_transactions (address_id, entry_id, \"to\")
         VALUES (?1, ?2, ?3)",
        rusqlite::params![address_id, entry_id, to],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Delegate an address to a contract. Calls on the address will execute the
/// contract's code from then on.
pub fn insert_contract(
    conn: &Connection,
    address_id: i64,
    contract_id: i64,
    chain_id: &ChainId,
) -> Result<()> {
    conn.execute(
        "INSERT INTO address_contracts (address_id, contract_id, chain_id)
         VALUES (?1, ?2, ?3)",
        rusqlite::params![address_id, contract_id, chain_id.as_slice()],
    )?;
    Ok(())
}

/// The contract an address is delegated to, if any.
pub fn select_contract(conn: &Connection, address_id: i64) -> Result<Option<(i64, ChainId)>> {
    conn.query_row(
        "SELECT contract_id, chain_id FROM address_contracts WHERE address_id = ?1",
        [address_id],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
    )
    .optional()?
    .map(|(id, chain_id)| Ok((id, blob32(chain_id, "address_contracts.chain_id")?)))
    .transpose()
}
