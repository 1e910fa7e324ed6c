//! The `nf_token` table and its transaction join table.

use rusqlite::{Connection, OptionalExtension};
use tally_types::{TxError, TxResult};

use crate::Result;

/// A stored NF token row, as surfaced by the read API.
#[derive(Debug, Clone)]
pub struct NfTokenRow {
    pub id: u64,
    pub owner_id: i64,
    pub creation_entry_id: i64,
    pub metadata: Option<Vec<u8>>,
}

/// Mint an NF token. Each id may be minted at most once per chain; a second
/// mint comes back on the transaction channel.
pub fn insert(conn: &Connection, nf_id: u64, owner_id: i64, entry_id: i64) -> Result<TxResult<()>> {
    let result = conn.execute(
        "INSERT INTO nf_token (id, owner_id, creation_entry_id) VALUES (?1, ?2, ?3)",
        rusqlite::params![nf_id as i64, owner_id, entry_id],
    );
    match result {
        Ok(_) => Ok(Ok(())),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Ok(Err(TxError::NfTokenExists(nf_id)))
        }
        Err(e) => Err(e.into()),
    }
}

/// Current owner's address row id, or `None` if the id was never minted.
pub fn select_owner_id(conn: &Connection, nf_id: u64) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT owner_id FROM nf_token WHERE id = ?1",
            [nf_id as i64],
            |row| row.get(0),
        )
        .optional()?)
}

/// Move ownership to another address row.
pub fn set_owner(conn: &Connection, nf_id: u64, owner_id: i64) -> Result<()> {
    let changes = conn.execute(
        "UPDATE nf_token SET owner_id = ?1 WHERE id = ?2",
        rusqlite::params![owner_id, nf_id as i64],
    )?;
    if changes == 0 {
        panic!("nf_token {nf_id} owner update affected no rows");
    }
    Ok(())
}

/// Attach metadata bytes to a minted token.
pub fn set_metadata(conn: &Connection, nf_id: u64, metadata: &[u8]) -> Result<()> {
    let changes = conn.execute(
        "UPDATE nf_token SET metadata = ?1 WHERE id = ?2",
        rusqlite::params![metadata, nf_id as i64],
    )?;
    if changes == 0 {
        panic!("nf_token {nf_id} metadata update affected no rows");
    }
    Ok(())
}

/// Record that an address-transaction touched this token.
pub fn insert_transaction(conn: &Connection, nf_id: u64, address_tx_id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO nf_token_transactions (nf_token_id, address_transaction_id)
         VALUES (?1, ?2)",
        rusqlite::params![nf_id as i64, address_tx_id],
    )?;
    Ok(())
}

/// Full row for the read API.
pub fn select(conn: &Connection, nf_id: u64) -> Result<Option<NfTokenRow>> {
    Ok(conn
        .query_row(
            "SELECT id, owner_id, creation_entry_id, metadata FROM nf_token WHERE id = ?1",
            [nf_id as i64],
            |row| {
                Ok(NfTokenRow {
                    id: row.get::<_, i64>(0)? as u64,
                    owner_id: row.get(1)?,
                    creation_entry_id: row.get(2)?,
                    metadata: row.get(3)?,
                })
            },
        )
        .optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Coinbase address plus one eblock/entry pair to satisfy foreign keys.
    fn seed(conn: &Connection) -> (i64, i64) {
        let coinbase = crate::address::add(conn, &tally_types::COINBASE_RCD_HASH, 0).expect("cb");
        let eb = tally_types::EBlock {
            chain_id: [1u8; 32],
            key_mr: [2u8; 32],
            prev_key_mr: [0u8; 32],
            height: 0,
            timestamp: 1,
            entries: vec![],
        };
        let eb_seq = crate::eblock::insert(conn, &eb, &[3u8; 32]).expect("eblock");
        let e = tally_types::Entry::new([1u8; 32], vec![], b"mint".to_vec());
        let entry_id = crate::entry::insert(conn, eb_seq, &e).expect("entry");
        (coinbase, entry_id)
    }

    #[test]
    fn test_mint_select_roundtrip() {
        let conn = crate::open_memory().expect("open");
        let (coinbase, entry_id) = seed(&conn);
        insert(&conn, 5, coinbase, entry_id).expect("infra").expect("mint");

        let row = select(&conn, 5).expect("select").expect("row");
        assert_eq!(row.owner_id, coinbase);
        assert_eq!(row.creation_entry_id, entry_id);
        assert_eq!(row.metadata, None);
        assert_eq!(select_owner_id(&conn, 5).expect("owner"), Some(coinbase));
    }

    #[test]
    fn test_double_mint_is_tx_error() {
        let conn = crate::open_memory().expect("open");
        let (coinbase, entry_id) = seed(&conn);
        insert(&conn, 5, coinbase, entry_id).expect("infra").expect("mint");
        let rejected = insert(&conn, 5, coinbase, entry_id).expect("infra");
        assert_eq!(rejected, Err(TxError::NfTokenExists(5)));
    }

    #[test]
    fn test_set_owner_moves_token() {
        let conn = crate::open_memory().expect("open");
        let (coinbase, entry_id) = seed(&conn);
        insert(&conn, 1, coinbase, entry_id).expect("infra").expect("mint");

        let alice = crate::address::add(&conn, &[0xaa; 32], 1).expect("alice");
        set_owner(&conn, 1, alice).expect("transfer");
        assert_eq!(select_owner_id(&conn, 1).expect("owner"), Some(alice));
    }

    #[test]
    fn test_metadata_attached() {
        let conn = crate::open_memory().expect("open");
        let (coinbase, entry_id) = seed(&conn);
        insert(&conn, 1, coinbase, entry_id).expect("infra").expect("mint");
        set_metadata(&conn, 1, br#"{"name":"one"}"#).expect("metadata");
        let row = select(&conn, 1).expect("select").expect("row");
        assert_eq!(row.metadata.as_deref(), Some(br#"{"name":"one"}"#.as_slice()));
    }

    #[test]
    fn test_unminted_is_none() {
        let conn = crate::open_memory().expect("open");
        assert_eq!(select_owner_id(&conn, 99).expect("owner"), None);
        assert!(select(&conn, 99).expect("select").is_none());
    }
}
