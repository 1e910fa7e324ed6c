//! The `contract` table: Wasm contract code indexed by its data-store
//! chain id, with a cache of the serialized compiled module, plus the
//! guest-visible key-value store.
//!
//! A row inserted with no compiled module is permanently invalid: the chain
//! saw the contract, failed to validate it, and will reject every future
//! delegation to it. The `valid` flag is never flipped back.

use rusqlite::{Connection, OptionalExtension};
use tally_types::{ChainId, Entry};

use crate::{blob32, Result};

/// A stored contract row.
#[derive(Debug, Clone)]
pub struct ContractRow {
    pub id: i64,
    pub valid: bool,
    pub wasm: Option<Vec<u8>>,
    pub compiled: Option<Vec<u8>>,
}

/// Insert a contract under its data-store chain id.
///
/// `compiled` of `None` marks the contract permanently invalid; the ABI is
/// only stored for valid contracts.
pub fn insert(
    conn: &Connection,
    first_entry: &Entry,
    wasm: &[u8],
    abi_json: Option<&str>,
    compiled: Option<&[u8]>,
) -> Result<i64> {
    let valid = compiled.is_some();
    conn.execute(
        "INSERT INTO contract (chain_id, valid, first_entry, abi, wasm, compiled)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            first_entry.chain_id.as_slice(),
            valid,
            first_entry.marshal_binary(),
            if valid { abi_json } else { None },
            wasm,
            compiled,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Validity and row id for a contract chain id. `None` means the contract
/// has never been seen.
pub fn select_valid(conn: &Connection, chain_id: &ChainId) -> Result<Option<(bool, i64)>> {
    Ok(conn
        .query_row(
            "SELECT valid, id FROM contract WHERE chain_id = ?1",
            [chain_id.as_slice()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?)
}

fn row_from(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContractRow> {
    Ok(ContractRow {
        id: row.get(0)?,
        valid: row.get(1)?,
        wasm: row.get(2)?,
        compiled: row.get(3)?,
    })
}

/// Load a contract's code by chain id.
pub fn select_by_chain_id(conn: &Connection, chain_id: &ChainId) -> Result<Option<ContractRow>> {
    Ok(conn
        .query_row(
            "SELECT id, valid, wasm, compiled FROM contract WHERE chain_id = ?1",
            [chain_id.as_slice()],
            row_from,
        )
        .optional()?)
}

/// Load a contract's code by row id.
pub fn select_by_id(conn: &Connection, id: i64) -> Result<Option<ContractRow>> {
    Ok(conn
        .query_row(
            "SELECT id, valid, wasm, compiled FROM contract WHERE id = ?1",
            [id],
            row_from,
        )
        .optional()?)
}

/// The stored ABI JSON of a contract, if it was stored valid.
pub fn select_abi(conn: &Connection, id: i64) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT abi FROM contract WHERE id = ?1", [id], |row| {
            row.get::<_, Option<String>>(0)
        })
        .optional()?
        .flatten())
}

/// Refresh the compiled-module cache for a contract.
pub fn cache(conn: &Connection, id: i64, compiled: &[u8]) -> Result<()> {
    let changes = conn.execute(
        "UPDATE contract SET compiled = ?1 WHERE id = ?2",
        rusqlite::params![compiled, id],
    )?;
    if changes == 0 {
        panic!("contract {id} cache update affected no rows");
    }
    Ok(())
}

/// Drop every cached compiled module, forcing recompilation on next use.
/// Needed when the embedding runtime changes its serialization format.
pub fn clear_compiled_cache(conn: &Connection) -> Result<()> {
    conn.execute("UPDATE contract SET compiled = NULL", [])?;
    Ok(())
}

/// Every row's identity material, for integrity validation.
pub fn select_all_for_validation(
    conn: &Connection,
) -> Result<Vec<(i64, ChainId, Vec<u8>, Option<Vec<u8>>)>> {
    let mut stmt =
        conn.prepare("SELECT id, chain_id, first_entry, wasm FROM contract ORDER BY id")?;
    let raw: Vec<(i64, Vec<u8>, Vec<u8>, Option<Vec<u8>>)> = stmt
        .query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<std::result::Result<_, _>>()?;
    raw.into_iter()
        .map(|(id, chain_id, first_entry, wasm)| {
            Ok((id, blob32(chain_id, "contract.chain_id")?, first_entry, wasm))
        })
        .collect()
}

/// Read a guest storage slot.
pub fn kv_get(conn: &Connection, contract_id: i64, key: &[u8]) -> Result<Option<Vec<u8>>> {
    Ok(conn
        .query_row(
            "SELECT value FROM contract_kv WHERE contract_id = ?1 AND key = ?2",
            rusqlite::params![contract_id, key],
            |row| row.get(0),
        )
        .optional()?)
}

/// Write a guest storage slot.
pub fn kv_set(conn: &Connection, contract_id: i64, key: &[u8], value: &[u8]) -> Result<()> {
    conn.execute(
        "INSERT INTO contract_kv (contract_id, key, value) VALUES (?1, ?2, ?3)
         ON CONFLICT(contract_id, key) DO UPDATE SET value = ?3",
        rusqlite::params![contract_id, key, value],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_entry(chain_id: u8) -> Entry {
        Entry::new(
            [chain_id; 32],
            vec![b"data-store".to_vec()],
            br#"{"data-hash":"00","size":4}"#.to_vec(),
        )
    }

    #[test]
    fn test_insert_valid_roundtrip() {
        let conn = crate::open_memory().expect("open");
        let id = insert(
            &conn,
            &manifest_entry(0xc1),
            b"wasm",
            Some(r#"{"foo":{"args":[]}}"#),
            Some(b"compiled"),
        )
        .expect("insert");

        assert_eq!(select_valid(&conn, &[0xc1; 32]).expect("select"), Some((true, id)));
        let row = select_by_chain_id(&conn, &[0xc1; 32])
            .expect("select")
            .expect("row");
        assert!(row.valid);
        assert_eq!(row.wasm.as_deref(), Some(b"wasm".as_slice()));
        assert_eq!(row.compiled.as_deref(), Some(b"compiled".as_slice()));
        assert_eq!(
            select_abi(&conn, id).expect("abi").as_deref(),
            Some(r#"{"foo":{"args":[]}}"#)
        );
    }

    #[test]
    fn test_insert_invalid_drops_abi() {
        let conn = crate::open_memory().expect("open");
        let id = insert(
            &conn,
            &manifest_entry(0xc2),
            b"wasm",
            Some(r#"{"foo":{"args":[]}}"#),
            None,
        )
        .expect("insert");

        assert_eq!(select_valid(&conn, &[0xc2; 32]).expect("select"), Some((false, id)));
        assert_eq!(select_abi(&conn, id).expect("abi"), None);
        let row = select_by_id(&conn, id).expect("select").expect("row");
        assert!(!row.valid);
        assert!(row.compiled.is_none());
    }

    #[test]
    fn test_unknown_contract_is_none() {
        let conn = crate::open_memory().expect("open");
        assert_eq!(select_valid(&conn, &[9u8; 32]).expect("select"), None);
        assert!(select_by_chain_id(&conn, &[9u8; 32]).expect("select").is_none());
    }

    #[test]
    fn test_cache_and_clear() {
        let conn = crate::open_memory().expect("open");
        let id = insert(&conn, &manifest_entry(0xc3), b"wasm", None, Some(b"old"))
            .expect("insert");

        cache(&conn, id, b"new").expect("cache");
        let row = select_by_id(&conn, id).expect("select").expect("row");
        assert_eq!(row.compiled.as_deref(), Some(b"new".as_slice()));

        clear_compiled_cache(&conn).expect("clear");
        let row = select_by_id(&conn, id).expect("select").expect("row");
        assert!(row.compiled.is_none());
        // Clearing the cache does not touch validity.
        assert!(row.valid);
    }

    #[test]
    fn test_kv_roundtrip_and_overwrite() {
        let conn = crate::open_memory().expect("open");
        let id = insert(&conn, &manifest_entry(0xc4), b"wasm", None, Some(b"c"))
            .expect("insert");

        assert_eq!(kv_get(&conn, id, b"k").expect("get"), None);
        kv_set(&conn, id, b"k", b"v1").expect("set");
        assert_eq!(kv_get(&conn, id, b"k").expect("get"), Some(b"v1".to_vec()));
        kv_set(&conn, id, b"k", b"v2").expect("overwrite");
        assert_eq!(kv_get(&conn, id, b"k").expect("get"), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_duplicate_chain_id_rejected() {
        let conn = crate::open_memory().expect("open");
        insert(&conn, &manifest_entry(0xc5), b"wasm", None, Some(b"c")).expect("insert");
        assert!(insert(&conn, &manifest_entry(0xc5), b"wasm2", None, Some(b"c")).is_err());
    }
}
