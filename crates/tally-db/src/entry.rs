//! The `entry` table: every entry ever seen on the chain, valid or not.
//!
//! The same content hash may occur on many rows (the stream can repeat an
//! entry); replay protection only demands that at most one row per hash is
//! ever marked valid. [`check_uniquely_valid`] is that gate.

use rusqlite::{Connection, OptionalExtension};
use tally_types::{Entry, EntryHash};

use crate::{blob32, DbError, Result};

/// A stored entry row.
#[derive(Debug, Clone)]
pub struct EntryRow {
    /// Dense 1-indexed row id; row 1 is the chain's first entry.
    pub id: i64,
    pub hash: EntryHash,
    pub timestamp: u64,
    pub data: Vec<u8>,
    pub valid: bool,
}

impl EntryRow {
    /// Decode the stored binary form, restoring the row timestamp.
    pub fn entry(&self) -> Result<Entry> {
        let mut e = Entry::unmarshal_binary(&self.data)
            .map_err(|e| DbError::Corrupt(format!("entry.data: {e}")))?;
        e.timestamp = self.timestamp;
        Ok(e)
    }
}

/// Insert an entry under its enclosing entry block.
pub fn insert(conn: &Connection, eb_seq: i64, e: &Entry) -> Result<i64> {
    conn.execute(
        "INSERT INTO entry (eb_seq, hash, timestamp, data) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            eb_seq,
            e.hash().as_slice(),
            e.timestamp as i64,
            e.marshal_binary(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn row_from(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, Vec<u8>, i64, Vec<u8>, bool)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn build(raw: (i64, Vec<u8>, i64, Vec<u8>, bool)) -> Result<EntryRow> {
    let (id, hash, timestamp, data, valid) = raw;
    Ok(EntryRow {
        id,
        hash: blob32(hash, "entry.hash")?,
        timestamp: timestamp as u64,
        data,
        valid,
    })
}

/// Look up an entry by row id.
pub fn select_by_id(conn: &Connection, id: i64) -> Result<Option<EntryRow>> {
    conn.query_row(
        "SELECT id, hash, timestamp, data, valid FROM entry WHERE id = ?1",
        [id],
        row_from,
    )
    .optional()?
    .map(build)
    .transpose()
}

/// Look up the valid occurrence of a content hash, if one exists.
pub fn select_valid_by_hash(conn: &Connection, hash: &EntryHash) -> Result<Option<EntryRow>> {
    conn.query_row(
        "SELECT id, hash, timestamp, data, valid FROM entry
         WHERE hash = ?1 AND valid = 1",
        [hash.as_slice()],
        row_from,
    )
    .optional()?
    .map(build)
    .transpose()
}

/// Mark an entry valid. Must flip `valid` from false to true exactly once;
/// a second call on the same row is an invariant breach.
pub fn set_valid(conn: &Connection, id: i64) -> Result<()> {
    let changes = conn.execute("UPDATE entry SET valid = 1 WHERE id = ?1 AND valid = 0", [id])?;
    if changes == 0 {
        panic!("entry {id} already valid or missing");
    }
    Ok(())
}

/// Replay gate: true iff no *other* row with the same content hash is
/// already marked valid.
pub fn check_uniquely_valid(conn: &Connection, id: i64, hash: &EntryHash) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM entry WHERE hash = ?1 AND valid = 1 AND id != ?2",
        rusqlite::params![hash.as_slice(), id],
        |row| row.get(0),
    )?;
    Ok(count == 0)
}

/// Page through valid entries in row order, optionally restricted to those
/// that touched one address.
pub fn select_valid_paginated(
    conn: &Connection,
    address_id: Option<i64>,
    page: u64,
    limit: u64,
    ascending: bool,
) -> Result<Vec<EntryRow>> {
    let order = if ascending { "ASC" } else { "DESC" };
    let sql = match address_id {
        Some(_) => format!(
            "SELECT DISTINCT e.id, e.hash, e.timestamp, e.data, e.valid
             FROM entry e
             JOIN address_transactions at ON at.entry_id = e.id
             WHERE e.valid = 1 AND at.address_id = ?1
             ORDER BY e.id {order} LIMIT ?2 OFFSET ?3"
        ),
        None => format!(
            "SELECT id, hash, timestamp, data, valid FROM entry
             WHERE valid = 1 ORDER BY id {order} LIMIT ?1 OFFSET ?2"
        ),
    };
    let offset = (page * limit) as i64;
    let mut stmt = conn.prepare(&sql)?;
    let raw: Vec<_> = match address_id {
        Some(aid) => stmt
            .query_map(rusqlite::params![aid, limit as i64, offset], row_from)?
            .collect::<std::result::Result<_, _>>()?,
        None => stmt
            .query_map(rusqlite::params![limit as i64, offset], row_from)?
            .collect::<std::result::Result<_, _>>()?,
    };
    raw.into_iter().map(build).collect()
}

/// Total and valid entry counts, for chain stats.
pub fn counts(conn: &Connection) -> Result<(i64, i64)> {
    let row = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(valid), 0) FROM entry",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_eblock(conn: &Connection) -> i64 {
        let eb = tally_types::EBlock {
            chain_id: [1u8; 32],
            key_mr: [2u8; 32],
            prev_key_mr: [0u8; 32],
            height: 0,
            timestamp: 50,
            entries: vec![],
        };
        crate::eblock::insert(conn, &eb, &[3u8; 32]).expect("eblock")
    }

    fn make(content: &[u8], ts: u64) -> Entry {
        let mut e = Entry::new([1u8; 32], vec![b"x".to_vec()], content.to_vec());
        e.timestamp = ts;
        e
    }

    #[test]
    fn test_insert_select_roundtrip() {
        let conn = crate::open_memory().expect("open");
        let eb = seed_eblock(&conn);
        let e = make(b"hello", 77);
        let id = insert(&conn, eb, &e).expect("insert");
        assert_eq!(id, 1);

        let row = select_by_id(&conn, id).expect("select").expect("row");
        assert_eq!(row.hash, e.hash());
        assert!(!row.valid);
        assert_eq!(row.entry().expect("decode"), e);
    }

    #[test]
    fn test_duplicate_hash_rows_allowed() {
        let conn = crate::open_memory().expect("open");
        let eb = seed_eblock(&conn);
        let e = make(b"dup", 77);
        let id1 = insert(&conn, eb, &e).expect("first");
        let id2 = insert(&conn, eb, &e).expect("second occurrence");
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_check_uniquely_valid_gate() {
        let conn = crate::open_memory().expect("open");
        let eb = seed_eblock(&conn);
        let e = make(b"dup", 77);
        let id1 = insert(&conn, eb, &e).expect("first");
        let id2 = insert(&conn, eb, &e).expect("second");

        assert!(check_uniquely_valid(&conn, id1, &e.hash()).expect("check"));
        set_valid(&conn, id1).expect("set valid");
        // The first row does not conflict with itself; the second does.
        assert!(check_uniquely_valid(&conn, id1, &e.hash()).expect("check"));
        assert!(!check_uniquely_valid(&conn, id2, &e.hash()).expect("check"));
    }

    #[test]
    #[should_panic(expected = "already valid")]
    fn test_double_set_valid_panics() {
        let conn = crate::open_memory().expect("open");
        let eb = seed_eblock(&conn);
        let id = insert(&conn, eb, &make(b"x", 1)).expect("insert");
        set_valid(&conn, id).expect("first");
        let _ = set_valid(&conn, id);
    }

    #[test]
    fn test_select_valid_by_hash_skips_invalid() {
        let conn = crate::open_memory().expect("open");
        let eb = seed_eblock(&conn);
        let e = make(b"x", 1);
        let id1 = insert(&conn, eb, &e).expect("first");
        let id2 = insert(&conn, eb, &e).expect("second");

        assert!(select_valid_by_hash(&conn, &e.hash()).expect("select").is_none());
        set_valid(&conn, id2).expect("set valid");
        let row = select_valid_by_hash(&conn, &e.hash())
            .expect("select")
            .expect("row");
        assert_eq!(row.id, id2);
        assert_ne!(row.id, id1);
    }

    #[test]
    fn test_pagination_order_and_offset() {
        let conn = crate::open_memory().expect("open");
        let eb = seed_eblock(&conn);
        for i in 0u8..5 {
            let id = insert(&conn, eb, &make(&[i], 1)).expect("insert");
            set_valid(&conn, id).expect("valid");
        }
        let asc = select_valid_paginated(&conn, None, 0, 2, true).expect("page");
        assert_eq!(asc.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);
        let desc = select_valid_paginated(&conn, None, 1, 2, false).expect("page");
        assert_eq!(desc.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3, 2]);
    }
}
