//! The `eblock` table: one row per applied entry block.

use rusqlite::{Connection, OptionalExtension};
use tally_types::{EBlock, KeyMr};

use crate::{blob32, Result};

/// A stored entry-block row.
#[derive(Debug, Clone)]
pub struct EBlockRow {
    /// Dense 1-indexed sequence within this chain.
    pub seq: i64,
    pub key_mr: KeyMr,
    pub height: u32,
    pub db_key_mr: KeyMr,
    pub timestamp: u64,
}

/// Insert an entry block. Fails if its key MR or height already exist.
pub fn insert(conn: &Connection, eb: &EBlock, db_key_mr: &KeyMr) -> Result<i64> {
    conn.execute(
        "INSERT INTO eblock (key_mr, height, db_key_mr, timestamp)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            eb.key_mr.as_slice(),
            eb.height as i64,
            db_key_mr.as_slice(),
            eb.timestamp as i64,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// The most recently applied entry block, if any.
pub fn select_latest(conn: &Connection) -> Result<Option<EBlockRow>> {
    let row = conn
        .query_row(
            "SELECT seq, key_mr, height, db_key_mr, timestamp
             FROM eblock ORDER BY seq DESC LIMIT 1",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?;

    row.map(|(seq, key_mr, height, db_key_mr, timestamp)| {
        Ok(EBlockRow {
            seq,
            key_mr: blob32(key_mr, "eblock.key_mr")?,
            height: height as u32,
            db_key_mr: blob32(db_key_mr, "eblock.db_key_mr")?,
            timestamp: timestamp as u64,
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eb(height: u32, key: u8) -> EBlock {
        EBlock {
            chain_id: [1u8; 32],
            key_mr: [key; 32],
            prev_key_mr: [0u8; 32],
            height,
            timestamp: 100 + height as u64,
            entries: vec![],
        }
    }

    #[test]
    fn test_insert_and_select_latest() {
        let conn = crate::open_memory().expect("open");
        assert!(select_latest(&conn).expect("empty").is_none());

        let seq1 = insert(&conn, &eb(4, 0xa), &[0xd1; 32]).expect("insert");
        let seq2 = insert(&conn, &eb(9, 0xb), &[0xd2; 32]).expect("insert");
        assert_eq!((seq1, seq2), (1, 2));

        let latest = select_latest(&conn).expect("select").expect("row");
        assert_eq!(latest.seq, 2);
        assert_eq!(latest.key_mr, [0xb; 32]);
        assert_eq!(latest.height, 9);
        assert_eq!(latest.db_key_mr, [0xd2; 32]);
    }

    #[test]
    fn test_duplicate_key_mr_rejected() {
        let conn = crate::open_memory().expect("open");
        insert(&conn, &eb(4, 0xa), &[0xd1; 32]).expect("insert");
        assert!(insert(&conn, &eb(5, 0xa), &[0xd1; 32]).is_err());
    }

    #[test]
    fn test_duplicate_height_rejected() {
        let conn = crate::open_memory().expect("open");
        insert(&conn, &eb(4, 0xa), &[0xd1; 32]).expect("insert");
        assert!(insert(&conn, &eb(4, 0xb), &[0xd1; 32]).is_err());
    }
}
