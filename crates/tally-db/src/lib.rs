//! # tally-db
//!
//! Per-chain SQLite store for the tally indexer. Each tracked chain owns one
//! database file named `<chainid-hex>.sqlite3`, opened as a single
//! read-write connection plus a fixed-size pool of read-only connections.
//!
//! ## Conventions
//!
//! - WAL mode, foreign keys enforced, no-mutex threading (one writer task
//!   per chain by construction).
//! - The schema is applied idempotently under a DDL-hash check recorded in
//!   `PRAGMA user_version`; a mismatch is a fatal open-time error.
//! - Nothing is ever deleted during replay. Rejected entries stay in the
//!   store with `valid = 0`.
//! - Update statements that are expected to hit exactly one row panic when
//!   they hit none; that is an invariant breach, not an error.

pub mod address;
pub mod contract;
pub mod eblock;
pub mod entry;
pub mod metadata;
pub mod nftoken;
pub mod pool;
pub mod savepoint;
pub mod schema;

pub use pool::{PooledConn, ReadPool};
pub use savepoint::Savepoint;

use std::path::Path;

use rusqlite::{Connection, OpenFlags};

/// Database error types. Token-rule rejections are *not* represented here;
/// they travel on [`tally_types::TxError`].
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("schema hash mismatch: store has {found:#x}, code expects {expected:#x}")]
    SchemaMismatch { found: i32, expected: i32 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// File extension for chain stores.
pub const DB_FILE_EXTENSION: &str = ".sqlite3";

/// Open or create a chain store's read-write connection at `path`.
///
/// Configures WAL mode and foreign keys, then applies or verifies the
/// schema. This connection must be closed after the read pool so that the
/// WAL and SHM sidecar files are reclaimed.
pub fn open(path: &Path) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX
        | OpenFlags::SQLITE_OPEN_URI;
    let conn = Connection::open_with_flags(path, flags)?;
    configure(&conn)?;
    schema::apply(&conn)?;
    Ok(conn)
}

/// Open an in-memory chain store (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    schema::apply(&conn)?;
    Ok(conn)
}

/// Configure SQLite pragmas on the write connection.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

/// Decode a 32-byte blob column, failing on any other length.
pub(crate) fn blob32(bytes: Vec<u8>, what: &str) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| DbError::Corrupt(format!("{what}: expected 32 bytes")))
}

/// Derive a store file name from a chain id.
pub fn chain_file_name(chain_id: &[u8; 32]) -> String {
    format!("{}{}", hex::encode(chain_id), DB_FILE_EXTENSION)
}

/// Parse a store file name back into its chain id. Returns `None` for any
/// file that is not `<64 hex chars>.sqlite3`.
pub fn file_name_chain_id(name: &str) -> Option<[u8; 32]> {
    let stem = name.strip_suffix(DB_FILE_EXTENSION)?;
    tally_types::parse_hash32(stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory_applies_schema() {
        let conn = open_memory().expect("open in-memory db");
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .expect("query");
        assert!(count >= 8);
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let conn = open_memory().expect("open");
        let fk: i32 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .expect("get foreign_keys");
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(chain_file_name(&[1u8; 32]));
        drop(open(&path).expect("first open"));
        drop(open(&path).expect("second open"));
    }

    #[test]
    fn test_open_rejects_foreign_schema() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(chain_file_name(&[2u8; 32]));
        let conn = Connection::open(&path).expect("raw open");
        conn.execute_batch("CREATE TABLE other (x); PRAGMA user_version = 7;")
            .expect("seed foreign schema");
        drop(conn);
        match open(&path) {
            Err(DbError::SchemaMismatch { found: 7, .. }) => {}
            other => panic!("expected schema mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_file_name_roundtrip() {
        let id = [0x5au8; 32];
        let name = chain_file_name(&id);
        assert_eq!(file_name_chain_id(&name), Some(id));
        assert_eq!(file_name_chain_id("junk.sqlite3"), None);
        assert_eq!(file_name_chain_id(&hex::encode(id)), None);
    }
}
