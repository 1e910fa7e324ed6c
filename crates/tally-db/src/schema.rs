//! SQL schema for a chain store.

use rusqlite::Connection;

use crate::{DbError, Result};

/// Complete DDL for a chain store. Applied as a whole; its hash gates every
/// subsequent open.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    sync_height INTEGER NOT NULL,
    sync_db_key_mr BLOB NOT NULL,
    network_id BLOB NOT NULL,
    identity BLOB,
    identity_height INTEGER,
    init_entry_id INTEGER REFERENCES entry(id),
    num_issued INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS eblock (
    seq INTEGER PRIMARY KEY,
    key_mr BLOB NOT NULL UNIQUE,
    height INTEGER NOT NULL UNIQUE,
    db_key_mr BLOB NOT NULL,
    timestamp INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS entry (
    id INTEGER PRIMARY KEY,
    eb_seq INTEGER NOT NULL REFERENCES eblock(seq),
    hash BLOB NOT NULL,
    timestamp INTEGER NOT NULL,
    data BLOB NOT NULL,
    valid INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_entry_hash ON entry(hash);
CREATE INDEX IF NOT EXISTS idx_entry_eb_seq ON entry(eb_seq);

CREATE TABLE IF NOT EXISTS address (
    id INTEGER PRIMARY KEY,
    rcd_hash BLOB NOT NULL UNIQUE,
    balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0)
);

CREATE TABLE IF NOT EXISTS address_transactions (
    id INTEGER PRIMARY KEY,
    address_id INTEGER NOT NULL REFERENCES address(id),
    entry_id INTEGER NOT NULL REFERENCES entry(id),
    "to" INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_address_transactions_entry
    ON address_transactions(entry_id);
CREATE INDEX IF NOT EXISTS idx_address_transactions_address
    ON address_transactions(address_id);

CREATE TABLE IF NOT EXISTS nf_token (
    id INTEGER PRIMARY KEY,
    owner_id INTEGER NOT NULL REFERENCES address(id),
    creation_entry_id INTEGER NOT NULL REFERENCES entry(id),
    metadata BLOB
);

CREATE INDEX IF NOT EXISTS idx_nf_token_owner ON nf_token(owner_id);

CREATE TABLE IF NOT EXISTS nf_token_transactions (
    nf_token_id INTEGER NOT NULL REFERENCES nf_token(id),
    address_transaction_id INTEGER NOT NULL REFERENCES address_transactions(id),
    UNIQUE (nf_token_id, address_transaction_id)
);

CREATE TABLE IF NOT EXISTS contract (
    id INTEGER PRIMARY KEY,
    chain_id BLOB NOT NULL UNIQUE,
    valid INTEGER NOT NULL DEFAULT 1,
    first_entry BLOB NOT NULL,
    abi TEXT,
    wasm BLOB,
    compiled BLOB
);

CREATE TABLE IF NOT EXISTS address_contracts (
    address_id INTEGER PRIMARY KEY REFERENCES address(id),
    contract_id INTEGER NOT NULL REFERENCES contract(id),
    chain_id BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS contract_kv (
    contract_id INTEGER NOT NULL REFERENCES contract(id),
    key BLOB NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (contract_id, key)
);
"#;

/// First four bytes of the DDL's SHA-256, bit-cast for the 32-bit
/// `user_version` slot.
pub fn version() -> i32 {
    let digest = tally_crypto::hash::sha256(SCHEMA.as_bytes());
    i32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Apply the schema to a fresh store, or verify a populated one.
///
/// A store whose recorded hash is empty (zero) gets the DDL applied and the
/// hash recorded; anything else must match exactly or the open fails.
pub fn apply(conn: &Connection) -> Result<()> {
    let expected = version();
    let found: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(DbError::Sqlite)?;

    if found == 0 {
        conn.execute_batch(SCHEMA)?;
        conn.pragma_update(None, "user_version", expected)?;
        return Ok(());
    }
    if found != expected {
        return Err(DbError::SchemaMismatch { found, expected });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_stable_and_nonzero() {
        assert_eq!(version(), version());
        assert_ne!(version(), 0);
    }

    #[test]
    fn test_apply_records_version() {
        let conn = Connection::open_in_memory().expect("open");
        apply(&conn).expect("apply");
        let v: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("user_version");
        assert_eq!(v, version());
        // Second application verifies instead of re-applying.
        apply(&conn).expect("verify");
    }

    #[test]
    fn test_expected_tables_exist() {
        let conn = crate::open_memory().expect("open");
        for table in [
            "metadata",
            "eblock",
            "entry",
            "address",
            "address_transactions",
            "nf_token",
            "nf_token_transactions",
            "contract",
            "address_contracts",
            "contract_kv",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap_or_else(|_| panic!("table {table} check"));
            assert_eq!(count, 1, "table '{table}' should exist");
        }
    }
}
