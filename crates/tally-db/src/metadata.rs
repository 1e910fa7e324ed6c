//! The per-chain metadata singleton (row id 0).

use rusqlite::{Connection, OptionalExtension};
use tally_types::{Identity, KeyMr, NetworkId};

use crate::{blob32, DbError, Result};

/// The full metadata row.
#[derive(Debug, Clone)]
pub struct Metadata {
    pub sync_height: u32,
    pub sync_db_key_mr: KeyMr,
    pub network_id: NetworkId,
    pub identity: Option<Identity>,
    /// Row id of the accepted issuance entry, once seen.
    pub init_entry_id: Option<i64>,
    pub num_issued: u64,
}

/// Insert the singleton at chain creation.
pub fn insert(
    conn: &Connection,
    sync_height: u32,
    sync_db_key_mr: &KeyMr,
    network_id: &NetworkId,
    identity: Option<&Identity>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO metadata
             (id, sync_height, sync_db_key_mr, network_id, identity, identity_height)
         VALUES (0, ?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            sync_height as i64,
            sync_db_key_mr.as_slice(),
            network_id.as_slice(),
            identity.map(Identity::marshal),
            identity.map(|id| id.height as i64),
        ],
    )?;
    Ok(())
}

/// Advance the sync watermark. Heights at or below the stored watermark are
/// a no-op; the watermark never moves backwards.
pub fn set_sync(conn: &Connection, height: u32, db_key_mr: &KeyMr) -> Result<()> {
    let stored: i64 = conn.query_row("SELECT sync_height FROM metadata WHERE id = 0", [], |row| {
        row.get(0)
    })?;
    if (height as i64) <= stored {
        return Ok(());
    }
    let changes = conn.execute(
        "UPDATE metadata SET sync_height = ?1, sync_db_key_mr = ?2 WHERE id = 0",
        rusqlite::params![height as i64, db_key_mr.as_slice()],
    )?;
    if changes == 0 {
        panic!("metadata sync update affected no rows");
    }
    Ok(())
}

/// Add freshly minted units to the running issuance counter.
pub fn add_num_issued(conn: &Connection, add: u64) -> Result<()> {
    let changes = conn.execute(
        "UPDATE metadata SET num_issued = num_issued + ?1 WHERE id = 0",
        [add as i64],
    )?;
    if changes == 0 {
        panic!("metadata num_issued update affected no rows");
    }
    Ok(())
}

/// Record the accepted issuance entry and reset the issuance counter.
pub fn set_init_entry_id(conn: &Connection, entry_id: i64) -> Result<()> {
    let changes = conn.execute(
        "UPDATE metadata SET init_entry_id = ?1, num_issued = 0 WHERE id = 0",
        [entry_id],
    )?;
    if changes == 0 {
        panic!("metadata init_entry_id update affected no rows");
    }
    Ok(())
}

/// Store or refresh the issuer identity record.
pub fn update_identity(conn: &Connection, identity: &Identity) -> Result<()> {
    let changes = conn.execute(
        "UPDATE metadata SET identity = ?1, identity_height = ?2 WHERE id = 0",
        rusqlite::params![identity.marshal(), identity.height as i64],
    )?;
    if changes == 0 {
        panic!("metadata identity update affected no rows");
    }
    Ok(())
}

/// Load the singleton.
pub fn select(conn: &Connection) -> Result<Metadata> {
    let row = conn
        .query_row(
            "SELECT sync_height, sync_db_key_mr, network_id, identity,
                    init_entry_id, num_issued
             FROM metadata WHERE id = 0",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                    row.get::<_, Option<Vec<u8>>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| DbError::NotFound("metadata".to_string()))?;

    let (sync_height, key_mr, network_id, identity, init_entry_id, num_issued) = row;
    let network_id: NetworkId = network_id
        .try_into()
        .map_err(|_| DbError::Corrupt("network_id: expected 4 bytes".to_string()))?;
    let identity = identity
        .map(|blob| Identity::unmarshal(&blob))
        .transpose()
        .map_err(|e| DbError::Corrupt(format!("identity blob: {e}")))?;

    Ok(Metadata {
        sync_height: sync_height as u32,
        sync_db_key_mr: blob32(key_mr, "sync_db_key_mr")?,
        network_id,
        identity,
        init_entry_id,
        num_issued: num_issued as u64,
    })
}
