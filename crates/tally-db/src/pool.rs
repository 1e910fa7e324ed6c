//! Fixed-size read-only connection pool.
//!
//! RPC readers borrow connections from here while the chain's applier owns
//! the single write connection. Connections are opened with
//! `SQLITE_OPEN_READONLY`, so a borrower cannot persist anything; a
//! rollback is still issued on release in case a statement left an implicit
//! transaction open.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OpenFlags};
use tokio::sync::Semaphore;

use crate::Result;

/// A pool of read-only connections to one chain store.
pub struct ReadPool {
    conns: Mutex<Vec<Connection>>,
    permits: Semaphore,
}

impl ReadPool {
    /// Open `size` read-only connections to the store at `path`.
    pub fn open(path: &Path, size: usize) -> Result<Arc<Self>> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;
        let mut conns = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open_with_flags(path, flags)?;
            conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
            conns.push(conn);
        }
        Ok(Arc::new(Self {
            conns: Mutex::new(conns),
            permits: Semaphore::new(size),
        }))
    }

    /// Borrow a connection, waiting until one is free.
    pub async fn get(self: &Arc<Self>) -> PooledConn {
        let permit = self
            .permits
            .acquire()
            .await
            .expect("read pool semaphore closed");
        permit.forget();
        let conn = self
            .conns
            .lock()
            .expect("read pool poisoned")
            .pop()
            .expect("permit held but no connection free");
        PooledConn {
            conn: Some(conn),
            pool: Arc::clone(self),
        }
    }
}

/// A borrowed read-only connection. Returned to the pool on drop.
pub struct PooledConn {
    conn: Option<Connection>,
    pool: Arc<ReadPool>,
}

impl std::ops::Deref for PooledConn {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection taken")
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // No-op unless a statement left a transaction open.
            let _ = conn.execute_batch("ROLLBACK;");
            self.pool
                .conns
                .lock()
                .expect("read pool poisoned")
                .push(conn);
            self.pool.permits.add_permits(1);
        }
    }
}
