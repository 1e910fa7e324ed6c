//! Scoped savepoints.
//!
//! A [`Savepoint`] opens a named SQLite savepoint on construction and rolls
//! it back on drop unless it was explicitly committed. Appliers stack them:
//! an outer savepoint per entry block, an inner one per entry's token
//! effects, so a token-rule rejection can discard balance changes while the
//! entry row itself survives.

use rusqlite::Connection;

use crate::Result;

/// A named savepoint that rolls back unless committed.
#[must_use = "a savepoint rolls back when dropped"]
pub struct Savepoint<'c> {
    conn: &'c Connection,
    name: &'static str,
    open: bool,
}

impl<'c> Savepoint<'c> {
    /// Open a savepoint. Names are fixed per call site; nesting works as
    /// long as the names differ along one stack.
    pub fn new(conn: &'c Connection, name: &'static str) -> Result<Self> {
        conn.execute_batch(&format!("SAVEPOINT {name};"))?;
        Ok(Self {
            conn,
            name,
            open: true,
        })
    }

    /// Release the savepoint, keeping its effects.
    pub fn commit(mut self) -> Result<()> {
        self.conn.execute_batch(&format!("RELEASE {};", self.name))?;
        self.open = false;
        Ok(())
    }

    /// Roll back and release the savepoint, discarding its effects.
    pub fn rollback(mut self) -> Result<()> {
        self.conn.execute_batch(&format!(
            "ROLLBACK TO {name}; RELEASE {name};",
            name = self.name
        ))?;
        self.open = false;
        Ok(())
    }
}

impl Drop for Savepoint<'_> {
    fn drop(&mut self) {
        if self.open {
            let _ = self.conn.execute_batch(&format!(
                "ROLLBACK TO {name}; RELEASE {name};",
                name = self.name
            ));
        }
    }
}
