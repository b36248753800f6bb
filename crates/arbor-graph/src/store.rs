use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use tracing::info;

use crate::error::{Result, StoreError};
use crate::schema;

/// Shared handle to the graph database.
///
/// Wraps a single SQLite connection in a `Mutex`. Repository methods take
/// the lock per logical operation and never hold it across non-store work,
/// so a connection pool has not been necessary for the single-node target.
pub struct GraphStore {
    conn: Mutex<Connection>,
}

impl GraphStore {
    /// Open (creating if needed) the graph database at `path` and run
    /// idempotent schema/index initialisation.
    ///
    /// A failure here is fatal at boot — callers exit non-zero.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(dir) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| StoreError::Unavailable(format!("cannot create {}: {e}", dir.display())))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Unavailable(format!("cannot open {path}: {e}")))?;
        let store = Self::from_connection(conn)?;
        info!(path, "graph store opened");
        Ok(store)
    }

    /// In-memory store — used by tests and throwaway tooling.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_millis(
            arbor_core::config::STORE_BUSY_TIMEOUT_MS,
        ))?;
        schema::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Take the connection lock for one logical operation.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}

/// Record a labelled edge. Idempotent — re-linking the same triple is a no-op.
pub(crate) fn link(conn: &Connection, src: &str, label: &str, dst: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO edges (src, dst, label) VALUES (?1, ?2, ?3)",
        rusqlite::params![src, dst, label],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_init_is_idempotent() {
        let store = GraphStore::open_in_memory().unwrap();
        // Re-running init against the live connection must not fail.
        schema::init_db(&store.conn()).unwrap();
    }

    #[test]
    fn relinking_same_edge_is_a_noop() {
        let store = GraphStore::open_in_memory().unwrap();
        let conn = store.conn();
        link(&conn, "a", schema::labels::HAS_CHILD, "b").unwrap();
        link(&conn, "a", schema::labels::HAS_CHILD, "b").unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM edges", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
