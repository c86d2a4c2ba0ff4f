//! Pooled SQLite connections, one per backing file.
//!
//! Connections are opened lazily on first use and reused for the life of the
//! pool. The pool lock is held only while looking up or creating a handle.
//! Each handle carries its own mutex, so statements on different stores run
//! concurrently while statements on one store are serialized; WAL mode lets
//! readers of other processes proceed alongside.

use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::Result;

/// Shared handle to one pooled connection.
pub type PooledConnection = Arc<Mutex<Connection>>;

/// Lazily populated map from backing file to connection.
#[derive(Debug, Default)]
pub struct ConnectionPool {
    connections: Mutex<HashMap<PathBuf, PooledConnection>>,
}

impl ConnectionPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the connection for `db_file`, opening it on first use.
    pub fn get(&self, db_file: &Path) -> Result<PooledConnection> {
        let mut connections = self
            .connections
            .lock()
            .expect("connection pool mutex poisoned");
        if let Some(conn) = connections.get(db_file) {
            return Ok(Arc::clone(conn));
        }

        let conn = open_connection(db_file)?;
        let conn = Arc::new(Mutex::new(conn));
        connections.insert(db_file.to_path_buf(), Arc::clone(&conn));
        log::debug!("Opened store connection: {}", db_file.display());
        Ok(conn)
    }

    /// Run `f` with exclusive use of the connection for `db_file`.
    pub fn with<T>(&self, db_file: &Path, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let handle = self.get(db_file)?;
        let mut conn = handle.lock().expect("store connection mutex poisoned");
        f(&mut conn)
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.connections
            .lock()
            .expect("connection pool mutex poisoned")
            .len()
    }

    /// Whether no connection has been opened yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every pooled connection. Handles still held elsewhere close when released.
    pub fn close_all(&self) {
        let drained: Vec<_> = self
            .connections
            .lock()
            .expect("connection pool mutex poisoned")
            .drain()
            .collect();
        log::debug!("Closing {} store connections", drained.len());
    }
}

fn open_connection(db_file: &Path) -> Result<Connection> {
    let conn = Connection::open(db_file)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "cache_size", 10000)?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    Ok(conn)
}
