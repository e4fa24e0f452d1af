//! Bounded connection pool
//!
//! A fixed set of DuckDB connections cloned from one database handle, handed
//! out behind a counting semaphore. Callers wait at most `acquire_timeout`
//! for a free connection.

use crate::execution::EngineError;
use duckdb::{AccessMode, Config, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

struct Idle {
    connections: Mutex<Vec<Connection>>,
}

#[derive(Clone)]
pub struct ConnectionPool {
    idle: Arc<Idle>,
    permits: Arc<Semaphore>,
    size: usize,
    acquire_timeout: Duration,
}

impl ConnectionPool {
    /// Open `path` read-only and clone `size` connections from it.
    pub fn open_read_only(path: &Path, size: usize, acquire_timeout: Duration) -> Result<Self, EngineError> {
        let config = Config::default()
            .access_mode(AccessMode::ReadOnly)
            .map_err(|e| EngineError::Connection(e.to_string()))?;
        let root = Connection::open_with_flags(path, config)
            .map_err(|e| EngineError::Connection(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), size, "Opened read-only connection pool");
        Self::from_connection(root, size, acquire_timeout)
    }

    /// Build a pool from an existing handle; clones share its database.
    pub fn from_connection(root: Connection, size: usize, acquire_timeout: Duration) -> Result<Self, EngineError> {
        let size = size.max(1);
        let mut connections = Vec::with_capacity(size);
        for _ in 1..size {
            connections.push(root.try_clone().map_err(|e| EngineError::Connection(e.to_string()))?);
        }
        connections.push(root);

        Ok(Self {
            idle: Arc::new(Idle {
                connections: Mutex::new(connections),
            }),
            permits: Arc::new(Semaphore::new(size)),
            size,
            acquire_timeout,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Connections not currently checked out.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn acquire(&self) -> Result<PooledConnection, EngineError> {
        let permit = tokio::time::timeout(self.acquire_timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| EngineError::PoolExhausted(self.acquire_timeout))?
            .map_err(|_| EngineError::Connection("pool closed".to_string()))?;

        let connection = self
            .idle
            .connections
            .lock()
            .map_err(|_| EngineError::Connection("pool lock poisoned".to_string()))?
            .pop()
            .ok_or_else(|| EngineError::Connection("pool permit without idle connection".to_string()))?;

        debug!(available = self.available(), "Checked out pooled connection");
        Ok(PooledConnection {
            connection: Some(connection),
            idle: self.idle.clone(),
            _permit: permit,
        })
    }
}

/// A checked-out connection; returned to the pool on drop.
pub struct PooledConnection {
    connection: Option<Connection>,
    idle: Arc<Idle>,
    _permit: OwnedSemaphorePermit,
}

impl std::ops::Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `None` after drop has taken it.
        self.connection.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Ok(mut idle) = self.idle.connections.lock() {
                idle.push(connection);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_pool(size: usize, timeout_ms: u64) -> ConnectionPool {
        let root = Connection::open_in_memory().unwrap();
        ConnectionPool::from_connection(root, size, Duration::from_millis(timeout_ms)).unwrap()
    }

    #[tokio::test]
    async fn test_connections_return_on_drop() {
        let pool = memory_pool(2, 100);
        {
            let a = pool.acquire().await.unwrap();
            let _b = pool.acquire().await.unwrap();
            assert_eq!(pool.available(), 0);
            a.execute_batch("SELECT 1").unwrap();
        }
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let pool = memory_pool(1, 20);
        let _held = pool.acquire().await.unwrap();
        assert!(matches!(pool.acquire().await, Err(EngineError::PoolExhausted(_))));
    }

    #[tokio::test]
    async fn test_clones_share_database() {
        let root = Connection::open_in_memory().unwrap();
        root.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (7);")
            .unwrap();
        let pool = ConnectionPool::from_connection(root, 3, Duration::from_millis(50)).unwrap();
        let _first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        let x: i32 = second.query_row("SELECT x FROM t", [], |row| row.get(0)).unwrap();
        assert_eq!(x, 7);
    }
}
