//! Connection pool for the archive file.
//!
//! Uses r2d2 with r2d2_sqlite. Every connection enforces foreign keys and runs
//! in WAL mode so readers proceed while a batch is being written.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;

use super::schema::apply_pragmas;
use crate::config::ArchiveConfig;
use crate::error::StoreError;

/// A connection borrowed from the pool; returned when dropped.
pub type PooledConn = PooledConnection<SqliteConnectionManager>;

/// Bounded pool of connections to one archive file.
///
/// The pool size bounds the number of concurrent store operations. Taking a
/// connection from an exhausted pool blocks until one is released.
#[derive(Clone)]
pub struct ConnectionPool {
    pool: Pool<SqliteConnectionManager>,
}

impl ConnectionPool {
    /// Create a pool for the archive file described by `config`.
    ///
    /// The file must already exist and be migrated; see
    /// [`Archive::open`](crate::Archive::open).
    pub fn new(config: &ArchiveConfig) -> Result<Self, StoreError> {
        Self::with_options(
            &config.db_path,
            config.pool_size,
            config.busy_timeout(),
            config.acquire_timeout(),
        )
    }

    /// Create a pool with explicit sizing.
    ///
    /// # Arguments
    ///
    /// * `db_path` - Path to the SQLite database file
    /// * `max_size` - Maximum number of connections in the pool
    /// * `busy_timeout` - Wait applied by SQLite to locked statements
    /// * `acquire_timeout` - Upper bound on how long [`take`](Self::take) blocks
    pub fn with_options<P: AsRef<Path>>(
        db_path: P,
        max_size: u32,
        busy_timeout: Duration,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX);

        let pool = Pool::builder()
            .max_size(max_size)
            .connection_timeout(acquire_timeout)
            .connection_customizer(Box::new(ArchiveConnectionCustomizer { busy_timeout }))
            .build(manager)?;

        Ok(Self { pool })
    }

    /// Take exclusive use of one connection.
    ///
    /// Blocks while every connection is in use.
    pub fn take(&self) -> Result<PooledConn, StoreError> {
        Ok(self.pool.get()?)
    }

    /// Run blocking work against a pooled connection off the async runtime.
    ///
    /// The connection is returned to the pool when `f` finishes or fails.
    pub async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.take()?;
            f(&mut *conn)
        })
        .await?
    }

    /// Get the current pool state for monitoring.
    pub fn state(&self) -> r2d2::State {
        self.pool.state()
    }

    pub fn max_size(&self) -> u32 {
        self.pool.max_size()
    }
}

/// Connection customizer that applies archive pragmas.
#[derive(Debug)]
struct ArchiveConnectionCustomizer {
    busy_timeout: Duration,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ArchiveConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(self.busy_timeout)?;
        apply_pragmas(conn)
    }
}
