//! Startup composition of the storage layer.
//!
//! The schema is migrated on a dedicated connection before any pool exists,
//! so no pooled operation can ever observe a partially migrated store.

use rusqlite::Connection;
use std::sync::Arc;
use tracing::info;

use crate::aggregate::AggregateRecomputer;
use crate::config::ArchiveConfig;
use crate::error::StoreError;
use crate::storage::directory::DirectoryRepository;
use crate::storage::messages::MessageRepository;
use crate::storage::pool::ConnectionPool;
use crate::storage::schema::{apply_pragmas, migrate, LogProgress, MigrationProgress};

/// An opened, migrated archive.
#[derive(Clone)]
pub struct Archive {
    pool: ConnectionPool,
    messages: MessageRepository,
    directory: DirectoryRepository,
}

impl Archive {
    /// Open (creating if needed) and migrate the archive described by `config`.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(config: &ArchiveConfig) -> Result<Self, StoreError> {
        Self::open_with_progress(config, LogProgress).await
    }

    /// Like [`open`](Self::open), reporting each migration step to `progress`.
    #[tracing::instrument(skip_all, fields(path = %config.db_path.display()))]
    pub async fn open_with_progress<P>(config: &ArchiveConfig, mut progress: P) -> Result<Self, StoreError>
    where
        P: MigrationProgress + Send + 'static,
    {
        let path = config.db_path.clone();
        let version = tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&path)?;
            apply_pragmas(&conn)?;
            migrate(&mut conn, &mut progress)
        })
        .await??;

        let pool = ConnectionPool::new(config)?;
        let messages = MessageRepository::new(pool.clone(), config.stream_buffer);
        let directory = DirectoryRepository::new(pool.clone());

        messages.total_messages().recompute();
        messages.total_attachments().recompute();

        info!(version, pool_size = pool.max_size(), "Archive opened");

        Ok(Self {
            pool,
            messages,
            directory,
        })
    }

    pub fn messages(&self) -> &MessageRepository {
        &self.messages
    }

    pub fn directory(&self) -> &DirectoryRepository {
        &self.directory
    }

    /// Total number of archived messages.
    pub fn total_messages(&self) -> &Arc<AggregateRecomputer<u64>> {
        self.messages.total_messages()
    }

    /// Number of distinct archived attachment files.
    pub fn total_attachments(&self) -> &Arc<AggregateRecomputer<u64>> {
        self.messages.total_attachments()
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}
