//! Test utilities and archive harness for chat archive tests.
//!
//! Provides:
//! - Temporary archive files
//! - An opened archive seeded with a server, channels and users
//! - Message builders

#![allow(dead_code)]

use chat_archive::observability::tracing::init_test_tracing;
use chat_archive::{Archive, ArchiveConfig, Attachment, Channel, Message, Server, ServerKind, User};
use std::path::PathBuf;
use tempfile::TempDir;

pub const SERVER_ID: i64 = 1;
pub const CHANNELS: [i64; 2] = [10, 11];
pub const USERS: [i64; 2] = [100, 101];

/// Test fixture that manages a temporary archive directory.
///
/// The directory is automatically cleaned up when the fixture is dropped.
pub struct TestFixture {
    /// Temporary directory for the archive file
    pub temp_dir: TempDir,
    /// Path to the archive file
    pub db_path: PathBuf,
}

impl TestFixture {
    pub fn new() -> Self {
        init_test_tracing();
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let db_path = temp_dir.path().join("archive.db");
        Self { temp_dir, db_path }
    }

    /// A small configuration for this fixture's archive file.
    pub fn config(&self) -> ArchiveConfig {
        ArchiveConfig {
            pool_size: 2,
            busy_timeout_ms: 1000,
            acquire_timeout_secs: 10,
            stream_buffer: 4,
            ..ArchiveConfig::for_path(&self.db_path)
        }
    }

    /// Open the archive without seeding it.
    pub async fn open(&self) -> Archive {
        Archive::open(&self.config()).await.expect("failed to open archive")
    }

    /// Open the archive and store the server, channels and users messages
    /// reference.
    pub async fn open_seeded(&self) -> Archive {
        let archive = self.open().await;
        let directory = archive.directory();

        directory
            .add_servers(vec![Server {
                id: SERVER_ID,
                name: "Test Server".into(),
                kind: ServerKind::Server,
            }])
            .await
            .expect("seed servers");
        directory
            .add_channels(CHANNELS.iter().map(|&id| channel(id)).collect())
            .await
            .expect("seed channels");
        directory
            .add_users(USERS.iter().map(|&id| user(id)).collect())
            .await
            .expect("seed users");

        archive
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

pub fn channel(id: i64) -> Channel {
    Channel {
        id,
        server: SERVER_ID,
        name: format!("channel-{id}"),
        parent_id: None,
        position: Some(0),
        topic: None,
        nsfw: None,
    }
}

pub fn user(id: i64) -> User {
    User {
        id,
        name: format!("user-{id}"),
        display_name: None,
        avatar_url: None,
        discriminator: Some("0001".into()),
    }
}

/// A message from the first user in the first channel.
pub fn message(id: i64) -> Message {
    Message::new(id, USERS[0], CHANNELS[0], format!("message {id}"), 1_000 * id)
}

pub fn attachment(id: i64) -> Attachment {
    Attachment {
        id,
        name: format!("file{id}.bin"),
        content_type: None,
        normalized_url: format!("https://cdn.test/attachments/{id}"),
        download_url: format!("https://cdn.test/attachments/{id}?sig=abc"),
        size: 1024,
        width: None,
        height: None,
    }
}

/// Wait for a condition to become true with timeout.
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: std::time::Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}
