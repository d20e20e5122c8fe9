//! Chat Archive: the local archive layer of a chat-history capture tool.
//!
//! Captured conversations (messages with their attachments, embeds, reactions,
//! edit history and reply links) are persisted into a single SQLite file and
//! served back as filtered, streamed reads.
//!
//! # Architecture
//!
//! - **Migrated before use**: the schema is brought to the latest version on a
//!   dedicated connection before the pool is handed out
//! - **Pooled**: every operation borrows one connection from an r2d2 pool
//! - **Streaming**: reads compose parent and child rows lazily, one message at a time
//! - **Coalesced aggregates**: derived totals refresh off the write path
//!
//! # Modules
//!
//! - [`aggregate`]: Single-flight, coalesced cache of a derived value
//! - [`archive`]: Startup composition of the storage layer
//! - [`config`]: CLI and environment configuration
//! - [`error`]: Error types shared by the storage layer
//! - [`model`]: Messages and their child entities
//! - [`observability`]: Metrics and tracing setup
//! - [`storage`]: SQLite persistence layer

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // storage::messages::MessageRepository is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::needless_raw_string_hashes, // r#""# is fine for SQL
    clippy::similar_names,              // msg/msgs/message are fine
    clippy::too_many_lines              // Some functions are inherently long
)]

pub mod aggregate;
pub mod archive;
pub mod config;
pub mod error;
pub mod model;
pub mod observability;
pub mod storage;

pub use aggregate::AggregateRecomputer;
pub use archive::Archive;
pub use config::ArchiveConfig;
pub use error::{FilterError, StoreError};
pub use model::{Attachment, Channel, EmojiFlags, Embed, Message, Reaction, Server, ServerKind, User};
pub use storage::directory::DirectoryRepository;
pub use storage::filter::MessageFilter;
pub use storage::messages::{MessageRepository, RemovalMode};
