//! SQLite storage layer for the archive.
//!
//! Provides:
//! - Connection pool with integrity and durability pragmas
//! - Versioned schema migrations, including constraint retrofits
//! - Filter compilation into SQL predicates
//! - Message and directory repositories

pub mod directory;
pub mod filter;
pub mod messages;
pub mod pool;
pub mod schema;
