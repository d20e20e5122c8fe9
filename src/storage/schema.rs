//! Schema versioning and migrations.
//!
//! The store records its version in the `metadata` table. Pending steps are
//! applied strictly in ascending order, each in its own transaction, and the
//! stored version only advances when a step commits.
//!
//! SQLite cannot add a foreign key to an existing table, so several steps
//! rebuild tables: create a shadow table with the constraints, copy every row,
//! drop the original and rename the shadow into place.

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::model::PLATFORM_USER_ID;

/// Version produced by the last migration step.
pub const LATEST_VERSION: u32 = 4;

/// Receives progress as migration steps start.
pub trait MigrationProgress {
    /// Called before step `step` (1-based) of `total` pending steps runs.
    fn report(&mut self, step: usize, total: usize, description: &str);
}

impl<F> MigrationProgress for F
where
    F: FnMut(usize, usize, &str),
{
    fn report(&mut self, step: usize, total: usize, description: &str) {
        self(step, total, description);
    }
}

/// Reports migration progress through the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl MigrationProgress for LogProgress {
    fn report(&mut self, step: usize, total: usize, description: &str) {
        info!(step, total, description, "Migrating archive schema");
    }
}

struct Migration {
    version: u32,
    description: &'static str,
    apply: fn(&Transaction<'_>) -> Result<(), StoreError>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Creating archive tables",
        apply: create_base_tables,
    },
    Migration {
        version: 2,
        description: "Adding channel and message foreign keys",
        apply: add_message_owner_keys,
    },
    Migration {
        version: 3,
        description: "Adding message child foreign keys",
        apply: add_message_child_keys,
    },
    Migration {
        version: 4,
        description: "Creating lookup indices",
        apply: create_lookup_indices,
    },
];

/// Apply per-connection pragmas: foreign keys, WAL journal, normal sync.
pub fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

/// Read the stored schema version; 0 for a store that was never migrated.
pub fn current_version(conn: &Connection) -> Result<u32, StoreError> {
    let has_metadata: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'metadata')",
        [],
        |row| row.get(0),
    )?;
    if !has_metadata {
        return Ok(0);
    }

    let version: Option<u32> = conn
        .query_row(
            "SELECT CAST(value AS INTEGER) FROM metadata WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version.unwrap_or(0))
}

/// Bring the store to [`LATEST_VERSION`].
///
/// Returns the version the store is at afterwards.
pub fn migrate(conn: &mut Connection, progress: &mut dyn MigrationProgress) -> Result<u32, StoreError> {
    migrate_to(conn, LATEST_VERSION, progress)
}

/// Apply pending steps up to and including `target`.
pub fn migrate_to(
    conn: &mut Connection,
    target: u32,
    progress: &mut dyn MigrationProgress,
) -> Result<u32, StoreError> {
    let current = current_version(conn)?;
    if current > LATEST_VERSION {
        return Err(StoreError::UnsupportedVersion {
            found: current,
            latest: LATEST_VERSION,
        });
    }

    let pending: Vec<&Migration> = MIGRATIONS
        .iter()
        .filter(|m| m.version > current && m.version <= target)
        .collect();
    if pending.is_empty() {
        debug!(version = current, "Archive schema is up to date");
        return Ok(current);
    }

    // Rebuilding a parent table with enforcement on would cascade the DROP
    // into its children. Violations are checked explicitly per rebuild instead.
    conn.pragma_update(None, "foreign_keys", false)?;
    let result = apply_pending(conn, &pending, progress);
    conn.pragma_update(None, "foreign_keys", true)?;

    let version = result?;
    info!(from = current, to = version, "Archive schema migrated");
    Ok(version)
}

fn apply_pending(
    conn: &mut Connection,
    pending: &[&Migration],
    progress: &mut dyn MigrationProgress,
) -> Result<u32, StoreError> {
    let total = pending.len();
    let mut version = 0;

    for (index, migration) in pending.iter().enumerate() {
        progress.report(index + 1, total, migration.description);

        let failed = |source: StoreError| StoreError::Migration {
            version: migration.version,
            source: Box::new(source),
        };

        let tx = conn.transaction().map_err(|e| failed(e.into()))?;
        (migration.apply)(&tx)
            .and_then(|()| set_version(&tx, migration.version))
            .map_err(failed)?;
        tx.commit().map_err(|e| failed(e.into()))?;

        debug!(version = migration.version, "Migration step committed");
        version = migration.version;
    }

    Ok(version)
}

fn set_version(tx: &Transaction<'_>, version: u32) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO metadata (key, value) VALUES ('version', ?1)
         ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        params![version.to_string()],
    )?;
    Ok(())
}

fn create_base_tables(tx: &Transaction<'_>) -> Result<(), StoreError> {
    tx.execute_batch(
        r#"
        CREATE TABLE metadata (
            key   TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL
        );

        CREATE TABLE users (
            id            INTEGER PRIMARY KEY NOT NULL,
            name          TEXT NOT NULL,
            display_name  TEXT,
            avatar_url    TEXT,
            discriminator TEXT
        );

        CREATE TABLE servers (
            id   INTEGER PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            type TEXT NOT NULL
        );

        CREATE TABLE channels (
            id        INTEGER PRIMARY KEY NOT NULL,
            server    INTEGER NOT NULL,
            name      TEXT NOT NULL,
            parent_id INTEGER,
            position  INTEGER,
            topic     TEXT,
            nsfw      INTEGER
        );

        CREATE TABLE messages (
            message_id INTEGER PRIMARY KEY NOT NULL,
            sender_id  INTEGER NOT NULL,
            channel_id INTEGER NOT NULL,
            text       TEXT NOT NULL,
            timestamp  INTEGER NOT NULL
        );

        CREATE TABLE edit_timestamps (
            message_id     INTEGER PRIMARY KEY NOT NULL,
            edit_timestamp INTEGER NOT NULL
        );

        CREATE TABLE replied_to (
            message_id    INTEGER PRIMARY KEY NOT NULL,
            replied_to_id INTEGER NOT NULL
        );

        CREATE TABLE attachments (
            message_id     INTEGER NOT NULL,
            attachment_id  INTEGER PRIMARY KEY NOT NULL,
            name           TEXT NOT NULL,
            type           TEXT,
            normalized_url TEXT NOT NULL,
            download_url   TEXT NOT NULL,
            size           INTEGER NOT NULL,
            width          INTEGER,
            height         INTEGER
        );

        CREATE TABLE embeds (
            message_id INTEGER NOT NULL,
            json       TEXT NOT NULL
        );

        CREATE TABLE reactions (
            message_id  INTEGER NOT NULL,
            emoji_id    INTEGER,
            emoji_name  TEXT,
            emoji_flags INTEGER NOT NULL,
            count       INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn add_message_owner_keys(tx: &Transaction<'_>) -> Result<(), StoreError> {
    // Replies to platform-authored messages need an owner that exists.
    tx.execute(
        "INSERT INTO users (id, name, display_name, avatar_url, discriminator)
         VALUES (?1, 'Platform', 'Platform', NULL, '0')
         ON CONFLICT (id) DO NOTHING",
        params![PLATFORM_USER_ID],
    )?;

    rebuild_with_constraints(
        tx,
        &TableRebuild {
            table: "channels",
            columns: "id, server, name, parent_id, position, topic, nsfw",
            definition: r#"
                id        INTEGER PRIMARY KEY NOT NULL,
                server    INTEGER NOT NULL,
                name      TEXT NOT NULL,
                parent_id INTEGER,
                position  INTEGER,
                topic     TEXT,
                nsfw      INTEGER,
                FOREIGN KEY (server) REFERENCES servers (id) ON UPDATE CASCADE ON DELETE CASCADE
            "#,
        },
    )?;

    rebuild_with_constraints(
        tx,
        &TableRebuild {
            table: "messages",
            columns: "message_id, sender_id, channel_id, text, timestamp",
            definition: r#"
                message_id INTEGER PRIMARY KEY NOT NULL,
                sender_id  INTEGER NOT NULL,
                channel_id INTEGER NOT NULL,
                text       TEXT NOT NULL,
                timestamp  INTEGER NOT NULL,
                FOREIGN KEY (sender_id) REFERENCES users (id) ON UPDATE CASCADE ON DELETE CASCADE,
                FOREIGN KEY (channel_id) REFERENCES channels (id) ON UPDATE CASCADE ON DELETE CASCADE
            "#,
        },
    )
}

fn add_message_child_keys(tx: &Transaction<'_>) -> Result<(), StoreError> {
    const REBUILDS: &[TableRebuild] = &[
        TableRebuild {
            table: "edit_timestamps",
            columns: "message_id, edit_timestamp",
            definition: r#"
                message_id     INTEGER PRIMARY KEY NOT NULL,
                edit_timestamp INTEGER NOT NULL,
                FOREIGN KEY (message_id) REFERENCES messages (message_id) ON UPDATE CASCADE ON DELETE CASCADE
            "#,
        },
        TableRebuild {
            table: "replied_to",
            columns: "message_id, replied_to_id",
            // The target is checked at commit so one batch can hold a reply and its target.
            definition: r#"
                message_id    INTEGER PRIMARY KEY NOT NULL,
                replied_to_id INTEGER NOT NULL,
                FOREIGN KEY (message_id) REFERENCES messages (message_id) ON UPDATE CASCADE ON DELETE CASCADE,
                FOREIGN KEY (replied_to_id) REFERENCES messages (message_id) ON UPDATE CASCADE ON DELETE CASCADE
                    DEFERRABLE INITIALLY DEFERRED
            "#,
        },
        TableRebuild {
            table: "attachments",
            columns: "message_id, attachment_id, name, type, normalized_url, download_url, size, width, height",
            definition: r#"
                message_id     INTEGER NOT NULL,
                attachment_id  INTEGER PRIMARY KEY NOT NULL,
                name           TEXT NOT NULL,
                type           TEXT,
                normalized_url TEXT NOT NULL,
                download_url   TEXT NOT NULL,
                size           INTEGER NOT NULL,
                width          INTEGER,
                height         INTEGER,
                FOREIGN KEY (message_id) REFERENCES messages (message_id) ON UPDATE CASCADE ON DELETE CASCADE
            "#,
        },
        TableRebuild {
            table: "embeds",
            columns: "message_id, json",
            definition: r#"
                message_id INTEGER NOT NULL,
                json       TEXT NOT NULL,
                FOREIGN KEY (message_id) REFERENCES messages (message_id) ON UPDATE CASCADE ON DELETE CASCADE
            "#,
        },
        TableRebuild {
            table: "reactions",
            columns: "message_id, emoji_id, emoji_name, emoji_flags, count",
            definition: r#"
                message_id  INTEGER NOT NULL,
                emoji_id    INTEGER,
                emoji_name  TEXT,
                emoji_flags INTEGER NOT NULL,
                count       INTEGER NOT NULL,
                FOREIGN KEY (message_id) REFERENCES messages (message_id) ON UPDATE CASCADE ON DELETE CASCADE
            "#,
        },
    ];

    for rebuild in REBUILDS {
        rebuild_with_constraints(tx, rebuild)?;
    }
    Ok(())
}

fn create_lookup_indices(tx: &Transaction<'_>) -> Result<(), StoreError> {
    tx.execute_batch(
        r#"
        CREATE INDEX attachments_message_ix ON attachments (message_id);
        CREATE INDEX attachments_url_ix ON attachments (normalized_url);
        CREATE INDEX embeds_message_ix ON embeds (message_id);
        CREATE INDEX reactions_message_ix ON reactions (message_id);
        CREATE INDEX replied_to_target_ix ON replied_to (replied_to_id);
        CREATE INDEX messages_channel_ix ON messages (channel_id);
        CREATE INDEX messages_sender_ix ON messages (sender_id);
        CREATE INDEX messages_timestamp_ix ON messages (timestamp);
        CREATE INDEX channels_server_ix ON channels (server);
        "#,
    )?;
    Ok(())
}

/// A table to rebuild with new constraints.
struct TableRebuild {
    table: &'static str,
    /// Columns copied verbatim from the original table.
    columns: &'static str,
    /// Column and constraint list of the rebuilt table.
    definition: &'static str,
}

/// Swap `rebuild.table` for a copy carrying the new constraints.
///
/// Rows that would violate the new foreign keys abort the step; nothing is
/// dropped silently.
fn rebuild_with_constraints(tx: &Transaction<'_>, rebuild: &TableRebuild) -> Result<(), StoreError> {
    let &TableRebuild {
        table,
        columns,
        definition,
    } = rebuild;
    let shadow = format!("{table}_shadow");

    tx.execute_batch(&format!("CREATE TABLE {shadow} ({definition})"))?;
    let copied = tx.execute(
        &format!("INSERT INTO {shadow} ({columns}) SELECT {columns} FROM {table}"),
        [],
    )?;

    let original: i64 = tx.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    let original = usize::try_from(original).unwrap_or_default();
    if copied != original {
        return Err(StoreError::RebuildMismatch {
            table,
            original,
            copied,
        });
    }

    let violations = {
        let mut stmt = tx.prepare(&format!("PRAGMA foreign_key_check({shadow})"))?;
        let mut rows = stmt.query([])?;
        let mut count = 0;
        while rows.next()?.is_some() {
            count += 1;
        }
        count
    };
    if violations > 0 {
        return Err(StoreError::OrphanedRows {
            table,
            count: violations,
        });
    }

    tx.execute_batch(&format!("DROP TABLE {table}; ALTER TABLE {shadow} RENAME TO {table};"))?;
    debug!(table, rows = copied, "Rebuilt table with foreign keys");
    Ok(())
}
