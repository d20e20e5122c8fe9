//! Migrate command implementation.

use anyhow::Result;
use chat_archive::storage::schema::current_version;
use chat_archive::Archive;
use serde::Serialize;

use crate::OutputFormat;

#[derive(Serialize)]
struct MigrateOutput {
    version: u32,
}

/// Opening the archive already migrated it; report where it ended up.
pub async fn run(archive: &Archive, format: OutputFormat) -> Result<()> {
    let version = archive.pool().run(|conn| current_version(conn)).await?;
    let output = MigrateOutput { version };

    match format {
        OutputFormat::Text => println!("Archive is at schema version {}", output.version),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
    }

    Ok(())
}
