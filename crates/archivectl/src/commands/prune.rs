//! Prune command implementation.

use anyhow::{bail, Result};
use chat_archive::{Archive, RemovalMode};
use serde::Serialize;

use super::FilterArgs;
use crate::OutputFormat;

#[derive(Serialize)]
struct PruneOutput {
    mode: &'static str,
    removed: usize,
}

pub async fn run(archive: &Archive, filter: &FilterArgs, keep: bool, format: OutputFormat) -> Result<()> {
    // An empty filter would select everything (or nothing with --keep).
    let Some(filter) = filter.to_filter() else {
        bail!("prune needs at least one filter flag");
    };

    let mode = if keep {
        RemovalMode::KeepMatching
    } else {
        RemovalMode::Matching
    };
    let removed = archive.messages().remove(&filter, mode).await?;

    let output = PruneOutput {
        mode: if keep { "keep-matching" } else { "matching" },
        removed,
    };

    match format {
        OutputFormat::Text => println!("Removed {} message(s)", output.removed),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
    }

    Ok(())
}
