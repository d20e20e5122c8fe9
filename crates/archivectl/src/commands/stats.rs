//! Stats command implementation.

use anyhow::{Context, Result};
use chat_archive::{AggregateRecomputer, Archive};
use serde::Serialize;
use std::time::Duration;

use crate::OutputFormat;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct StatsOutput {
    users: u64,
    channels: u64,
    messages: u64,
    attachments: u64,
}

pub async fn run(archive: &Archive, format: OutputFormat) -> Result<()> {
    let output = StatsOutput {
        users: archive.directory().count_users().await?,
        channels: archive.directory().count_channels().await?,
        messages: settled(archive.total_messages()).await?,
        attachments: settled(archive.total_attachments()).await?,
    };

    match format {
        OutputFormat::Text => {
            println!("{:<12} {:>12}", "Users", output.users);
            println!("{:<12} {:>12}", "Channels", output.channels);
            println!("{:<12} {:>12}", "Messages", output.messages);
            println!("{:<12} {:>12}", "Attachments", output.attachments);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Wait for the first computation the archive scheduled on open.
async fn settled(aggregate: &AggregateRecomputer<u64>) -> Result<u64> {
    let mut rx = aggregate.subscribe();
    let value = *tokio::time::timeout(SETTLE_TIMEOUT, rx.wait_for(Option::is_some))
        .await
        .with_context(|| format!("timed out waiting for {}", aggregate.name()))?
        .with_context(|| format!("{} worker stopped", aggregate.name()))?;
    Ok(value.unwrap_or_default())
}
