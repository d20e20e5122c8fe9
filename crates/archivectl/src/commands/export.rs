//! Export command implementation.

use anyhow::{Context, Result};
use chat_archive::Archive;
use futures::StreamExt;
use std::io::Write;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use super::FilterArgs;

/// Stream matching messages to stdout, one JSON object per line.
///
/// Ctrl+C stops the export after the message in flight.
pub async fn run(archive: &Archive, filter: &FilterArgs) -> Result<()> {
    let cancel = CancellationToken::new();
    let stream = archive.messages().get(filter.to_filter().as_ref(), cancel.clone());
    tokio::pin!(stream);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut exported: u64 = 0;

    loop {
        tokio::select! {
            _ = signal::ctrl_c(), if !cancel.is_cancelled() => cancel.cancel(),
            item = stream.next() => {
                let Some(item) = item else { break };
                match item {
                    Ok(message) => {
                        serde_json::to_writer(&mut out, &message)?;
                        writeln!(out)?;
                        exported += 1;
                    }
                    Err(e) if e.is_cancelled() => {
                        eprintln!("Export interrupted");
                        break;
                    }
                    Err(e) => return Err(e).context("failed to read messages"),
                }
            }
        }
    }

    out.flush()?;
    eprintln!("Exported {exported} message(s)");
    Ok(())
}
