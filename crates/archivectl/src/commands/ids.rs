//! Ids command implementation.

use anyhow::{Context, Result};
use chat_archive::Archive;
use futures::TryStreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::FilterArgs;
use crate::OutputFormat;

#[derive(Serialize)]
struct IdsOutput {
    ids: Vec<i64>,
    total: usize,
}

pub async fn run(archive: &Archive, filter: &FilterArgs, format: OutputFormat) -> Result<()> {
    let ids: Vec<i64> = archive
        .messages()
        .get_ids(filter.to_filter().as_ref(), CancellationToken::new())
        .try_collect()
        .await
        .context("failed to read message ids")?;

    match format {
        OutputFormat::Text => {
            for id in &ids {
                println!("{id}");
            }
        }
        OutputFormat::Json => {
            let output = IdsOutput {
                total: ids.len(),
                ids,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
