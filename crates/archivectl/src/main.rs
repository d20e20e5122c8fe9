//! archivectl: maintenance command-line interface for chat archives.
//!
//! Opens (and migrates) an archive file, then reports totals, exports
//! messages, lists message ids or prunes messages selected by a filter.

mod commands;

use anyhow::{Context, Result};
use chat_archive::observability::{metrics::init_metrics_with_endpoint, tracing::init_tracing};
use chat_archive::{Archive, ArchiveConfig};
use clap::{Parser, Subcommand};

use commands::FilterArgs;

/// Maintenance command-line interface for chat archives.
#[derive(Parser)]
#[command(name = "archivectl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    archive: ArchiveConfig,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text", global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown output format: {s}")),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the archive and report its schema version
    Migrate,
    /// Show user, channel, message and attachment totals
    Stats,
    /// Print matching messages as JSON lines
    Export {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Print ids of matching messages
    Ids {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Delete messages selected by a filter
    Prune {
        #[command(flatten)]
        filter: FilterArgs,
        /// Keep the matching messages and delete everything else
        #[arg(long)]
        keep: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing("archivectl", &cli.archive.log_level, cli.archive.log_json);
    init_metrics_with_endpoint(cli.archive.otel_endpoint.as_deref());

    let archive = Archive::open(&cli.archive)
        .await
        .with_context(|| format!("failed to open archive {}", cli.archive.db_path.display()))?;

    match cli.command {
        Commands::Migrate => commands::migrate::run(&archive, cli.output).await?,
        Commands::Stats => commands::stats::run(&archive, cli.output).await?,
        Commands::Export { filter } => commands::export::run(&archive, &filter).await?,
        Commands::Ids { filter } => commands::ids::run(&archive, &filter, cli.output).await?,
        Commands::Prune { filter, keep } => {
            commands::prune::run(&archive, &filter, keep, cli.output).await?;
        }
    }

    Ok(())
}
