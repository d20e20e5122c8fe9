//! Configuration for the archive.
//!
//! Supports:
//! - CLI arguments via clap (flattened into binaries)
//! - Environment variable overrides
//! - Sensible defaults for quick start

use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

/// Options controlling how the archive store is opened.
#[derive(Args, Debug, Clone)]
pub struct ArchiveConfig {
    /// Path to the SQLite archive file
    #[arg(long, env = "ARCHIVE_DB_PATH", default_value = "./archive.db")]
    pub db_path: PathBuf,

    /// Number of pooled connections (bounds concurrent store operations)
    #[arg(long, env = "ARCHIVE_POOL_SIZE", default_value_t = 4)]
    pub pool_size: u32,

    /// How long a statement waits on a locked database before failing
    #[arg(long, env = "ARCHIVE_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    pub busy_timeout_ms: u64,

    /// How long taking a connection from an exhausted pool may block
    #[arg(long, env = "ARCHIVE_ACQUIRE_TIMEOUT_SECS", default_value_t = 3600)]
    pub acquire_timeout_secs: u64,

    /// Messages buffered ahead of a streaming reader
    #[arg(long, env = "ARCHIVE_STREAM_BUFFER", default_value_t = 64)]
    pub stream_buffer: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Write logs as JSON lines instead of text
    #[arg(long, env = "ARCHIVE_LOG_JSON")]
    pub log_json: bool,

    /// OpenTelemetry collector endpoint for metrics export (optional)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,
}

impl ArchiveConfig {
    /// Default configuration for the given archive file.
    pub fn for_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Create a small configuration for testing.
    #[cfg(test)]
    pub fn test_config(db_path: PathBuf) -> Self {
        Self {
            db_path,
            pool_size: 2,
            busy_timeout_ms: 1000,
            acquire_timeout_secs: 5,
            stream_buffer: 4,
            log_level: "debug".into(),
            log_json: false,
            otel_endpoint: None,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./archive.db"),
            pool_size: 4,
            busy_timeout_ms: 5000,
            acquire_timeout_secs: 3600,
            stream_buffer: 64,
            log_level: "info".into(),
            log_json: false,
            otel_endpoint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        archive: ArchiveConfig,
    }

    #[test]
    fn test_default_config() {
        let config = ArchiveConfig::default();
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.acquire_timeout(), Duration::from_secs(3600));
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from(["archive", "--db-path", "/tmp/x.db", "--pool-size", "8"]);
        assert_eq!(cli.archive.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(cli.archive.pool_size, 8);
        assert_eq!(cli.archive.busy_timeout(), Duration::from_millis(5000));
    }
}
