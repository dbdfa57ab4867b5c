//! # stagetrack CLI Module
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `init` - Initialize a new database
//! - `scan` - Record raw label scans
//! - `ingest` - Record scans from a file
//! - `show` - Show one record
//! - `list` - List records
//! - `summary` - Per-status counts
//! - `derive` - Evaluate the engine on ad-hoc stage times
//! - `rederive` - Repair stale derived fields
//! - `clear` - Remove a stage observation or a whole record
//! - `export` - Export a snapshot file
//! - `import` - Import a snapshot file
//! - `hash` - BLAKE3 hash of the snapshot
//! - `replay` - Apply unsynced journal entries

mod commands;

use crate::config::{Backend, Config};
use clap::{Parser, Subcommand, ValueEnum};
use stagetrack_core::TrackError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// stagetrack - barcode stage tracking
///
/// Records label scans for items moving through a six-stage production
/// pipeline and derives each item's current status.
#[derive(Parser, Debug)]
#[command(name = "stagetrack")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the database (overrides config)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend (overrides config)
    #[arg(short = 'B', long, global = true, value_enum)]
    pub backend: Option<Backend>,

    /// Path to a TOML config file (default: ./stagetrack.toml if present)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Input file formats for `ingest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IngestFormat {
    /// JSON array of `{"raw", "at", "device"}` objects
    Json,
    /// One scan per line: `RAW [TIMESTAMP]`
    Text,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to (overrides config)
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Initialize a new empty database
    Init {
        /// Overwrite an existing database
        #[arg(short, long)]
        force: bool,
    },

    /// Record one or more raw label scans
    Scan {
        /// Raw label text, e.g. 3@Rich-07212025-05
        #[arg(required = true)]
        raw: Vec<String>,

        /// Scan time, RFC 3339 or epoch milliseconds (default: now)
        #[arg(long)]
        at: Option<String>,

        /// Reader that produced the scan
        #[arg(long)]
        device: Option<String>,
    },

    /// Record scans from a file
    Ingest {
        /// Path to the input file
        #[arg(short, long)]
        file: PathBuf,

        /// Input format
        #[arg(short = 't', long, value_enum, default_value = "json")]
        format: IngestFormat,
    },

    /// Show one record
    Show {
        /// Barcode without stage prefix
        barcode: String,
    },

    /// List records, most recently active first
    List {
        /// Only records at this status (barcode order)
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of records
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Per-status counts
    Summary,

    /// Evaluate the engine on ad-hoc stage times
    Derive {
        #[arg(long)]
        scheduled: Option<String>,
        #[arg(long)]
        cut: Option<String>,
        #[arg(long)]
        cleaned: Option<String>,
        #[arg(long)]
        stored: Option<String>,
        #[arg(long)]
        partially_shipped: Option<String>,
        #[arg(long)]
        shipped: Option<String>,
    },

    /// Recompute derived fields for every stored record
    Rederive,

    /// Remove one stage observation, or the whole record without --stage
    Clear {
        /// Barcode without stage prefix
        barcode: String,

        /// Stage to clear (snake_case name)
        #[arg(short, long)]
        stage: Option<String>,
    },

    /// Export a snapshot file
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Import a snapshot file, replacing records with the same barcode
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Compute BLAKE3 hash of the snapshot
    Hash,

    /// Apply unsynced journal entries to the store
    Replay {
        /// Journal directory (overrides config)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Resolve configuration from file, environment and flags.
pub fn resolve_config(cli: &Cli) -> Result<Config, TrackError> {
    Ok(Config::load(cli.config.as_deref())?
        .apply_env()?
        .with_overrides(cli.database.clone(), cli.backend))
}

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), TrackError> {
    let config = resolve_config(&cli)?;
    let json_mode = cli.json_mode;

    tracing::debug!(?config, "Resolved configuration");

    match cli.command {
        Some(Commands::Server { host, port }) => cmd_server(&config, host, port).await,
        Some(Commands::Init { force }) => cmd_init(&config, force),
        Some(Commands::Scan { raw, at, device }) => {
            cmd_scan(&config, json_mode, &raw, at.as_deref(), device.as_deref())
        }
        Some(Commands::Ingest { file, format }) => cmd_ingest(&config, json_mode, &file, format),
        Some(Commands::Show { barcode }) => cmd_show(&config, json_mode, &barcode),
        Some(Commands::List { status, limit }) => {
            cmd_list(&config, json_mode, status.as_deref(), limit)
        }
        Some(Commands::Summary) | None => cmd_summary(&config, json_mode),
        Some(Commands::Derive {
            scheduled,
            cut,
            cleaned,
            stored,
            partially_shipped,
            shipped,
        }) => cmd_derive(
            json_mode,
            &crate::api::DeriveRequest {
                scheduled,
                cut,
                cleaned,
                stored,
                partially_shipped,
                shipped,
            },
        ),
        Some(Commands::Rederive) => cmd_rederive(&config, json_mode),
        Some(Commands::Clear { barcode, stage }) => {
            cmd_clear(&config, json_mode, &barcode, stage.as_deref())
        }
        Some(Commands::Export { output }) => cmd_export(&config, &output),
        Some(Commands::Import { input }) => cmd_import(&config, &input),
        Some(Commands::Hash) => cmd_hash(&config, json_mode),
        Some(Commands::Replay { dir }) => cmd_replay(&config, json_mode, dir),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::panic)]
    fn parses_scan_command() {
        let cli = Cli::try_parse_from([
            "stagetrack",
            "-B",
            "file",
            "scan",
            "0@A",
            "1@A",
            "--device",
            "COM3",
        ])
        .expect("parse");
        assert_eq!(cli.backend, Some(Backend::File));
        match cli.command {
            Some(Commands::Scan { raw, device, at }) => {
                assert_eq!(raw, vec!["0@A", "1@A"]);
                assert_eq!(device.as_deref(), Some("COM3"));
                assert!(at.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn scan_requires_a_label() {
        assert!(Cli::try_parse_from(["stagetrack", "scan"]).is_err());
    }

    #[test]
    fn rejects_unknown_backend() {
        assert!(Cli::try_parse_from(["stagetrack", "-B", "sqlite", "summary"]).is_err());
    }

    #[test]
    fn cli_flags_override_config() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("cfg.toml");
        std::fs::write(&path, "database = \"from-file.db\"\nbackend = \"file\"\n").expect("write");

        let cli = Cli::try_parse_from([
            "stagetrack",
            "--config",
            path.to_str().expect("utf8 path"),
            "-D",
            "flag.db",
            "summary",
        ])
        .expect("parse");
        let config = resolve_config(&cli).expect("config");
        assert_eq!(config.database, PathBuf::from("flag.db"));
        assert_eq!(config.backend, Backend::File);
    }
}
