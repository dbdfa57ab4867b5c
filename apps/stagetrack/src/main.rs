//! # stagetrack
//!
//! Barcode stage tracking for a six-stage production pipeline.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                 apps/stagetrack (THE BINARY)              │
//! │                                                           │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────┐   │
//! │  │   CLI       │    │   HTTP API  │    │ Scan journal │   │
//! │  │  (clap)     │    │   (axum)    │    │  (jsonl)     │   │
//! │  └──────┬──────┘    └──────┬──────┘    └──────┬───────┘   │
//! │         └──────────────────┼──────────────────┘           │
//! │                            ▼                              │
//! │                  ┌──────────────────┐                     │
//! │                  │ stagetrack-core  │                     │
//! │                  │  (THE ENGINE)    │                     │
//! │                  └──────────────────┘                     │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! stagetrack server --host 0.0.0.0 --port 8080
//!
//! # CLI operations
//! stagetrack scan 3@Rich-07212025-05 --device COM3
//! stagetrack show Rich-07212025-05
//! stagetrack list --status stored
//! stagetrack summary
//! ```

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = stagetrack::cli::Cli::parse();

    init_tracing(cli.verbose);

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = stagetrack::cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// STAGETRACK_LOG_FORMAT=json switches to JSON lines; RUST_LOG overrides the filter.
fn init_tracing(verbose: bool) {
    let log_format = std::env::var("STAGETRACK_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if verbose {
        "stagetrack=debug,stagetrack_core=debug,tower_http=debug"
    } else {
        "stagetrack=info,tower_http=debug"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn print_banner() {
    println!(
        r#"
  ┌─┐┌┬┐┌─┐┌─┐┌─┐┌┬┐┬─┐┌─┐┌─┐┬┌─
  └─┐ │ ├─┤│ ┬├┤  │ ├┬┘├─┤│  ├┴┐
  └─┘ ┴ ┴ ┴└─┘└─┘ ┴ ┴└─┴ ┴└─┘┴ ┴

  stagetrack v{}

  scheduled > cut > cleaned > stored > partially shipped > shipped
"#,
        env!("CARGO_PKG_VERSION")
    );
}
