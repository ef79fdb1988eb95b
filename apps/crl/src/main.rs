//! # CRL - concept spaces from the command line
//!
//! The binary front end for the crl-core concept graph.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              apps/crl (THE BINARY)           │
//! │                                              │
//! │  ┌─────────────┐        ┌────────────────┐   │
//! │  │   CLI       │        │  Config (toml) │   │
//! │  │  (clap)     │        │                │   │
//! │  └──────┬──────┘        └───────┬────────┘   │
//! │         └───────────┬───────────┘            │
//! │                     ▼                        │
//! │             ┌───────────────┐                │
//! │             │   crl-core    │                │
//! │             │  (THE MODEL)  │                │
//! │             └───────────────┘                │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! crl init
//! crl add element --label Car
//! crl add literal --label wheels --value 4 --owner <car-id>
//! crl tree
//! crl --json-mode show <id>
//! ```

use clap::Parser;
use crl::cli;
use crl::config::{CrlConfig, LogFormat};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();
    let config = CrlConfig::load(cli.config.as_deref());

    // CRL_LOG_FORMAT=json (or log_format = "json" in the config) enables machine-parseable output.
    let json_logs = std::env::var("CRL_LOG_FORMAT").is_ok_and(|v| v == "json")
        || config
            .as_ref()
            .is_ok_and(|c| c.log_format == LogFormat::Json);
    let default_filter = if cli.verbose {
        "crl=debug,crl_core=debug"
    } else {
        "crl=info,crl_core=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let result = config.and_then(|config| cli::execute(cli, &config));
    if let Err(e) = result {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
