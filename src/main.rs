//! # Pipeboard CLI (`pipeboard`)
//!
//! Runs the read API and a few database-free helpers.
//!
//! ## Usage
//!
//! ```bash
//! pipeboard --config ./config/pipeboard.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pipeboard init` | Create the `only_digits` helper and the base-nova view |
//! | `pipeboard serve` | Bootstrap, then start the HTTP API |
//! | `pipeboard resolve <doc>` | Resolve a CPF/CNPJ against the database |
//! | `pipeboard variants <doc>` | Print PF/PJ lookup variants (no database) |
//!
//! `DB_DSN` and `API_TOKEN` override the config file. Log verbosity follows
//! `RUST_LOG`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use pipeboard::{bootstrap, config, lookup, server};

const DEFAULT_LOG_FILTER: &str = "pipeboard=info,tower_http=info";

/// Pipeboard: read-only CRM query API with CPF/CNPJ entity resolution.
///
/// All commands accept a `--config` flag pointing to a TOML file. A missing
/// file means defaults plus environment overrides.
#[derive(Parser)]
#[command(
    name = "pipeboard",
    about = "Read-only CRM query API with CPF/CNPJ entity resolution",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pipeboard.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create database helpers (idempotent).
    ///
    /// Ensures the `only_digits(text)` function exists and refreshes the
    /// `v_deals_base_nova` view. No CRM data is modified.
    Init,

    /// Start the HTTP API.
    ///
    /// Requires a token in `[auth].token` or `API_TOKEN`.
    Serve,

    /// Resolve a document to a person or an organization.
    Resolve {
        /// CPF or CNPJ, masked or not.
        doc: String,

        /// Prefer one entity type.
        #[arg(long, value_parser = ["PF", "PJ"])]
        hint: Option<String>,
    },

    /// Print the PF and PJ lookup variants of a document.
    Variants {
        /// CPF or CNPJ, masked or not.
        doc: String,
    },
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Init => {
            let cfg = config::load_config(&cli.config)?;
            bootstrap::run_init(&cfg).await?;
            println!("Database helpers are up to date.");
        }
        Commands::Serve => {
            let cfg = config::load_config(&cli.config)?;
            server::run_server(&cfg).await?;
        }
        Commands::Resolve { doc, hint } => {
            let cfg = config::load_config(&cli.config)?;
            lookup::run_resolve(&cfg, &doc, hint.as_deref()).await?;
        }
        // No config or database needed.
        Commands::Variants { doc } => {
            lookup::run_variants(&doc)?;
        }
    }

    Ok(())
}
