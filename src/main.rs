//! # Diary interpolation CLI (`nikki`)
//!
//! The `nikki` binary is the primary interface for the interpolation
//! pipeline. It provides a one-shot interpolation command and the HTTP
//! server.
//!
//! ## Usage
//!
//! ```bash
//! nikki --config ./config/nikki.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nikki interpolate <date>` | Generate a diary passage for a date |
//! | `nikki serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Interpolate a missing day, with a hint
//! nikki interpolate 2025-09-24 --hint "雨だった日"
//!
//! # Start the JSON API
//! nikki serve --config ./config/nikki.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use nikki_rag::models::InterpolationRequest;
use nikki_rag::{config, orchestrator, server};

/// Diary interpolation CLI — retrieval-augmented generation of plausible
/// diary passages for dates without an entry.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/nikki.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "nikki",
    about = "Diary interpolation — hybrid temporal+semantic retrieval with rule-checked generation",
    version,
    long_about = "Retrieves semantically and temporally relevant past diary entries for a target \
    date and generates a plausible passage for it, validated against structural and content \
    constraints before being returned."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/nikki.toml`. All index, embedding, generation,
    /// and server settings are read from this file.
    #[arg(long, global = true, default_value = "./config/nikki.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Generate a diary passage for a date.
    ///
    /// Retrieves entries around the target date, assembles a context
    /// block, generates a passage, and prints it with its citations.
    Interpolate {
        /// Target date (YYYY-MM-DD).
        date: String,

        /// Free-text hint to steer retrieval and generation.
        #[arg(long)]
        hint: Option<String>,
    },

    /// Start the HTTP server.
    ///
    /// Binds to the address configured in `[server].bind` and serves
    /// `POST /interpolate` and `GET /health`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nikki_rag=info,nikki=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Interpolate { date, hint } => {
            let orchestrator = orchestrator::build_pipeline(&config)?;
            let request = InterpolationRequest { date, hint };
            let response = orchestrator.interpolate(&request).await;

            println!("{}", response.text);
            if !response.citations.is_empty() {
                println!();
                println!("参照した過去の記録:");
                for citation in &response.citations {
                    println!("  [{}] {}", citation.date, citation.snippet);
                }
            }
        }
        Commands::Serve => {
            let orchestrator = Arc::new(orchestrator::build_pipeline(&config)?);
            server::run_server(&config.server.bind, orchestrator).await?;
        }
    }

    Ok(())
}
