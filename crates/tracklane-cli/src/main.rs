//! Tracklane CLI - Headless Playback Session Driver
//!
//! Features:
//! - Scripted playback sessions against the simulated engine
//! - Event log output as text, JSON or table
//! - Content type inference and default track layouts

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

/// Tracklane CLI - Playback session toolkit
#[derive(Parser)]
#[command(name = "tracklane")]
#[command(author = "Tracklane Contributors")]
#[command(version)]
#[command(about = "Drive and inspect playback sessions", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted session: prepare, play, switch tracks, background, release
    Demo {
        /// Content URI
        uri: String,

        /// Content type (dash, ss, hls, other); inferred from the URI when omitted
        #[arg(short = 't', long = "type")]
        content_type: Option<String>,

        /// Session configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Simulated renderer build time in milliseconds
        #[arg(long, default_value = "50")]
        build_delay_ms: u64,
    },

    /// Show the inferred content type and default track layout
    Inspect {
        /// Content URI
        uri: String,

        /// Content type (dash, ss, hls, other); inferred from the URI when omitted
        #[arg(short = 't', long = "type")]
        content_type: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();
    tracklane_core::init();

    match cli.command {
        Commands::Demo { uri, content_type, config, build_delay_ms } => {
            commands::demo(&uri, content_type.as_deref(), config, build_delay_ms, &cli.format).await?;
        }
        Commands::Inspect { uri, content_type } => {
            commands::inspect(&uri, content_type.as_deref(), &cli.format)?;
        }
    }

    Ok(())
}
