//! Waypost CLI - Continuous location sharing for self-hosted servers
//!
//! Waypost keeps a public view link updated with your position for a
//! limited time, and cleans up after itself when the time is up.
//!
//! ## Quick Start
//!
//! ```bash
//! # Share your position for an hour
//! waypost share --server https://track.example.com --duration 1h
//!
//! # Inspect an interrupted session
//! waypost status
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::Parser;

mod commands;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Share(args) => commands::share::run(args).await,
        Command::Stop(args) => commands::stop::run(args).await,
        Command::Status(args) => commands::status::run(&args),
        Command::Config(args) => commands::config::run(&args),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,waypost=info,waypost_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
