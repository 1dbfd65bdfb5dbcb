//! CLI command definitions and handlers.

use std::time::Duration;

use clap::{Parser, Subcommand};

pub mod config;
pub mod share;
pub mod status;
pub mod stop;

/// Load configuration with graceful fallback to defaults.
pub fn load_config() -> waypost_core::config::Config {
    waypost_core::config::Config::load().unwrap_or_default()
}

/// Parse a human duration like `45s`, `30m`, `2h`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let (value, unit) = raw.split_at(raw.len().checked_sub(1)?);
    let value: u64 = value.parse().ok()?;
    match unit {
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        "d" => Some(Duration::from_secs(value * 86_400)),
        _ => raw.parse().ok().map(Duration::from_secs),
    }
}

/// Waypost - Continuous location sharing for self-hosted servers
#[derive(Parser)]
#[command(name = "waypost")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Start sharing your location
    Share(ShareArgs),

    /// Stop the shares recorded in the last session snapshot
    Stop(StopArgs),

    /// Show the state of the last session snapshot
    Status(StatusArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the share command
#[derive(clap::Args)]
pub struct ShareArgs {
    /// Backend server URL (overrides the configured one)
    #[arg(short, long)]
    pub server: Option<String>,

    /// Server password
    #[arg(short, long, env = "WAYPOST_PASSWORD")]
    pub password: Option<String>,

    /// Account name, for servers that require one
    #[arg(short, long)]
    pub username: Option<String>,

    /// Session duration (e.g., 30m, 1h)
    #[arg(short, long)]
    pub duration: Option<String>,

    /// Push interval (e.g., 1s, 30s)
    #[arg(short, long)]
    pub interval: Option<String>,

    /// Minimum movement in meters before a new position is pushed
    #[arg(long)]
    pub min_distance: Option<f64>,

    /// Preferred link ID; the server may honor or ignore it
    #[arg(long)]
    pub link_id: Option<String>,

    /// End-to-end encryption passphrase
    #[arg(long, env = "WAYPOST_E2E_PASSPHRASE")]
    pub e2e_passphrase: Option<String>,

    /// Report this fixed position instead of reading positions from stdin
    #[arg(long, value_name = "LAT,LON")]
    pub fixed: Option<String>,

    /// Resume an interrupted session without prompting
    #[arg(long)]
    pub resume: bool,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the stop command
#[derive(clap::Args)]
pub struct StopArgs {
    /// Only clear the local snapshot, do not contact the server
    #[arg(long)]
    pub local: bool,
}

/// Arguments for the status command
#[derive(clap::Args)]
pub struct StatusArgs {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the config command
#[derive(clap::Args)]
pub struct ConfigArgs {
    /// What to do with the configuration
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the active configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Write a configuration file with default values
    Init,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("45s"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("30m"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("1d"), Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn test_parse_duration_bare_seconds() {
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("-5m"), None);
    }
}
