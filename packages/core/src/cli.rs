use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Child publisher monitor CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "childpub-monitor",
    version,
    about = "Track child publisher accounts of Google Ad Manager networks"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP API
    Serve(ServeArgs),

    /// Fetch child publishers once and save a snapshot
    Fetch(FetchArgs),

    /// Send an HTML email
    Notify(NotifyArgs),

    /// Read or write remote configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Clone, Default, Args)]
pub struct ServeArgs {
    /// Interface to bind (overrides HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Args)]
pub struct FetchArgs {
    /// Ad Manager network code (defaults to GAM_NETWORK_CODE)
    pub network_code: Option<String>,

    /// Query accounts under MANAGED delegation instead; printed, not saved
    #[arg(long)]
    pub managed: bool,

    /// Ignore a fresh cached snapshot
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Debug, Clone, Args)]
pub struct NotifyArgs {
    /// Comma-separated recipient addresses
    #[arg(long, value_delimiter = ',', required = true)]
    pub to: Vec<String>,

    #[arg(long)]
    pub subject: String,

    /// File holding the HTML body
    #[arg(long)]
    pub html_file: PathBuf,
}

#[derive(Debug, Clone, Subcommand)]
pub enum ConfigCommand {
    /// Print the JSON stored under config/KEY
    Get { key: String },

    /// Store a JSON value under config/KEY
    Set { key: String, value: String },
}
