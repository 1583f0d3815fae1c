use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Local inference gateway speaking the OpenAI and Anthropic APIs.
#[derive(Debug, Parser)]
#[command(name = "maestro", version)]
pub struct Args {
    /// Path to the maestro.toml configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the configured listen address.
    #[arg(short, long)]
    pub listen_address: Option<SocketAddr>,

    /// Log filter, e.g. "info" or "server=debug,inference=debug".
    #[arg(long, default_value = "info")]
    pub log: String,
}
