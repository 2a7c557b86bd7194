use std::path::PathBuf;

use clap::Parser;

use crate::config::TransportKind;

#[derive(Parser, Debug)]
#[command(name = "chatline")]
#[command(version)]
#[command(about = "A terminal chat client that polls a REST API or follows a WebSocket feed")]
pub struct Args {
    /// Path to the TOML config file (missing file means defaults)
    #[arg(long, default_value = "chatline.toml")]
    pub config: PathBuf,

    /// Message transport: poll or push
    #[arg(long, value_enum)]
    pub transport: Option<TransportKind>,

    /// Base URL of the REST chat API
    #[arg(long)]
    pub url: Option<String>,

    /// WebSocket URL of the push subscription
    #[arg(long)]
    pub push_url: Option<String>,

    /// Display name (saved for next time)
    #[arg(long, short)]
    pub name: Option<String>,

    /// Poll interval in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// SQLite file that remembers your name and theme
    #[arg(long)]
    pub identity_db: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "chatline=trace" (RUST_LOG wins)
    #[arg(long)]
    pub log: Option<String>,

    /// Print shell completions and exit
    #[arg(long, value_enum)]
    pub completions: Option<clap_complete::Shell>,
}
