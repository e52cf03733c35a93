//! Command-line arguments for tmon-pipeline

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tmon-pipeline")]
#[command(about = "Topic monitoring pipeline: poll, store, accumulate, extract topics")]
#[command(version)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "TMON_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on, overriding the configuration file
    #[arg(short, long, env = "TMON_PORT")]
    pub port: Option<u16>,

    /// Log filter, overriding `[logging] level` (RUST_LOG still wins)
    #[arg(long)]
    pub log_level: Option<String>,
}
