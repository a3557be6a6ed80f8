//! CLI argument definitions using clap.

use clap::Parser;
use std::path::PathBuf;

/// FluxMQ - lightweight MQTT 3.1.1 message broker.
#[derive(Parser)]
#[command(name = "fluxmq")]
#[command(version)]
#[command(about = "FluxMQ MQTT broker")]
pub struct Cli {
    /// Worker count for message processing, prefer (client count)/10
    #[arg(short = 'w', long = "worker", default_value_t = 1024)]
    pub worker: usize,

    /// Network host to listen on
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on; an empty value disables the TCP listener
    #[arg(short = 'p', long, default_value = "1883")]
    pub port: String,

    /// Enable debug logging
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Enable debug logging (legacy alias)
    #[arg(short = 'D', hide = true)]
    pub debug_alias: bool,

    /// JSON config file; replaces all flag values when given
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}
