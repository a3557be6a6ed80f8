#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

//! FluxMQ - broker entrypoint.
//!
//! Usage:
//!   fluxmq [-w N] [--host HOST] [-p PORT] [-d]
//!   fluxmq -c /etc/fluxmq.json

use anyhow::Result;
use clap::Parser;
use fluxmq::cli::commands::run_start;
use fluxmq::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    run_start(cli).await
}
