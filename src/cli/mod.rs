//! FluxMQ CLI - command-line interface.
//!
//! A single `fluxmq` invocation starts the broker; the flag surface mirrors
//! the JSON config file, and `-c` replaces the flags with that file.

mod args;
pub mod commands;

pub use args::Cli;
