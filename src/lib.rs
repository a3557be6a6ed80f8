#![deny(clippy::all, clippy::pedantic)]
// Module naming: common pattern in domain-driven code
#![allow(clippy::module_name_repetitions)]
// Variable naming: domain terms often similar
#![allow(clippy::similar_names)]
// Documentation style: many terms don't need backticks
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// API ergonomics: prefer simplicity over must_use annotations
#![allow(clippy::must_use_candidate)]
// Format strings: allow non-inlined for readability
#![allow(clippy::uninlined_format_args)]
// Import style
#![allow(clippy::wildcard_imports)]
// Numeric casts: intentional in protocol code
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_lossless)]
// Control flow style
#![allow(clippy::single_match_else)]
// Option/Result patterns
#![allow(clippy::unnecessary_wraps)]
// Passing style
#![allow(clippy::needless_pass_by_value)]
// Iteration style
#![allow(clippy::explicit_iter_loop)]
// Unit patterns
#![allow(clippy::ignored_unit_patterns)]
// Explicit returns
#![allow(clippy::semicolon_if_nothing_returned)]
// Large types
#![allow(clippy::large_enum_variant)]

//! FluxMQ - lightweight MQTT 3.1.1 message broker.
//!
//! # Module Organization
//!
//! ## Core
//! - `core::config` - Configuration parsing and validation
//!
//! ## Broker
//! - `broker` - Acceptor loop, handshake, client lifecycle
//! - `broker::pool` - Worker pool with per-client affinity
//! - `broker::registry` - Concurrent client registry
//! - `broker::session` - Per-connection session state and read loop
//! - `broker::dispatch` - Packet demultiplexer and publish fan-out
//!
//! ## Protocol
//! - `protocol::packets` - MQTT 3.1.1 control-packet codec
//!
//! ## Operations
//! - `ops::telemetry` - Structured log initialization
//!
//! ## CLI
//! - `cli` - clap argument surface and the start command

// Core infrastructure
pub mod core;

// Broker runtime
pub mod broker;

// Wire protocol
pub mod protocol;

// Operations
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::config;
pub use broker::{dispatch, pool, registry, session};
