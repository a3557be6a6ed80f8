//! Operations and observability.
//!
//! - `telemetry` - Structured log initialization

pub mod telemetry;

pub use telemetry::*;
