//! MQTT 3.1.1 wire protocol.
//!
//! The broker core consumes this module through two entry points:
//! [`read_packet`] decodes the next framed control packet from a byte
//! stream, and [`write_packet`] serializes one onto it. Encoding is pure
//! (`encode_packet`) so a frame is always written with a single `write_all`.

pub mod packets;

// Re-export packet types at module level for convenience
pub use packets::*;
