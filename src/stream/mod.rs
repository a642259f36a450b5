//! Streams (RFC 9000 Sections 2-3).
//!
//! Per-stream receive reassembly and send queuing behind a five-state
//! lifecycle, plus the connection-wide stream table.

pub mod map;
pub mod stream;

pub use map::StreamMap;
pub use stream::{Stream, StreamState, StreamStats};
