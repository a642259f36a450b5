//! QUIC frames (RFC 9000 Section 19).
//!
//! The fifteen frame kinds a v1 endpoint speaks, with parsing and
//! serialization that match the RFC bit-for-bit.

pub mod codec;

pub use codec::{
    frame_len, parse_frame, serialize_frame, serialize_frame_last, AckRange, EcnCounts, Frame,
    FrameIter,
};
