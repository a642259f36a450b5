//! # quicd-transport: QUIC v1 Transport Core
//!
//! The protocol core of a QUIC v1 (RFC 9000 / 9001 / 9002) endpoint:
//! the on-wire codecs, the per-stream data engine, and congestion control.
//!
//! ```text
//! quicd-transport/
//! ├── error      - Unified error type with RFC 9000 Section 20 wire codes
//! ├── varint     - Variable-length integers (RFC 9000 Section 16)
//! ├── types      - Connection IDs, stream IDs, endpoint side
//! ├── packet     - Long/short packet headers (RFC 9000 Section 17)
//! ├── frames     - Frame parsing and serialization (RFC 9000 Section 19)
//! ├── stream     - Stream state machine, reassembly, send queue (Sections 2-3)
//! └── recovery   - CUBIC congestion control and RTT estimation (RFC 9002)
//! ```
//!
//! ## Design
//!
//! The crate is a pure transport core: it performs no I/O, owns no sockets,
//! and never reads the clock. Datagrams come in as byte slices, frames go out
//! through caller-provided buffers, and every time-dependent operation takes
//! its timestamp as a parameter. TLS, UDP sockets, loss-detection timers, and
//! the connection facade live in the embedding endpoint.
//!
//! The one place the crate blocks is [`stream::Stream::read`], which parks the
//! calling thread until ordered bytes, end-of-stream, or a reset arrives.
//! Everything else is non-blocking under short internal locks.
//!
//! ## Receive path
//!
//! ```rust,ignore
//! let (header, header_len) = Header::parse(&datagram, dcid_len)?;
//! let payload = &datagram[header_len..];   // after AEAD removal (external)
//! for frame in FrameIter::new(payload) {
//!     match frame? {
//!         Frame::Stream { stream_id, offset, data, fin, .. } => {
//!             streams.get_or_create(stream_id).receive_segment(offset, data, fin)?;
//!         }
//!         Frame::Ack { .. } => { /* hand to the loss detector / controller */ }
//!         _ => {}
//!     }
//! }
//! ```

#![forbid(unsafe_code)]

pub mod error;
pub mod frames;
pub mod packet;
pub mod recovery;
pub mod stream;
pub mod types;
pub mod varint;

pub use error::{Error, Result};
pub use frames::{AckRange, EcnCounts, Frame, FrameIter};
pub use packet::{Header, PacketType};
pub use recovery::{CongestionState, CongestionStats, CubicCongestionControl, RttEstimator};
pub use stream::{Stream, StreamMap, StreamState, StreamStats};
pub use types::{ConnectionId, Side, StreamId};
