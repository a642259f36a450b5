//! Error types for QUIC transport operations.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors raised by the transport core.
///
/// Codec errors (`ShortInput` through `ValueTooLarge`) are local and
/// non-fatal: the caller discards the offending datagram or frame.
/// `ProtocolViolation`, `FlowControl`, and `FinalSize` call for a connection
/// close with the corresponding RFC 9000 Section 20 code, issued by the
/// embedding connection. Stream errors surface directly to the application
/// call that triggered them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// A decoder ran off the end of its buffer.
    #[error("input truncated")]
    ShortInput,

    /// Long header carried a version this implementation does not speak.
    #[error("unsupported version {0:#010x}")]
    UnsupportedVersion(u32),

    /// Header structure is invalid (bad connection id length, reserved bits).
    #[error("invalid packet header: {0}")]
    InvalidHeader(&'static str),

    /// Malformed frame body (0x07).
    #[error("frame encoding error")]
    FrameEncoding,

    /// A frame's length field claims more bytes than the buffer holds.
    #[error("frame size error")]
    FrameSize,

    /// Varint value out of the 62-bit range.
    #[error("value exceeds 2^62-1")]
    ValueTooLarge,

    /// Peer behavior that no more specific code covers (0x0a), such as
    /// overlapping stream segments that disagree.
    #[error("protocol violation")]
    ProtocolViolation,

    /// Received data past the advertised stream flow-control limit (0x03).
    #[error("flow control error")]
    FlowControl,

    /// A FIN contradicted the recorded final size, or data landed past it
    /// (0x06).
    #[error("final size error")]
    FinalSize,

    /// Write after the send side was closed.
    #[error("stream closed for sending")]
    ClosedForSend,

    /// Operation does not match the stream's state or direction (0x05).
    #[error("stream state error")]
    StreamState,

    /// The stream was reset, locally or by the peer.
    #[error("stream reset (code {error_code}): {reason}")]
    StreamReset { error_code: u64, reason: String },
}

impl Error {
    /// RFC 9000 Section 20 transport error code for a CONNECTION_CLOSE frame.
    ///
    /// Errors that never leave the local endpoint map to INTERNAL_ERROR.
    pub fn to_wire(&self) -> u64 {
        match self {
            Error::FlowControl => 0x03,
            Error::StreamState => 0x05,
            Error::FinalSize => 0x06,
            Error::FrameEncoding | Error::FrameSize => 0x07,
            Error::ProtocolViolation => 0x0a,
            Error::ShortInput
            | Error::UnsupportedVersion(_)
            | Error::InvalidHeader(_)
            | Error::ValueTooLarge
            | Error::ClosedForSend
            | Error::StreamReset { .. } => 0x01,
        }
    }

    /// Map a wire error code back to the closest crate error.
    pub fn from_wire(code: u64) -> Self {
        match code {
            0x03 => Error::FlowControl,
            0x05 => Error::StreamState,
            0x06 => Error::FinalSize,
            0x07 => Error::FrameEncoding,
            0x0a => Error::ProtocolViolation,
            _ => Error::InvalidHeader("unrecognized transport error code"),
        }
    }
}
