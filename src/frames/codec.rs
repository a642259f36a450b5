//! Frame parsing and serialization (RFC 9000 Section 19).

use bytes::{BufMut, Bytes, BytesMut};
use tinyvec::TinyVec;

use crate::error::{Error, Result};
use crate::types::{ConnectionId, StreamId, MAX_CID_LENGTH};
use crate::varint;

pub const FRAME_TYPE_PADDING: u64 = 0x00;
pub const FRAME_TYPE_PING: u64 = 0x01;
pub const FRAME_TYPE_ACK: u64 = 0x02;
pub const FRAME_TYPE_ACK_ECN: u64 = 0x03;
pub const FRAME_TYPE_RESET_STREAM: u64 = 0x04;
pub const FRAME_TYPE_STOP_SENDING: u64 = 0x05;
pub const FRAME_TYPE_CRYPTO: u64 = 0x06;
pub const FRAME_TYPE_NEW_TOKEN: u64 = 0x07;
pub const FRAME_TYPE_STREAM_BASE: u64 = 0x08; // 0x08-0x0f
pub const FRAME_TYPE_MAX_DATA: u64 = 0x10;
pub const FRAME_TYPE_MAX_STREAM_DATA: u64 = 0x11;
pub const FRAME_TYPE_MAX_STREAMS_BIDI: u64 = 0x12;
pub const FRAME_TYPE_MAX_STREAMS_UNI: u64 = 0x13;
pub const FRAME_TYPE_DATA_BLOCKED: u64 = 0x14;
pub const FRAME_TYPE_STREAM_DATA_BLOCKED: u64 = 0x15;
pub const FRAME_TYPE_STREAMS_BLOCKED_BIDI: u64 = 0x16;
pub const FRAME_TYPE_STREAMS_BLOCKED_UNI: u64 = 0x17;
pub const FRAME_TYPE_NEW_CONNECTION_ID: u64 = 0x18;
pub const FRAME_TYPE_RETIRE_CONNECTION_ID: u64 = 0x19;
pub const FRAME_TYPE_PATH_CHALLENGE: u64 = 0x1a;
pub const FRAME_TYPE_PATH_RESPONSE: u64 = 0x1b;
pub const FRAME_TYPE_CONNECTION_CLOSE_QUIC: u64 = 0x1c;
pub const FRAME_TYPE_CONNECTION_CLOSE_APP: u64 = 0x1d;
pub const FRAME_TYPE_HANDSHAKE_DONE: u64 = 0x1e;

/// STREAM frame flag bits, encoded in the low bits of the type (0x08-0x0f).
const STREAM_BIT_FIN: u64 = 0x01;
const STREAM_BIT_LEN: u64 = 0x02;
const STREAM_BIT_OFF: u64 = 0x04;

/// Largest MAX_STREAMS / STREAMS_BLOCKED limit (RFC 9000 Section 19.11).
const MAX_STREAMS_LIMIT: u64 = 1 << 60;

/// One ACK range: `gap` unacknowledged packets, then `length` acknowledged,
/// both relative to the range above it (RFC 9000 Section 19.3.1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckRange {
    pub gap: u64,
    pub length: u64,
}

/// ECN counters carried by an ACK_ECN frame (RFC 9000 Section 19.3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcnCounts {
    pub ect0: u64,
    pub ect1: u64,
    pub ce: u64,
}

/// A QUIC frame (RFC 9000 Section 19).
///
/// Data-bearing frames carry reference-counted [`Bytes`] so they can be
/// handed to the stream engine without copying again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// PADDING (0x00). A run of zero bytes; `len` covers the whole run.
    Padding { len: usize },

    /// PING (0x01).
    Ping,

    /// ACK / ACK_ECN (0x02 / 0x03). `first_range` counts packets
    /// acknowledged immediately below `largest_acked`; further ranges are
    /// gap-encoded descending. ECN counts present iff the frame was 0x03.
    Ack {
        largest_acked: u64,
        ack_delay: u64,
        first_range: u64,
        ranges: TinyVec<[AckRange; 8]>,
        ecn: Option<EcnCounts>,
    },

    /// RESET_STREAM (0x04).
    ResetStream {
        stream_id: StreamId,
        error_code: u64,
        final_size: u64,
    },

    /// STOP_SENDING (0x05).
    StopSending { stream_id: StreamId, error_code: u64 },

    /// CRYPTO (0x06).
    Crypto { offset: u64, data: Bytes },

    /// NEW_TOKEN (0x07).
    NewToken { token: Bytes },

    /// STREAM (0x08-0x0f). Flag bits of the type code: FIN (0x01),
    /// LEN (0x02), OFF (0x04).
    Stream {
        stream_id: StreamId,
        offset: u64,
        data: Bytes,
        fin: bool,
    },

    /// MAX_DATA (0x10).
    MaxData { max: u64 },

    /// MAX_STREAM_DATA (0x11).
    MaxStreamData { stream_id: StreamId, max: u64 },

    /// MAX_STREAMS (0x12 bidirectional / 0x13 unidirectional).
    MaxStreams { bidi: bool, max: u64 },

    /// DATA_BLOCKED (0x14).
    DataBlocked { limit: u64 },

    /// STREAM_DATA_BLOCKED (0x15).
    StreamDataBlocked { stream_id: StreamId, limit: u64 },

    /// STREAMS_BLOCKED (0x16 bidirectional / 0x17 unidirectional).
    StreamsBlocked { bidi: bool, limit: u64 },

    /// NEW_CONNECTION_ID (0x18).
    NewConnectionId {
        sequence: u64,
        retire_prior_to: u64,
        cid: ConnectionId,
        reset_token: [u8; 16],
    },

    /// RETIRE_CONNECTION_ID (0x19).
    RetireConnectionId { sequence: u64 },

    /// PATH_CHALLENGE (0x1a).
    PathChallenge { data: [u8; 8] },

    /// PATH_RESPONSE (0x1b).
    PathResponse { data: [u8; 8] },

    /// CONNECTION_CLOSE (0x1c transport / 0x1d application).
    /// `frame_type` is present exactly for the transport variant.
    ConnectionClose {
        error_code: u64,
        frame_type: Option<u64>,
        reason: Bytes,
    },

    /// HANDSHAKE_DONE (0x1e).
    HandshakeDone,
}

impl Frame {
    /// Whether this frame elicits an acknowledgment (RFC 9002 Section 2).
    pub fn is_ack_eliciting(&self) -> bool {
        !matches!(
            self,
            Frame::Padding { .. } | Frame::Ack { .. } | Frame::ConnectionClose { .. }
        )
    }
}

/// Parse one frame from the front of `buf`, returning it and the bytes
/// consumed.
///
/// The caller must pass a buffer trimmed to the packet payload: a STREAM
/// frame without the LEN bit extends to the end of `buf`.
pub fn parse_frame(buf: &[u8]) -> Result<(Frame, usize)> {
    let (frame_type, mut at) = varint::decode(buf)?;

    // PADDING coalesces: the run covers every consecutive zero byte.
    if frame_type == FRAME_TYPE_PADDING {
        while at < buf.len() && buf[at] == 0x00 {
            at += 1;
        }
        return Ok((Frame::Padding { len: at }, at));
    }

    let rest = &buf[at..];
    let (frame, used) = match frame_type {
        FRAME_TYPE_PING => (Frame::Ping, 0),
        FRAME_TYPE_ACK | FRAME_TYPE_ACK_ECN => {
            parse_ack(rest, frame_type == FRAME_TYPE_ACK_ECN)?
        }
        FRAME_TYPE_RESET_STREAM => parse_reset_stream(rest)?,
        FRAME_TYPE_STOP_SENDING => parse_stop_sending(rest)?,
        FRAME_TYPE_CRYPTO => parse_crypto(rest)?,
        FRAME_TYPE_NEW_TOKEN => parse_new_token(rest)?,
        t if (FRAME_TYPE_STREAM_BASE..=0x0f).contains(&t) => parse_stream(rest, t)?,
        FRAME_TYPE_MAX_DATA => {
            let (max, n) = varint::decode(rest)?;
            (Frame::MaxData { max }, n)
        }
        FRAME_TYPE_MAX_STREAM_DATA => {
            let mut at = 0;
            let stream_id = StreamId(next_varint(rest, &mut at)?);
            let max = next_varint(rest, &mut at)?;
            (Frame::MaxStreamData { stream_id, max }, at)
        }
        FRAME_TYPE_MAX_STREAMS_BIDI | FRAME_TYPE_MAX_STREAMS_UNI => {
            let (max, n) = varint::decode(rest)?;
            if max > MAX_STREAMS_LIMIT {
                return Err(Error::FrameEncoding);
            }
            let bidi = frame_type == FRAME_TYPE_MAX_STREAMS_BIDI;
            (Frame::MaxStreams { bidi, max }, n)
        }
        FRAME_TYPE_DATA_BLOCKED => {
            let (limit, n) = varint::decode(rest)?;
            (Frame::DataBlocked { limit }, n)
        }
        FRAME_TYPE_STREAM_DATA_BLOCKED => {
            let mut at = 0;
            let stream_id = StreamId(next_varint(rest, &mut at)?);
            let limit = next_varint(rest, &mut at)?;
            (Frame::StreamDataBlocked { stream_id, limit }, at)
        }
        FRAME_TYPE_STREAMS_BLOCKED_BIDI | FRAME_TYPE_STREAMS_BLOCKED_UNI => {
            let (limit, n) = varint::decode(rest)?;
            if limit > MAX_STREAMS_LIMIT {
                return Err(Error::FrameEncoding);
            }
            let bidi = frame_type == FRAME_TYPE_STREAMS_BLOCKED_BIDI;
            (Frame::StreamsBlocked { bidi, limit }, n)
        }
        FRAME_TYPE_NEW_CONNECTION_ID => parse_new_connection_id(rest)?,
        FRAME_TYPE_RETIRE_CONNECTION_ID => {
            let (sequence, n) = varint::decode(rest)?;
            (Frame::RetireConnectionId { sequence }, n)
        }
        FRAME_TYPE_PATH_CHALLENGE => {
            let data = read_8(rest)?;
            (Frame::PathChallenge { data }, 8)
        }
        FRAME_TYPE_PATH_RESPONSE => {
            let data = read_8(rest)?;
            (Frame::PathResponse { data }, 8)
        }
        FRAME_TYPE_CONNECTION_CLOSE_QUIC | FRAME_TYPE_CONNECTION_CLOSE_APP => {
            parse_connection_close(rest, frame_type == FRAME_TYPE_CONNECTION_CLOSE_QUIC)?
        }
        FRAME_TYPE_HANDSHAKE_DONE => (Frame::HandshakeDone, 0),
        _ => return Err(Error::FrameEncoding),
    };

    Ok((frame, at + used))
}

fn next_varint(buf: &[u8], at: &mut usize) -> Result<u64> {
    let (value, n) = varint::decode(&buf[*at..])?;
    *at += n;
    Ok(value)
}

fn read_8(buf: &[u8]) -> Result<[u8; 8]> {
    let slice = buf.get(..8).ok_or(Error::ShortInput)?;
    let mut data = [0u8; 8];
    data.copy_from_slice(slice);
    Ok(data)
}

fn take_bytes(buf: &[u8], at: &mut usize, len: u64) -> Result<Bytes> {
    let len = usize::try_from(len).map_err(|_| Error::FrameSize)?;
    let end = at.checked_add(len).ok_or(Error::FrameSize)?;
    if end > buf.len() {
        return Err(Error::FrameSize);
    }
    let data = Bytes::copy_from_slice(&buf[*at..end]);
    *at = end;
    Ok(data)
}

fn parse_stream(buf: &[u8], frame_type: u64) -> Result<(Frame, usize)> {
    let fin = frame_type & STREAM_BIT_FIN != 0;
    let has_len = frame_type & STREAM_BIT_LEN != 0;
    let has_off = frame_type & STREAM_BIT_OFF != 0;

    let mut at = 0;
    let stream_id = StreamId(next_varint(buf, &mut at)?);
    let offset = if has_off { next_varint(buf, &mut at)? } else { 0 };

    let data = if has_len {
        let len = next_varint(buf, &mut at)?;
        take_bytes(buf, &mut at, len)?
    } else {
        // No length field: the data runs to the end of the payload.
        let data = Bytes::copy_from_slice(&buf[at..]);
        at = buf.len();
        data
    };

    if offset.checked_add(data.len() as u64).is_none() {
        return Err(Error::FrameEncoding);
    }

    Ok((Frame::Stream { stream_id, offset, data, fin }, at))
}

fn parse_ack(buf: &[u8], has_ecn: bool) -> Result<(Frame, usize)> {
    let mut at = 0;
    let largest_acked = next_varint(buf, &mut at)?;
    let ack_delay = next_varint(buf, &mut at)?;
    let range_count = next_varint(buf, &mut at)?;
    let first_range = next_varint(buf, &mut at)?;

    if first_range > largest_acked {
        return Err(Error::FrameEncoding);
    }

    // Walk the gap-encoded ranges, checking each stays above packet number 0.
    let mut smallest = largest_acked - first_range;
    let mut ranges: TinyVec<[AckRange; 8]> = TinyVec::new();
    for _ in 0..range_count {
        let gap = next_varint(buf, &mut at)?;
        let length = next_varint(buf, &mut at)?;

        let next_largest = smallest
            .checked_sub(gap)
            .and_then(|n| n.checked_sub(2))
            .ok_or(Error::FrameEncoding)?;
        smallest = next_largest.checked_sub(length).ok_or(Error::FrameEncoding)?;
        ranges.push(AckRange { gap, length });
    }

    let ecn = if has_ecn {
        let ect0 = next_varint(buf, &mut at)?;
        let ect1 = next_varint(buf, &mut at)?;
        let ce = next_varint(buf, &mut at)?;
        Some(EcnCounts { ect0, ect1, ce })
    } else {
        None
    };

    Ok((
        Frame::Ack { largest_acked, ack_delay, first_range, ranges, ecn },
        at,
    ))
}

fn parse_reset_stream(buf: &[u8]) -> Result<(Frame, usize)> {
    let mut at = 0;
    let stream_id = StreamId(next_varint(buf, &mut at)?);
    let error_code = next_varint(buf, &mut at)?;
    let final_size = next_varint(buf, &mut at)?;
    Ok((Frame::ResetStream { stream_id, error_code, final_size }, at))
}

fn parse_stop_sending(buf: &[u8]) -> Result<(Frame, usize)> {
    let mut at = 0;
    let stream_id = StreamId(next_varint(buf, &mut at)?);
    let error_code = next_varint(buf, &mut at)?;
    Ok((Frame::StopSending { stream_id, error_code }, at))
}

fn parse_crypto(buf: &[u8]) -> Result<(Frame, usize)> {
    let mut at = 0;
    let offset = next_varint(buf, &mut at)?;
    let len = next_varint(buf, &mut at)?;
    let data = take_bytes(buf, &mut at, len)?;
    Ok((Frame::Crypto { offset, data }, at))
}

fn parse_new_token(buf: &[u8]) -> Result<(Frame, usize)> {
    let mut at = 0;
    let len = next_varint(buf, &mut at)?;
    if len == 0 {
        // RFC 9000 Section 19.7: an empty token is a FRAME_ENCODING_ERROR.
        return Err(Error::FrameEncoding);
    }
    let token = take_bytes(buf, &mut at, len)?;
    Ok((Frame::NewToken { token }, at))
}

fn parse_new_connection_id(buf: &[u8]) -> Result<(Frame, usize)> {
    let mut at = 0;
    let sequence = next_varint(buf, &mut at)?;
    let retire_prior_to = next_varint(buf, &mut at)?;
    if retire_prior_to > sequence {
        return Err(Error::FrameEncoding);
    }

    let cid_len = *buf.get(at).ok_or(Error::ShortInput)? as usize;
    at += 1;
    if cid_len == 0 || cid_len > MAX_CID_LENGTH {
        return Err(Error::FrameEncoding);
    }
    if at + cid_len + 16 > buf.len() {
        return Err(Error::ShortInput);
    }
    let cid = ConnectionId::from_slice(&buf[at..at + cid_len]).expect("length checked");
    at += cid_len;

    let mut reset_token = [0u8; 16];
    reset_token.copy_from_slice(&buf[at..at + 16]);
    at += 16;

    Ok((
        Frame::NewConnectionId { sequence, retire_prior_to, cid, reset_token },
        at,
    ))
}

fn parse_connection_close(buf: &[u8], transport: bool) -> Result<(Frame, usize)> {
    let mut at = 0;
    let error_code = next_varint(buf, &mut at)?;
    let frame_type = if transport {
        Some(next_varint(buf, &mut at)?)
    } else {
        None
    };
    let reason_len = next_varint(buf, &mut at)?;
    let reason = take_bytes(buf, &mut at, reason_len)?;
    Ok((Frame::ConnectionClose { error_code, frame_type, reason }, at))
}

/// Iterator over the frames of a packet payload.
///
/// Yields each frame in order; a malformed frame yields its error and ends
/// the iteration.
pub struct FrameIter<'a> {
    buf: &'a [u8],
    at: usize,
}

impl<'a> FrameIter<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self { buf: payload, at: 0 }
    }
}

impl Iterator for FrameIter<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.at >= self.buf.len() {
            return None;
        }
        match parse_frame(&self.buf[self.at..]) {
            Ok((frame, consumed)) => {
                self.at += consumed;
                Some(Ok(frame))
            }
            Err(e) => {
                self.at = self.buf.len();
                Some(Err(e))
            }
        }
    }
}

/// Serialize `frame` into `buf`, returning bytes written.
///
/// STREAM frames always carry an explicit length; use
/// [`serialize_frame_last`] for the final frame of a datagram to elide it.
pub fn serialize_frame(frame: &Frame, buf: &mut BytesMut) -> Result<usize> {
    serialize(frame, buf, false)
}

/// Serialize `frame` as the last frame of its datagram.
///
/// A STREAM frame is written without the LEN bit so its data extends to the
/// end of the packet; every other kind serializes identically to
/// [`serialize_frame`].
pub fn serialize_frame_last(frame: &Frame, buf: &mut BytesMut) -> Result<usize> {
    serialize(frame, buf, true)
}

fn serialize(frame: &Frame, buf: &mut BytesMut, last_in_datagram: bool) -> Result<usize> {
    let start = buf.len();

    match frame {
        Frame::Padding { len } => {
            buf.resize(start + (*len).max(1), 0x00);
        }

        Frame::Ping => {
            varint::encode(FRAME_TYPE_PING, buf)?;
        }

        Frame::Ack { largest_acked, ack_delay, first_range, ranges, ecn } => {
            let code = if ecn.is_some() { FRAME_TYPE_ACK_ECN } else { FRAME_TYPE_ACK };
            varint::encode(code, buf)?;
            varint::encode(*largest_acked, buf)?;
            varint::encode(*ack_delay, buf)?;
            varint::encode(ranges.len() as u64, buf)?;
            varint::encode(*first_range, buf)?;
            for range in ranges {
                varint::encode(range.gap, buf)?;
                varint::encode(range.length, buf)?;
            }
            if let Some(ecn) = ecn {
                varint::encode(ecn.ect0, buf)?;
                varint::encode(ecn.ect1, buf)?;
                varint::encode(ecn.ce, buf)?;
            }
        }

        Frame::ResetStream { stream_id, error_code, final_size } => {
            varint::encode(FRAME_TYPE_RESET_STREAM, buf)?;
            varint::encode(stream_id.value(), buf)?;
            varint::encode(*error_code, buf)?;
            varint::encode(*final_size, buf)?;
        }

        Frame::StopSending { stream_id, error_code } => {
            varint::encode(FRAME_TYPE_STOP_SENDING, buf)?;
            varint::encode(stream_id.value(), buf)?;
            varint::encode(*error_code, buf)?;
        }

        Frame::Crypto { offset, data } => {
            varint::encode(FRAME_TYPE_CRYPTO, buf)?;
            varint::encode(*offset, buf)?;
            varint::encode(data.len() as u64, buf)?;
            buf.put_slice(data);
        }

        Frame::NewToken { token } => {
            if token.is_empty() {
                return Err(Error::FrameEncoding);
            }
            varint::encode(FRAME_TYPE_NEW_TOKEN, buf)?;
            varint::encode(token.len() as u64, buf)?;
            buf.put_slice(token);
        }

        Frame::Stream { stream_id, offset, data, fin } => {
            let mut code = FRAME_TYPE_STREAM_BASE;
            if *fin {
                code |= STREAM_BIT_FIN;
            }
            if *offset > 0 {
                code |= STREAM_BIT_OFF;
            }
            if !last_in_datagram {
                code |= STREAM_BIT_LEN;
            }
            varint::encode(code, buf)?;
            varint::encode(stream_id.value(), buf)?;
            if *offset > 0 {
                varint::encode(*offset, buf)?;
            }
            if !last_in_datagram {
                varint::encode(data.len() as u64, buf)?;
            }
            buf.put_slice(data);
        }

        Frame::MaxData { max } => {
            varint::encode(FRAME_TYPE_MAX_DATA, buf)?;
            varint::encode(*max, buf)?;
        }

        Frame::MaxStreamData { stream_id, max } => {
            varint::encode(FRAME_TYPE_MAX_STREAM_DATA, buf)?;
            varint::encode(stream_id.value(), buf)?;
            varint::encode(*max, buf)?;
        }

        Frame::MaxStreams { bidi, max } => {
            let code = if *bidi { FRAME_TYPE_MAX_STREAMS_BIDI } else { FRAME_TYPE_MAX_STREAMS_UNI };
            varint::encode(code, buf)?;
            varint::encode(*max, buf)?;
        }

        Frame::DataBlocked { limit } => {
            varint::encode(FRAME_TYPE_DATA_BLOCKED, buf)?;
            varint::encode(*limit, buf)?;
        }

        Frame::StreamDataBlocked { stream_id, limit } => {
            varint::encode(FRAME_TYPE_STREAM_DATA_BLOCKED, buf)?;
            varint::encode(stream_id.value(), buf)?;
            varint::encode(*limit, buf)?;
        }

        Frame::StreamsBlocked { bidi, limit } => {
            let code = if *bidi {
                FRAME_TYPE_STREAMS_BLOCKED_BIDI
            } else {
                FRAME_TYPE_STREAMS_BLOCKED_UNI
            };
            varint::encode(code, buf)?;
            varint::encode(*limit, buf)?;
        }

        Frame::NewConnectionId { sequence, retire_prior_to, cid, reset_token } => {
            if cid.is_empty() {
                return Err(Error::FrameEncoding);
            }
            varint::encode(FRAME_TYPE_NEW_CONNECTION_ID, buf)?;
            varint::encode(*sequence, buf)?;
            varint::encode(*retire_prior_to, buf)?;
            buf.put_u8(cid.len() as u8);
            buf.put_slice(cid.as_bytes());
            buf.put_slice(reset_token);
        }

        Frame::RetireConnectionId { sequence } => {
            varint::encode(FRAME_TYPE_RETIRE_CONNECTION_ID, buf)?;
            varint::encode(*sequence, buf)?;
        }

        Frame::PathChallenge { data } => {
            varint::encode(FRAME_TYPE_PATH_CHALLENGE, buf)?;
            buf.put_slice(data);
        }

        Frame::PathResponse { data } => {
            varint::encode(FRAME_TYPE_PATH_RESPONSE, buf)?;
            buf.put_slice(data);
        }

        Frame::ConnectionClose { error_code, frame_type, reason } => {
            let code = if frame_type.is_some() {
                FRAME_TYPE_CONNECTION_CLOSE_QUIC
            } else {
                FRAME_TYPE_CONNECTION_CLOSE_APP
            };
            varint::encode(code, buf)?;
            varint::encode(*error_code, buf)?;
            if let Some(frame_type) = frame_type {
                varint::encode(*frame_type, buf)?;
            }
            varint::encode(reason.len() as u64, buf)?;
            buf.put_slice(reason);
        }

        Frame::HandshakeDone => {
            varint::encode(FRAME_TYPE_HANDSHAKE_DONE, buf)?;
        }
    }

    Ok(buf.len() - start)
}

/// Serialized size of `frame` under [`serialize_frame`]'s encoding choices.
pub fn frame_len(frame: &Frame) -> usize {
    match frame {
        Frame::Padding { len } => (*len).max(1),
        Frame::Ping | Frame::HandshakeDone => 1,
        Frame::Ack { largest_acked, ack_delay, first_range, ranges, ecn } => {
            let mut len = 1
                + varint::len(*largest_acked)
                + varint::len(*ack_delay)
                + varint::len(ranges.len() as u64)
                + varint::len(*first_range);
            for range in ranges {
                len += varint::len(range.gap) + varint::len(range.length);
            }
            if let Some(ecn) = ecn {
                len += varint::len(ecn.ect0) + varint::len(ecn.ect1) + varint::len(ecn.ce);
            }
            len
        }
        Frame::ResetStream { stream_id, error_code, final_size } => {
            1 + varint::len(stream_id.value()) + varint::len(*error_code) + varint::len(*final_size)
        }
        Frame::StopSending { stream_id, error_code } => {
            1 + varint::len(stream_id.value()) + varint::len(*error_code)
        }
        Frame::Crypto { offset, data } => {
            1 + varint::len(*offset) + varint::len(data.len() as u64) + data.len()
        }
        Frame::NewToken { token } => 1 + varint::len(token.len() as u64) + token.len(),
        Frame::Stream { stream_id, offset, data, .. } => {
            let mut len = 1 + varint::len(stream_id.value());
            if *offset > 0 {
                len += varint::len(*offset);
            }
            len + varint::len(data.len() as u64) + data.len()
        }
        Frame::MaxData { max } => 1 + varint::len(*max),
        Frame::MaxStreamData { stream_id, max } => {
            1 + varint::len(stream_id.value()) + varint::len(*max)
        }
        Frame::MaxStreams { max, .. } => 1 + varint::len(*max),
        Frame::DataBlocked { limit } => 1 + varint::len(*limit),
        Frame::StreamDataBlocked { stream_id, limit } => {
            1 + varint::len(stream_id.value()) + varint::len(*limit)
        }
        Frame::StreamsBlocked { limit, .. } => 1 + varint::len(*limit),
        Frame::NewConnectionId { sequence, retire_prior_to, cid, .. } => {
            1 + varint::len(*sequence) + varint::len(*retire_prior_to) + 1 + cid.len() + 16
        }
        Frame::RetireConnectionId { sequence } => 1 + varint::len(*sequence),
        Frame::PathChallenge { .. } | Frame::PathResponse { .. } => 1 + 8,
        Frame::ConnectionClose { error_code, frame_type, reason } => {
            let mut len = 1 + varint::len(*error_code);
            if let Some(frame_type) = frame_type {
                len += varint::len(*frame_type);
            }
            len + varint::len(reason.len() as u64) + reason.len()
        }
    }
}
