//! Per-stream state machine, receive reassembly, and send queue.
//!
//! A [`Stream`] is shared between the application tasks, the connection's
//! receive task, and its send task. Each side has its own lock:
//!
//! - the send side guards the queued-write buffer and FIN intent,
//! - the receive side guards the reassembly segments and read cursor, with a
//!   condvar that wakes blocked readers on new data, FIN, or reset,
//! - the lifecycle state (and any stored reset) sits behind its own
//!   reader-writer lock.
//!
//! Lock order where more than one is held: send, then receive, then state.
//! State transitions acquire the state lock last and never while a reader is
//! being woken.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::types::{Side, StreamId};

/// Stream lifecycle state.
///
/// ```text
///           receive FIN                 close_send
///   Open ────────────────► HalfClosedRemote ──────────► Closed
///    │                            ▲
///    │ close_send                 │ receive FIN
///    ▼                            │
///   HalfClosedLocal ──────────────┘
///
///   any state ── reset() ──► Reset   (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    /// Our send side is finished; the peer may still deliver data.
    HalfClosedLocal,
    /// The peer's FIN arrived; we may still send.
    HalfClosedRemote,
    Closed,
    Reset,
}

impl StreamState {
    /// Terminal states: nothing further happens on this stream.
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Closed | StreamState::Reset)
    }
}

/// Point-in-time stream counters.
#[derive(Debug, Clone)]
pub struct StreamStats {
    pub id: StreamId,
    pub state: StreamState,
    pub sent_bytes: u64,
    pub recv_bytes: u64,
    pub buffered_send_bytes: usize,
    pub buffered_recv_bytes: usize,
}

struct SendSide {
    /// Application writes not yet handed out for framing.
    buffer: BytesMut,
    /// Next stream offset to assign to popped data.
    offset: u64,
    /// The application closed its send side.
    fin_intent: bool,
    /// The FIN has ridden out on a pop; nothing more to emit.
    fin_handed: bool,
    sent_bytes: u64,
}

struct RecvSide {
    /// Buffered out-of-order segments keyed by stream offset. Segments never
    /// overlap each other or the consumed prefix.
    segments: BTreeMap<u64, Bytes>,
    /// Smallest offset not yet delivered to the application.
    consumed_offset: u64,
    /// Total stream length, fixed by the first FIN.
    final_offset: Option<u64>,
    /// Inbound flow-control cap: no segment may end past this.
    max_recv_bytes: u64,
    recv_bytes: u64,
}

struct StateCell {
    state: StreamState,
    /// Set on reset; reported by every subsequent read and write.
    reset: Option<(u64, String)>,
}

/// A single QUIC stream.
///
/// Thread-safe; intended to be shared behind an [`std::sync::Arc`]. The
/// documented contract is a single reader per stream; concurrent readers
/// each receive disjoint, in-order chunks.
pub struct Stream {
    id: StreamId,
    /// Which end of the connection we are, for unidirectional checks.
    side: Side,
    send: Mutex<SendSide>,
    recv: Mutex<RecvSide>,
    recv_ready: Condvar,
    state: RwLock<StateCell>,
}

impl Stream {
    /// Create a stream with the given inbound flow-control cap.
    pub fn new(id: StreamId, side: Side, max_recv_bytes: u64) -> Self {
        Self {
            id,
            side,
            send: Mutex::new(SendSide {
                buffer: BytesMut::new(),
                offset: 0,
                fin_intent: false,
                fin_handed: false,
                sent_bytes: 0,
            }),
            recv: Mutex::new(RecvSide {
                segments: BTreeMap::new(),
                consumed_offset: 0,
                final_offset: None,
                max_recv_bytes,
                recv_bytes: 0,
            }),
            recv_ready: Condvar::new(),
            state: RwLock::new(StateCell { state: StreamState::Open, reset: None }),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        self.state.read().state
    }

    /// True when this endpoint may send on the stream (direction-wise).
    fn can_send_direction(&self) -> bool {
        self.id.is_bidirectional() || self.id.initiator() == self.side
    }

    /// True when this endpoint may receive on the stream (direction-wise).
    fn can_recv_direction(&self) -> bool {
        self.id.is_bidirectional() || self.id.initiator() != self.side
    }

    /// The stored reset error when the stream is in the Reset state.
    ///
    /// Takes and releases the state lock exactly once; callers must not be
    /// holding it.
    fn reset_status(&self) -> Option<Error> {
        let cell = self.state.read();
        if cell.state != StreamState::Reset {
            return None;
        }
        let (error_code, reason) = cell.reset.clone().unwrap_or((0, String::new()));
        Some(Error::StreamReset { error_code, reason })
    }

    /// Queue application bytes for framing. Returns the number accepted
    /// (always all of them; write-side flow control is the embedding
    /// connection's concern, consulting [`StreamStats::sent_bytes`]).
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        if !self.can_send_direction() {
            return Err(Error::StreamState);
        }

        let mut send = self.send.lock();
        if let Some(err) = self.reset_status() {
            return Err(err);
        }
        match self.state.read().state {
            StreamState::HalfClosedLocal | StreamState::Closed => {
                return Err(Error::ClosedForSend)
            }
            _ => {}
        }

        send.buffer.extend_from_slice(data);
        send.sent_bytes += data.len() as u64;
        trace!(stream_id = %self.id, len = data.len(), "queued stream data");
        Ok(data.len())
    }

    /// Close the send side. Data already queued still drains through
    /// [`Stream::pop_send`]; the FIN rides the pop that empties the queue.
    /// Idempotent.
    pub fn close_send(&self) {
        let mut send = self.send.lock();
        if send.fin_intent {
            return;
        }
        send.fin_intent = true;
        drop(send);

        let mut cell = self.state.write();
        let next = match cell.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
        if next != cell.state {
            debug!(stream_id = %self.id, from = ?cell.state, to = ?next, "send side closed");
            cell.state = next;
        }
    }

    /// Reset the stream. Terminal from any state; every blocked reader wakes
    /// with the stored error.
    pub fn reset(&self, error_code: u64, reason: &str) {
        {
            let mut cell = self.state.write();
            if cell.state == StreamState::Reset {
                return;
            }
            debug!(stream_id = %self.id, error_code, "stream reset");
            cell.state = StreamState::Reset;
            cell.reset = Some((error_code, reason.to_owned()));
        }
        self.recv_ready.notify_all();
    }

    /// Insert a segment received from the network.
    ///
    /// Rejects data past the flow-control cap, FINs that contradict an
    /// established final size, and overlaps that disagree byte-for-byte with
    /// buffered or already-delivered data. Wakes blocked readers.
    pub fn receive_segment(&self, offset: u64, data: Bytes, fin: bool) -> Result<()> {
        if !self.can_recv_direction() {
            return Err(Error::StreamState);
        }
        if self.state.read().state.is_terminal() {
            return Err(Error::StreamState);
        }

        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(Error::FlowControl)?;

        {
            let mut recv = self.recv.lock();

            if end > recv.max_recv_bytes {
                warn!(
                    stream_id = %self.id,
                    end,
                    limit = recv.max_recv_bytes,
                    "segment exceeds flow-control limit"
                );
                return Err(Error::FlowControl);
            }

            if let Some(final_offset) = recv.final_offset {
                if end > final_offset || (fin && end != final_offset) {
                    warn!(stream_id = %self.id, end, final_offset, "final size contradiction");
                    return Err(Error::FinalSize);
                }
            } else if fin {
                // A FIN cannot announce an end before bytes we have seen.
                let seen = recv
                    .segments
                    .last_key_value()
                    .map(|(off, seg)| off + seg.len() as u64)
                    .unwrap_or(0)
                    .max(recv.consumed_offset);
                if end < seen {
                    warn!(stream_id = %self.id, end, seen, "FIN below received data");
                    return Err(Error::FinalSize);
                }
                recv.final_offset = Some(end);
            }

            recv.insert_segment(self.id, offset, data)?;
        }

        if fin {
            let mut cell = self.state.write();
            let next = match cell.state {
                StreamState::Open => StreamState::HalfClosedRemote,
                StreamState::HalfClosedLocal => StreamState::Closed,
                other => other,
            };
            if next != cell.state {
                debug!(stream_id = %self.id, from = ?cell.state, to = ?next, "receive side finished");
                cell.state = next;
            }
        }

        self.recv_ready.notify_all();
        Ok(())
    }

    /// Read ordered bytes into `buf`, blocking until data, EOF, or reset.
    ///
    /// Returns the number of bytes copied; `Ok(0)` means end of stream, and
    /// only occurs once the consumed offset has reached the final offset.
    /// Bytes come back in strictly ascending offset order with no gaps;
    /// copy and cursor advance happen under one lock acquisition.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if !self.can_recv_direction() {
            return Err(Error::StreamState);
        }

        let mut recv = self.recv.lock();
        loop {
            // Re-check the lifecycle on every wakeup.
            if let Some(err) = self.reset_status() {
                return Err(err);
            }

            let n = recv.copy_contiguous(buf);
            if n > 0 {
                trace!(stream_id = %self.id, n, offset = recv.consumed_offset, "read stream data");
                return Ok(n);
            }

            if recv.final_offset == Some(recv.consumed_offset) {
                return Ok(0);
            }

            if buf.is_empty() {
                return Ok(0);
            }

            self.recv_ready.wait(&mut recv);
        }
    }

    /// Non-blocking variant of [`Stream::read`] for poll-style callers.
    /// Returns `None` when no bytes are ready and the stream is still open.
    pub fn try_read(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        if !self.can_recv_direction() {
            return Err(Error::StreamState);
        }

        let mut recv = self.recv.lock();
        if let Some(err) = self.reset_status() {
            return Err(err);
        }
        let n = recv.copy_contiguous(buf);
        if n > 0 {
            return Ok(Some(n));
        }
        if recv.final_offset == Some(recv.consumed_offset) {
            return Ok(Some(0));
        }
        Ok(None)
    }

    /// Detach up to `max_bytes` of queued writes for framing.
    ///
    /// Returns the data, its stream offset, and whether it carries the FIN.
    /// The FIN is set only when `close_send` was called and this pop drains
    /// the queue; after the FIN-bearing pop the stream returns `None`.
    pub fn pop_send(&self, max_bytes: usize) -> Option<(Bytes, u64, bool)> {
        let mut send = self.send.lock();

        if self.state.read().state == StreamState::Reset {
            return None;
        }
        if send.fin_handed || (send.buffer.is_empty() && !send.fin_intent) {
            return None;
        }

        let take = send.buffer.len().min(max_bytes);
        let data = send.buffer.split_to(take).freeze();
        let offset = send.offset;
        send.offset += take as u64;

        let fin = send.fin_intent && send.buffer.is_empty();
        if fin {
            send.fin_handed = true;
        }
        trace!(stream_id = %self.id, offset, len = take, fin, "popped send data");
        Some((data, offset, fin))
    }

    /// Bytes queued and not yet popped for framing.
    pub fn send_pending(&self) -> usize {
        self.send.lock().buffer.len()
    }

    /// Counters snapshot.
    pub fn stats(&self) -> StreamStats {
        let (sent_bytes, buffered_send_bytes) = {
            let send = self.send.lock();
            (send.sent_bytes, send.buffer.len())
        };
        let (recv_bytes, buffered_recv_bytes) = {
            let recv = self.recv.lock();
            (recv.recv_bytes, recv.segments.values().map(Bytes::len).sum::<usize>())
        };
        StreamStats {
            id: self.id,
            state: self.state(),
            sent_bytes,
            recv_bytes,
            buffered_send_bytes,
            buffered_recv_bytes,
        }
    }
}

impl RecvSide {
    /// Insert a segment, verifying byte agreement over any overlap and
    /// storing only the parts not already covered.
    fn insert_segment(&mut self, id: StreamId, offset: u64, mut data: Bytes) -> Result<()> {
        let mut offset = offset;

        // Trim what the reader has already consumed; those bytes are gone
        // and cannot be compared.
        if offset < self.consumed_offset {
            let skip = (self.consumed_offset - offset).min(data.len() as u64) as usize;
            data = data.slice(skip..);
            offset = self.consumed_offset;
        }
        if data.is_empty() {
            return Ok(());
        }

        // Walk the buffered segments the new one touches, front to back:
        // every overlap must agree byte-for-byte, and only the uncovered
        // remainder is stored.
        let end = offset + data.len() as u64;
        let overlapping: Vec<(u64, Bytes)> = {
            // The predecessor may reach into us; successors may start inside us.
            let from = self
                .segments
                .range(..=offset)
                .next_back()
                .map(|(off, _)| *off)
                .unwrap_or(offset);
            self.segments
                .range(from..end)
                .map(|(off, seg)| (*off, seg.clone()))
                .collect()
        };

        for (seg_off, seg) in overlapping {
            let seg_end = seg_off + seg.len() as u64;
            if seg_end <= offset {
                continue;
            }

            // Overlap window in stream coordinates.
            let lo = offset.max(seg_off);
            let hi = end.min(seg_end);
            let ours = &data[(lo - offset) as usize..(hi - offset) as usize];
            let theirs = &seg[(lo - seg_off) as usize..(hi - seg_off) as usize];
            if ours != theirs {
                warn!(stream_id = %id, offset = lo, "overlapping segment disagrees");
                return Err(Error::ProtocolViolation);
            }

            // Store the prefix that precedes this segment, then continue
            // past it with whatever remains.
            if lo > offset {
                let prefix = data.slice(..(lo - offset) as usize);
                self.recv_bytes += prefix.len() as u64;
                self.segments.insert(offset, prefix);
            }
            if seg_end >= end {
                return Ok(());
            }
            data = data.slice((seg_end - offset) as usize..);
            offset = seg_end;
        }

        self.recv_bytes += data.len() as u64;
        self.segments.insert(offset, data);
        Ok(())
    }

    /// Copy the contiguous prefix at the cursor into `buf`, advance the
    /// cursor, and drop fully consumed segments.
    fn copy_contiguous(&mut self, buf: &mut [u8]) -> usize {
        let mut copied = 0;

        while copied < buf.len() {
            match self.segments.first_key_value() {
                Some((&seg_off, _)) if seg_off == self.consumed_offset => {}
                _ => break, // empty, or a gap at the cursor
            }

            let seg = self
                .segments
                .remove(&self.consumed_offset)
                .expect("checked above");
            let take = seg.len().min(buf.len() - copied);
            buf[copied..copied + take].copy_from_slice(&seg[..take]);
            copied += take;
            self.consumed_offset += take as u64;

            if take < seg.len() {
                self.segments.insert(self.consumed_offset, seg.slice(take..));
            }
        }

        copied
    }
}
