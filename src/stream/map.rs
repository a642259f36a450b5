//! Connection-wide stream table.
//!
//! Streams come into being lazily, on the first local open or the first
//! frame from the peer that names their id, and leave once both directions
//! have terminated.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::stream::Stream;
use crate::types::{Side, StreamId};

struct MapInner {
    streams: HashMap<u64, Arc<Stream>>,
    /// Next locally-opened ids, pre-set to this side's lowest id of each
    /// directionality and advancing by 4 per allocation.
    next_bidi: u64,
    next_uni: u64,
}

/// The set of streams on one connection.
pub struct StreamMap {
    side: Side,
    /// Inbound flow-control cap handed to each new stream.
    max_recv_bytes: u64,
    inner: Mutex<MapInner>,
}

impl StreamMap {
    pub fn new(side: Side, max_recv_bytes: u64) -> Self {
        let (next_bidi, next_uni) = match side {
            Side::Client => (0, 2),
            Side::Server => (1, 3),
        };
        Self {
            side,
            max_recv_bytes,
            inner: Mutex::new(MapInner {
                streams: HashMap::new(),
                next_bidi,
                next_uni,
            }),
        }
    }

    /// Open a locally-initiated bidirectional stream.
    pub fn open_bidi(&self) -> Arc<Stream> {
        let mut inner = self.inner.lock();
        let id = inner.next_bidi;
        inner.next_bidi += 4;
        self.insert(&mut inner, id)
    }

    /// Open a locally-initiated unidirectional (send-only) stream.
    pub fn open_uni(&self) -> Arc<Stream> {
        let mut inner = self.inner.lock();
        let id = inner.next_uni;
        inner.next_uni += 4;
        self.insert(&mut inner, id)
    }

    /// Fetch a stream, creating it on first reference. This is the receive
    /// path's entry point: a STREAM frame for an unknown id brings the
    /// stream into being.
    pub fn get_or_create(&self, id: StreamId) -> Arc<Stream> {
        let mut inner = self.inner.lock();
        if let Some(stream) = inner.streams.get(&id.value()) {
            return Arc::clone(stream);
        }
        self.insert(&mut inner, id.value())
    }

    /// Fetch a stream without creating it.
    pub fn get(&self, id: StreamId) -> Option<Arc<Stream>> {
        self.inner.lock().streams.get(&id.value()).cloned()
    }

    fn insert(&self, inner: &mut MapInner, id: u64) -> Arc<Stream> {
        let stream = Arc::new(Stream::new(StreamId(id), self.side, self.max_recv_bytes));
        inner.streams.insert(id, Arc::clone(&stream));
        debug!(stream_id = id, side = ?self.side, "stream created");
        stream
    }

    /// Drop every stream whose lifecycle has fully terminated (Closed or
    /// Reset). Returns how many were collected. Handles still held by the
    /// application stay valid through their `Arc`.
    pub fn remove_closed(&self) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.streams.len();
        inner.streams.retain(|id, stream| {
            let keep = !stream.state().is_terminal();
            if !keep {
                trace!(stream_id = *id, "stream collected");
            }
            keep
        });
        before - inner.streams.len()
    }

    /// Number of live streams.
    pub fn len(&self) -> usize {
        self.inner.lock().streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every stream with data queued for framing, for the send task.
    pub fn writable(&self) -> Vec<Arc<Stream>> {
        self.inner
            .lock()
            .streams
            .values()
            .filter(|s| s.send_pending() > 0)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamState;
    use bytes::Bytes;

    #[test]
    fn local_ids_advance_by_four_from_side_origin() {
        let client = StreamMap::new(Side::Client, 1024);
        assert_eq!(client.open_bidi().id(), StreamId(0));
        assert_eq!(client.open_bidi().id(), StreamId(4));
        assert_eq!(client.open_uni().id(), StreamId(2));
        assert_eq!(client.open_uni().id(), StreamId(6));

        let server = StreamMap::new(Side::Server, 1024);
        assert_eq!(server.open_bidi().id(), StreamId(1));
        assert_eq!(server.open_bidi().id(), StreamId(5));
        assert_eq!(server.open_uni().id(), StreamId(3));
    }

    #[test]
    fn lazy_creation_on_first_reference() {
        let map = StreamMap::new(Side::Server, 1024);
        assert!(map.get(StreamId(0)).is_none());

        let stream = map.get_or_create(StreamId(0));
        stream.receive_segment(0, Bytes::from_static(b"hi"), false).unwrap();

        // Same object on the second lookup.
        let again = map.get_or_create(StreamId(0));
        assert!(Arc::ptr_eq(&stream, &again));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn collects_only_terminated_streams() {
        let map = StreamMap::new(Side::Client, 1024);
        let open = map.open_bidi();
        let half = map.open_bidi();
        let done = map.open_bidi();
        let dead = map.open_bidi();

        half.close_send();

        done.close_send();
        done.receive_segment(0, Bytes::new(), true).unwrap();
        assert_eq!(done.state(), StreamState::Closed);

        dead.reset(1, "gone");

        assert_eq!(map.remove_closed(), 2);
        assert_eq!(map.len(), 2);
        assert!(map.get(open.id()).is_some());
        assert!(map.get(half.id()).is_some());
        assert!(map.get(done.id()).is_none());
        assert!(map.get(dead.id()).is_none());
    }

    #[test]
    fn writable_lists_streams_with_pending_data() {
        let map = StreamMap::new(Side::Client, 1024);
        let a = map.open_bidi();
        let _b = map.open_bidi();
        a.write(b"pending").unwrap();

        let writable = map.writable();
        assert_eq!(writable.len(), 1);
        assert_eq!(writable[0].id(), a.id());
    }
}
