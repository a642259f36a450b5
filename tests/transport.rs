//! End-to-end exercises of the transport core: datagram in, header off,
//! frames out, stream data reassembled; and the send path back the other
//! way, gated by the congestion controller.

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use quicd_transport::frames::{parse_frame, serialize_frame, serialize_frame_last, Frame, FrameIter};
use quicd_transport::packet::{Header, PacketType};
use quicd_transport::recovery::{CongestionState, CubicConfig, CubicCongestionControl};
use quicd_transport::stream::StreamMap;
use quicd_transport::types::{ConnectionId, Side, StreamId};
use quicd_transport::{varint, Error, StreamState};

/// Build a 1-RTT datagram with the given frames, the last one written in
/// trailing form (no explicit length).
fn build_datagram(dcid: &ConnectionId, pn: u64, frames: &[Frame]) -> Vec<u8> {
    let header = Header::short(dcid.clone(), pn, 1, false);
    let mut buf = BytesMut::new();
    header.serialize(&mut buf);
    for (i, frame) in frames.iter().enumerate() {
        if i + 1 == frames.len() {
            serialize_frame_last(frame, &mut buf).unwrap();
        } else {
            serialize_frame(frame, &mut buf).unwrap();
        }
    }
    buf.to_vec()
}

#[test]
fn receive_path_reassembles_across_datagrams() {
    let dcid = ConnectionId::from_slice(&[7; 8]).unwrap();
    let streams = StreamMap::new(Side::Server, 1024);

    // Three datagrams deliver one stream out of order, with a control frame
    // riding along.
    let datagrams = [
        build_datagram(
            &dcid,
            1,
            &[
                Frame::Ping,
                Frame::Stream {
                    stream_id: StreamId(4),
                    offset: 6,
                    data: Bytes::from_static(b"World"),
                    fin: false,
                },
            ],
        ),
        build_datagram(
            &dcid,
            2,
            &[Frame::Stream {
                stream_id: StreamId(4),
                offset: 0,
                data: Bytes::from_static(b"Hello "),
                fin: false,
            }],
        ),
        build_datagram(
            &dcid,
            3,
            &[
                Frame::MaxData { max: 1 << 16 },
                Frame::Stream {
                    stream_id: StreamId(4),
                    offset: 11,
                    data: Bytes::from_static(b"!"),
                    fin: true,
                },
            ],
        ),
    ];

    for datagram in &datagrams {
        let (header, header_len) = Header::parse(datagram, dcid.len()).unwrap();
        assert_eq!(header.packet_type, PacketType::OneRtt);
        assert_eq!(header.dcid, dcid);

        for frame in FrameIter::new(&datagram[header_len..]) {
            match frame.unwrap() {
                Frame::Stream { stream_id, offset, data, fin } => {
                    streams
                        .get_or_create(stream_id)
                        .receive_segment(offset, data, fin)
                        .unwrap();
                }
                Frame::Ping | Frame::MaxData { .. } => {}
                other => panic!("unexpected frame {other:?}"),
            }
        }
    }

    let stream = streams.get(StreamId(4)).unwrap();
    let mut buf = [0u8; 64];
    let n = stream.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"Hello World!");
    assert_eq!(stream.read(&mut buf).unwrap(), 0);
    assert_eq!(stream.state(), StreamState::HalfClosedRemote);
}

#[test]
fn send_path_frames_popped_data_under_cwnd_gate() {
    let streams = StreamMap::new(Side::Client, 1 << 20);
    let cc = CubicCongestionControl::new(CubicConfig::for_mss(1200));
    let dcid = ConnectionId::from_slice(&[1, 2, 3, 4]).unwrap();

    let stream = streams.open_bidi();
    assert_eq!(stream.id(), StreamId(0));
    stream.write(b"request body").unwrap();
    stream.close_send();

    let mut in_flight = 0u64;
    let mut sent = Vec::new();
    let mut pn = 0u64;
    while let Some(writable) = streams.writable().into_iter().next() {
        assert!(cc.can_send(in_flight));
        let (data, offset, fin) = writable.pop_send(8).unwrap();
        let datagram = build_datagram(
            &dcid,
            pn,
            &[Frame::Stream { stream_id: writable.id(), offset, data, fin }],
        );
        in_flight += datagram.len() as u64;
        cc.on_packet_sent(Instant::now(), in_flight, pn, datagram.len() as u64, true);
        sent.push(datagram);
        pn += 1;
        if fin {
            break;
        }
    }
    // "request body" in 8-byte pops: two datagrams, FIN on the second.
    assert_eq!(sent.len(), 2);

    // The peer reassembles what we framed.
    let peer = StreamMap::new(Side::Server, 1 << 20);
    for datagram in &sent {
        let (_, header_len) = Header::parse(datagram, dcid.len()).unwrap();
        for frame in FrameIter::new(&datagram[header_len..]) {
            if let Frame::Stream { stream_id, offset, data, fin } = frame.unwrap() {
                peer.get_or_create(stream_id)
                    .receive_segment(offset, data, fin)
                    .unwrap();
            }
        }
    }
    let mut buf = [0u8; 64];
    let echo = peer.get(StreamId(0)).unwrap();
    let n = echo.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"request body");
    assert_eq!(echo.read(&mut buf).unwrap(), 0);
}

#[test]
fn controller_lifecycle_across_ack_and_loss() {
    let cc = CubicCongestionControl::new(CubicConfig::for_mss(1200));
    let start = Instant::now();

    // Slow start: every acked byte widens the window.
    cc.on_packet_sent(start, 1200, 1, 1200, true);
    assert!(!cc.on_ack(1, 1200, 1200, start + Duration::from_millis(30)));
    assert_eq!(cc.congestion_window(), 13_200);
    assert_eq!(cc.stats().state, CongestionState::SlowStart);

    cc.update_rtt(Duration::from_millis(30));

    // Loss: multiplicative decrease, recovery until a newer packet is acked.
    cc.on_packet_sent(start, 1200, 2, 1200, true);
    cc.on_packet_lost(2, 1200, 1200);
    let stats = cc.stats();
    assert_eq!(stats.cwnd, (13_200f64 * 0.7) as u64);
    assert_eq!(stats.ssthresh, stats.cwnd);
    assert_eq!(stats.state, CongestionState::FastRecovery);

    cc.on_packet_sent(start, 1200, 3, 1200, true);
    assert!(cc.on_ack(3, 1200, 1200, start + Duration::from_millis(60)));
    let stats = cc.stats();
    assert_eq!(stats.state, CongestionState::CongestionAvoidance);
    assert_eq!(stats.packets_acked, 2);
    assert_eq!(stats.packets_lost, 1);
    assert_eq!(stats.min_rtt, Some(Duration::from_millis(30)));
}

#[test]
fn initial_datagram_header_then_crypto_frame() {
    // Handshake-flight shape: Initial header followed by a CRYPTO frame.
    let dcid = ConnectionId::from_slice(&[0xaa; 8]).unwrap();
    let scid = ConnectionId::from_slice(&[0xbb; 8]).unwrap();

    let mut payload = BytesMut::new();
    serialize_frame(
        &Frame::Crypto { offset: 0, data: Bytes::from_static(b"ClientHello") },
        &mut payload,
    )
    .unwrap();

    let mut header = Header::long(PacketType::Initial, dcid.clone(), scid, 0, 1);
    header.token = Some(Bytes::from_static(b"tok"));
    header.length = Some(payload.len() as u64 + 1); // payload + packet number

    let mut datagram = BytesMut::new();
    header.serialize(&mut datagram);
    datagram.extend_from_slice(&payload);

    let (parsed, header_len) = Header::parse(&datagram, 0).unwrap();
    assert_eq!(parsed.packet_type, PacketType::Initial);
    assert_eq!(parsed.token.as_deref(), Some(&b"tok"[..]));
    assert_eq!(parsed.length, Some(payload.len() as u64 + 1));

    let (frame, consumed) = parse_frame(&datagram[header_len..]).unwrap();
    assert_eq!(consumed, payload.len());
    assert_eq!(
        frame,
        Frame::Crypto { offset: 0, data: Bytes::from_static(b"ClientHello") }
    );
}

#[test]
fn protocol_errors_map_to_wire_codes() {
    let streams = StreamMap::new(Side::Server, 8);
    let stream = streams.get_or_create(StreamId(0));

    let err = stream
        .receive_segment(0, Bytes::from_static(b"way too much data"), false)
        .unwrap_err();
    assert_eq!(err, Error::FlowControl);
    assert_eq!(err.to_wire(), 0x03);

    stream.receive_segment(0, Bytes::from_static(b"ab"), false).unwrap();
    let err = stream
        .receive_segment(0, Bytes::from_static(b"XY"), false)
        .unwrap_err();
    assert_eq!(err, Error::ProtocolViolation);
    assert_eq!(err.to_wire(), 0x0a);

    // The varint layer backs every codec error path.
    assert_eq!(varint::decode(&[0x40]).unwrap_err(), Error::ShortInput);
}
