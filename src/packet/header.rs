//! Long and short packet header codec (RFC 9000 Section 17).

use bytes::{Buf, BufMut, Bytes};

use crate::error::{Error, Result};
use crate::types::{ConnectionId, MAX_CID_LENGTH};
use crate::varint;

/// QUIC version 1 (RFC 9000).
pub const VERSION_1: u32 = 0x0000_0001;

const FORM_BIT: u8 = 0x80;
const FIXED_BIT: u8 = 0x40;
const KEY_PHASE_BIT: u8 = 0x04;
const LONG_TYPE_MASK: u8 = 0x30;
const PN_LEN_MASK: u8 = 0x03;

/// Packet type, discriminated by the first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Initial packet (long, type bits 00). Carries a token.
    Initial,
    /// 0-RTT packet (long, type bits 01).
    ZeroRtt,
    /// Handshake packet (long, type bits 10).
    Handshake,
    /// Retry packet (long, type bits 11). No length, no packet number.
    Retry,
    /// 1-RTT short-header packet.
    OneRtt,
}

impl PacketType {
    fn long_type_bits(self) -> u8 {
        match self {
            PacketType::Initial => 0x00,
            PacketType::ZeroRtt => 0x10,
            PacketType::Handshake => 0x20,
            PacketType::Retry => 0x30,
            PacketType::OneRtt => 0x00,
        }
    }
}

/// A parsed or to-be-serialized packet header.
///
/// Fields absent from a given header form are `None`: short headers have no
/// version, source id, token, or length; Retry has no length and no packet
/// number.
///
/// `packet_number` is the *truncated* value exactly as it appears on the
/// wire; reconstructing the full 62-bit number against the largest received
/// packet number is left to the loss detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub packet_type: PacketType,
    /// Wire version; only meaningful for long headers.
    pub version: u32,
    pub dcid: ConnectionId,
    pub scid: Option<ConnectionId>,
    /// Address-validation token (Initial packets only).
    pub token: Option<Bytes>,
    /// Length of packet number + payload (absent for Retry and short headers,
    /// where the payload runs to the end of the datagram).
    pub length: Option<u64>,
    /// Truncated packet number (absent for Retry).
    pub packet_number: Option<u64>,
    /// Bytes the truncated packet number occupies on the wire (1-4; 0 for
    /// Retry).
    pub pn_len: usize,
    /// Key phase bit (short headers only).
    pub key_phase: bool,
}

impl Header {
    /// Construct a long header ready for serialization.
    pub fn long(
        packet_type: PacketType,
        dcid: ConnectionId,
        scid: ConnectionId,
        packet_number: u64,
        pn_len: usize,
    ) -> Self {
        Self {
            packet_type,
            version: VERSION_1,
            dcid,
            scid: Some(scid),
            token: None,
            length: None,
            packet_number: Some(packet_number),
            pn_len,
            key_phase: false,
        }
    }

    /// Construct a 1-RTT short header ready for serialization.
    pub fn short(dcid: ConnectionId, packet_number: u64, pn_len: usize, key_phase: bool) -> Self {
        Self {
            packet_type: PacketType::OneRtt,
            version: 0,
            dcid,
            scid: None,
            token: None,
            length: None,
            packet_number: Some(packet_number),
            pn_len,
            key_phase,
        }
    }

    /// Parse a header from the front of a datagram.
    ///
    /// `dcid_len` is the destination-id length agreed out of band, consulted
    /// only for short headers (long headers carry explicit length prefixes).
    /// Returns the header and the number of bytes it occupied, i.e. the
    /// offset at which the (protected) payload begins.
    pub fn parse(datagram: &[u8], dcid_len: usize) -> Result<(Header, usize)> {
        let mut buf = datagram;
        let total = buf.len();
        let first = *buf.first().ok_or(Error::ShortInput)?;

        let header = if first & FORM_BIT != 0 {
            Self::parse_long(&mut buf)?
        } else {
            Self::parse_short(&mut buf, dcid_len)?
        };
        Ok((header, total - buf.remaining()))
    }

    fn parse_long(buf: &mut &[u8]) -> Result<Header> {
        if buf.remaining() < 5 {
            return Err(Error::ShortInput);
        }
        let first = buf.get_u8();
        if first & FIXED_BIT == 0 {
            return Err(Error::InvalidHeader("fixed bit is zero"));
        }

        let version = buf.get_u32();
        if version != VERSION_1 {
            return Err(Error::UnsupportedVersion(version));
        }

        let dcid = read_cid(buf)?;
        let scid = read_cid(buf)?;

        let packet_type = match first & LONG_TYPE_MASK {
            0x00 => PacketType::Initial,
            0x10 => PacketType::ZeroRtt,
            0x20 => PacketType::Handshake,
            _ => PacketType::Retry,
        };

        let mut token = None;
        match packet_type {
            PacketType::Initial => {
                let token_len = varint::decode_buf(buf)?;
                if buf.remaining() < token_len as usize {
                    return Err(Error::ShortInput);
                }
                token = Some(buf.copy_to_bytes(token_len as usize));
            }
            PacketType::Retry => {
                // The remainder of a Retry packet is its token plus the
                // integrity tag; the header ends here.
                return Ok(Header {
                    packet_type,
                    version,
                    dcid,
                    scid: Some(scid),
                    token: None,
                    length: None,
                    packet_number: None,
                    pn_len: 0,
                    key_phase: false,
                });
            }
            _ => {}
        }

        let length = varint::decode_buf(buf)?;
        let pn_len = usize::from(first & PN_LEN_MASK) + 1;
        let packet_number = read_truncated_pn(buf, pn_len)?;

        Ok(Header {
            packet_type,
            version,
            dcid,
            scid: Some(scid),
            token,
            length: Some(length),
            packet_number: Some(packet_number),
            pn_len,
            key_phase: false,
        })
    }

    fn parse_short(buf: &mut &[u8], dcid_len: usize) -> Result<Header> {
        if dcid_len > MAX_CID_LENGTH {
            return Err(Error::InvalidHeader("dcid length above 20"));
        }
        if buf.remaining() < 1 + dcid_len {
            return Err(Error::ShortInput);
        }

        let first = buf.get_u8();
        if first & FIXED_BIT == 0 {
            return Err(Error::InvalidHeader("fixed bit is zero"));
        }

        let dcid_bytes = buf.copy_to_bytes(dcid_len);
        let dcid = ConnectionId::new(dcid_bytes).ok_or(Error::InvalidHeader("dcid length above 20"))?;

        let pn_len = usize::from(first & PN_LEN_MASK) + 1;
        let packet_number = read_truncated_pn(buf, pn_len)?;

        Ok(Header {
            packet_type: PacketType::OneRtt,
            version: 0,
            dcid,
            scid: None,
            token: None,
            length: None,
            packet_number: Some(packet_number),
            pn_len,
            key_phase: first & KEY_PHASE_BIT != 0,
        })
    }

    /// Serialize the header, returning bytes written.
    pub fn serialize<B: BufMut>(&self, buf: &mut B) -> usize {
        match self.packet_type {
            PacketType::OneRtt => self.serialize_short(buf),
            _ => self.serialize_long(buf),
        }
    }

    fn serialize_long<B: BufMut>(&self, buf: &mut B) -> usize {
        let pn_len = self.pn_len.clamp(1, 4);
        let mut first = FORM_BIT | FIXED_BIT | self.packet_type.long_type_bits();
        if self.packet_type != PacketType::Retry {
            first |= (pn_len as u8 - 1) & PN_LEN_MASK;
        }
        buf.put_u8(first);
        buf.put_u32(self.version);

        buf.put_u8(self.dcid.len() as u8);
        buf.put_slice(self.dcid.as_bytes());
        let scid_bytes = self.scid.as_ref().map(|c| c.as_bytes()).unwrap_or(&[]);
        buf.put_u8(scid_bytes.len() as u8);
        buf.put_slice(scid_bytes);

        let mut written = 1 + 4 + 2 + self.dcid.len() + scid_bytes.len();

        if self.packet_type == PacketType::Initial {
            let token = self.token.as_deref().unwrap_or(&[]);
            written += varint::encode(token.len() as u64, buf).expect("token length fits a varint");
            buf.put_slice(token);
            written += token.len();
        }

        if self.packet_type == PacketType::Retry {
            return written;
        }

        let length = self.length.unwrap_or(0);
        written += varint::encode(length, buf).expect("length field fits a varint");
        written += write_truncated_pn(buf, self.packet_number.unwrap_or(0), pn_len);
        written
    }

    fn serialize_short<B: BufMut>(&self, buf: &mut B) -> usize {
        let pn_len = self.pn_len.clamp(1, 4);
        let mut first = FIXED_BIT | ((pn_len as u8 - 1) & PN_LEN_MASK);
        if self.key_phase {
            first |= KEY_PHASE_BIT;
        }
        buf.put_u8(first);
        buf.put_slice(self.dcid.as_bytes());
        1 + self.dcid.len() + write_truncated_pn(buf, self.packet_number.unwrap_or(0), pn_len)
    }

    /// Serialized size of this header in bytes.
    pub fn wire_len(&self) -> usize {
        let pn_len = if self.packet_type == PacketType::Retry {
            0
        } else {
            self.pn_len.clamp(1, 4)
        };
        match self.packet_type {
            PacketType::OneRtt => 1 + self.dcid.len() + pn_len,
            _ => {
                let scid_len = self.scid.as_ref().map_or(0, ConnectionId::len);
                let mut len = 1 + 4 + 1 + self.dcid.len() + 1 + scid_len;
                if self.packet_type == PacketType::Initial {
                    let token_len = self.token.as_ref().map_or(0, Bytes::len);
                    len += varint::len(token_len as u64) + token_len;
                }
                if self.packet_type != PacketType::Retry {
                    len += varint::len(self.length.unwrap_or(0)) + pn_len;
                }
                len
            }
        }
    }
}

fn read_cid(buf: &mut &[u8]) -> Result<ConnectionId> {
    if !buf.has_remaining() {
        return Err(Error::ShortInput);
    }
    let len = buf.get_u8() as usize;
    if len > MAX_CID_LENGTH {
        return Err(Error::InvalidHeader("connection id length above 20"));
    }
    if buf.remaining() < len {
        return Err(Error::ShortInput);
    }
    Ok(ConnectionId::new(buf.copy_to_bytes(len)).expect("length checked"))
}

fn read_truncated_pn(buf: &mut &[u8], pn_len: usize) -> Result<u64> {
    if buf.remaining() < pn_len {
        return Err(Error::ShortInput);
    }
    let mut pn = 0u64;
    for _ in 0..pn_len {
        pn = (pn << 8) | u64::from(buf.get_u8());
    }
    Ok(pn)
}

fn write_truncated_pn<B: BufMut>(buf: &mut B, pn: u64, pn_len: usize) -> usize {
    for shift in (0..pn_len).rev() {
        buf.put_u8((pn >> (shift * 8)) as u8);
    }
    pn_len
}

/// Shortest packet-number encoding that lets the peer recover `pn` given the
/// largest packet number it has acknowledged (RFC 9000 Section 17.1).
pub fn pn_len_for(pn: u64, largest_acked: Option<u64>) -> usize {
    let range = match largest_acked {
        Some(acked) => 2 * pn.abs_diff(acked),
        None => 2 * pn,
    };
    if range < 1 << 8 {
        1
    } else if range < 1 << 16 {
        2
    } else if range < 1 << 24 {
        3
    } else {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(bytes: &[u8]) -> ConnectionId {
        ConnectionId::from_slice(bytes).unwrap()
    }

    #[test]
    fn parses_initial_reference_vector() {
        let datagram: [u8; 27] = [
            0xc0, 0x00, 0x00, 0x00, 0x01, 0x08, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08,
            0x08, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x00, 0x40, 0x64, 0x01,
        ];

        let (header, consumed) = Header::parse(&datagram, 0).unwrap();
        assert_eq!(consumed, 27);
        assert_eq!(header.packet_type, PacketType::Initial);
        assert_eq!(header.version, 1);
        assert_eq!(header.dcid, cid(&[1, 2, 3, 4, 5, 6, 7, 8]));
        assert_eq!(header.scid, Some(cid(&[0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18])));
        assert_eq!(header.token.as_deref(), Some(&[][..]));
        assert_eq!(header.length, Some(100));
        assert_eq!(header.pn_len, 1);
        assert_eq!(header.packet_number, Some(1));
    }

    #[test]
    fn long_header_round_trip() {
        let mut header = Header::long(
            PacketType::Handshake,
            cid(&[0xaa; 4]),
            cid(&[0xbb; 5]),
            0xbeef,
            2,
        );
        header.length = Some(321);

        let mut buf = Vec::new();
        let written = header.serialize(&mut buf);
        assert_eq!(written, buf.len());
        assert_eq!(written, header.wire_len());

        let (parsed, consumed) = Header::parse(&buf, 0).unwrap();
        assert_eq!(consumed, written);
        assert_eq!(parsed.packet_type, PacketType::Handshake);
        assert_eq!(parsed.dcid, header.dcid);
        assert_eq!(parsed.scid, header.scid);
        assert_eq!(parsed.length, Some(321));
        assert_eq!(parsed.packet_number, Some(0xbeef));
        assert_eq!(parsed.pn_len, 2);
    }

    #[test]
    fn initial_token_round_trip() {
        let mut header = Header::long(PacketType::Initial, cid(&[1]), cid(&[2]), 7, 1);
        header.token = Some(Bytes::from_static(b"retry-token"));
        header.length = Some(20);

        let mut buf = Vec::new();
        header.serialize(&mut buf);
        let (parsed, _) = Header::parse(&buf, 0).unwrap();
        assert_eq!(parsed.token.as_deref(), Some(&b"retry-token"[..]));
    }

    #[test]
    fn short_header_round_trip_uses_out_of_band_dcid_len() {
        let header = Header::short(cid(&[9, 8, 7, 6, 5]), 0x2a, 1, true);

        let mut buf = Vec::new();
        let written = header.serialize(&mut buf);
        assert_eq!(written, header.wire_len());
        // First byte: fixed bit, key phase, pn_len-1 = 0.
        assert_eq!(buf[0], 0x44);

        let (parsed, consumed) = Header::parse(&buf, 5).unwrap();
        assert_eq!(consumed, written);
        assert_eq!(parsed.packet_type, PacketType::OneRtt);
        assert_eq!(parsed.dcid, header.dcid);
        assert_eq!(parsed.packet_number, Some(0x2a));
        assert!(parsed.key_phase);
    }

    #[test]
    fn retry_has_no_length_or_packet_number() {
        let header = Header {
            packet_type: PacketType::Retry,
            version: VERSION_1,
            dcid: cid(&[1, 2]),
            scid: Some(cid(&[3, 4])),
            token: None,
            length: None,
            packet_number: None,
            pn_len: 0,
            key_phase: false,
        };

        let mut buf = Vec::new();
        let written = header.serialize(&mut buf);
        assert_eq!(written, header.wire_len());

        let (parsed, consumed) = Header::parse(&buf, 0).unwrap();
        assert_eq!(consumed, written);
        assert_eq!(parsed.packet_type, PacketType::Retry);
        assert_eq!(parsed.length, None);
        assert_eq!(parsed.packet_number, None);
    }

    #[test]
    fn rejects_unsupported_version() {
        let datagram = [0xc0, 0xde, 0xad, 0xbe, 0xef, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(
            Header::parse(&datagram, 0).unwrap_err(),
            Error::UnsupportedVersion(0xdead_beef)
        );
    }

    #[test]
    fn rejects_truncated_and_invalid_headers() {
        assert_eq!(Header::parse(&[], 0).unwrap_err(), Error::ShortInput);
        // Long header cut off inside the version field.
        assert_eq!(Header::parse(&[0xc0, 0x00, 0x00], 0).unwrap_err(), Error::ShortInput);
        // Connection id length above 20.
        let bad_cid = [0xc0, 0x00, 0x00, 0x00, 0x01, 0x15];
        assert!(matches!(
            Header::parse(&bad_cid, 0).unwrap_err(),
            Error::InvalidHeader(_)
        ));
        // Short header with fixed bit clear.
        assert!(matches!(
            Header::parse(&[0x04, 0x00], 1).unwrap_err(),
            Error::InvalidHeader(_)
        ));
        // Short header truncated before the packet number.
        assert_eq!(Header::parse(&[0x41, 0xaa], 2).unwrap_err(), Error::ShortInput);
    }

    #[test]
    fn pn_len_tracks_ack_distance() {
        assert_eq!(pn_len_for(0, None), 1);
        assert_eq!(pn_len_for(0x7f, None), 1);
        assert_eq!(pn_len_for(0x80, None), 2);
        assert_eq!(pn_len_for(1000, Some(996)), 1);
        assert_eq!(pn_len_for(100_000, Some(50_000)), 3);
        assert_eq!(pn_len_for(1 << 30, Some(0)), 4);
    }
}
