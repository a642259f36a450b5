//! Packet headers (RFC 9000 Section 17).
//!
//! Parsing and serialization of long and short headers. Packet-number
//! recovery from the truncated wire form is the loss detector's job; the
//! codec carries the truncated value through untouched. Header protection is
//! out of scope.

pub mod header;

pub use header::{pn_len_for, Header, PacketType};
