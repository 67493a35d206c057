//! # DDC Wire
//!
//! Byte-exact codec for DDC control datagrams.
//!
//! The layout is normative: a 4-byte packet prelude, a 12-byte message
//! header, zero or more 16-byte metric clusters of up to three entries,
//! and a 4-byte zero terminator. See [`message`] for the bit diagram.
//!
//! The codec is hand-written over [`bytes`] rather than derived from a
//! schema because interoperability requires this exact layout, not merely
//! an equivalent one.

pub mod message;

pub use message::{
    CLUSTER_SIZE, METRIC_UNREACHABLE, MSG_HEADER_SIZE, MessageHeader, MessageKind, MetricEntry,
    PKT_HEADER_SIZE, PacketHeader, WireError, decode_datagram, encode_datagram,
};
