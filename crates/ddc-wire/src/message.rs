//! Control-message byte layout
//!
//! Every DDC control datagram is a 4-byte packet prelude followed by one
//! message:
//!
//! ```text
//! |0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7|
//! -----------------------------------------------------------------
//! |  Packet Length                |        Seq No.                |
//! -----------------------------------------------------------------
//! |  Type         |  VTime        |      Message Size             |
//! -----------------------------------------------------------------
//! |                 Originator IP                                 |
//! -----------------------------------------------------------------
//! | TTL           |  Hops         |      Message Seq              |
//! -----------------------------------------------------------------
//! | Count         |  Metric 0     |  Metric 1     | Metric 2      |
//! -----------------------------------------------------------------
//! |                       IP 0                                    |
//! -----------------------------------------------------------------
//! |                       IP 1                                    |
//! -----------------------------------------------------------------
//! |                       IP 2                                    |
//! -----------------------------------------------------------------
//! | Count         | ...                                           |
//! -----------------------------------------------------------------
//! |0 0 0 0 0 0 0 0|0 0 0 0 0 0 0 0|0 0 0 0 0 0 0 0|0 0 0 0 0 0 0 0|
//! -----------------------------------------------------------------
//! ```
//!
//! Metric entries travel in clusters of three; a short final cluster is
//! padded with zero metrics and the unspecified address. A cluster count
//! of zero marks the 4-byte terminator.
//!
//! Metric requests and responses fill the cluster list with one entry per
//! known destination. The lock, generation and heartbeat messages reuse
//! the same envelope with exactly one cluster entry: the address names the
//! destination the message is about, the metric byte carries the
//! generation number where one applies (zero otherwise).

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Fixed size of the message header in bytes
pub const MSG_HEADER_SIZE: usize = 12;
/// Fixed size of one metric cluster in bytes
pub const CLUSTER_SIZE: usize = 16;
/// Fixed size of the packet prelude in bytes
pub const PKT_HEADER_SIZE: usize = 4;
/// Size of the zero terminator word
pub const TERMINATOR_SIZE: usize = 4;

/// Metric value meaning "this node has no path to the destination"
pub const METRIC_UNREACHABLE: u8 = 255;

/// Wire decode failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("Message truncated: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("Unknown message type: {0}")]
    UnknownType(u8),

    #[error("Invalid cluster count: {0}")]
    BadClusterCount(u8),

    #[error("Missing zero terminator")]
    MissingTerminator,

    #[error("Declared size {declared} does not match encoding {actual}")]
    SizeMismatch { declared: u16, actual: u16 },
}

/// Discriminant of a control message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Ask the neighbor across a reanimated link for its metric list
    MetricRequest = 0,
    /// Metric list sent in reply to a request
    MetricResponse = 1,
    /// Ask the neighbor to grant its per-destination reversal lock
    LockRequest = 2,
    /// The lock was granted
    LockGrant = 3,
    /// The lock is unavailable; not an error, retried after release
    LockDeny = 4,
    /// Release a previously granted lock
    LockRelease = 5,
    /// Propagate a fresh forwarding-state generation after a reversal
    SetVnode = 6,
    /// Ordered liveness report driving downstream reversal checks
    Heartbeat = 7,
}

impl MessageKind {
    fn from_byte(b: u8) -> Result<Self, WireError> {
        Ok(match b {
            0 => Self::MetricRequest,
            1 => Self::MetricResponse,
            2 => Self::LockRequest,
            3 => Self::LockGrant,
            4 => Self::LockDeny,
            5 => Self::LockRelease,
            6 => Self::SetVnode,
            7 => Self::Heartbeat,
            other => return Err(WireError::UnknownType(other)),
        })
    }
}

/// One destination/metric pair in the cluster list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricEntry {
    pub address: Ipv4Addr,
    pub metric: u8,
}

impl MetricEntry {
    pub fn new(address: Ipv4Addr, metric: u8) -> Self {
        Self { address, metric }
    }
}

/// The 4-byte prelude in front of every control message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    /// Total length of the datagram, prelude included
    pub length: u16,
    /// Per-sender datagram sequence number
    pub seq: u16,
}

impl PacketHeader {
    pub fn new(length: u16, seq: u16) -> Self {
        Self { length, seq }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.length);
        buf.put_u16(self.seq);
    }

    pub fn decode(buf: &mut &[u8]) -> Result<Self, WireError> {
        if buf.remaining() < PKT_HEADER_SIZE {
            return Err(WireError::Truncated {
                needed: PKT_HEADER_SIZE - buf.remaining(),
            });
        }
        Ok(Self {
            length: buf.get_u16(),
            seq: buf.get_u16(),
        })
    }
}

/// A decoded control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub kind: MessageKind,
    /// Validity time; carried for wire compatibility, unused by the core
    pub vtime: u8,
    /// Address of the node that built this message
    pub originator: Ipv4Addr,
    pub ttl: u8,
    pub hops: u8,
    /// Message sequence; staleness filter for metric traffic, heartbeat
    /// round for [`MessageKind::Heartbeat`], zero for the lock protocol
    pub seq: u16,
    pub metrics: Vec<MetricEntry>,
}

impl MessageHeader {
    /// Build a link-local message with the customary defaults
    pub fn new(kind: MessageKind, originator: Ipv4Addr) -> Self {
        Self {
            kind,
            vtime: 0,
            originator,
            ttl: 1,
            hops: 0,
            seq: 0,
            metrics: Vec::new(),
        }
    }

    pub fn with_seq(mut self, seq: u16) -> Self {
        self.seq = seq;
        self
    }

    /// Attach the single destination cluster used by lock, generation and
    /// heartbeat messages
    pub fn about(mut self, destination: Ipv4Addr, metric: u8) -> Self {
        self.metrics.push(MetricEntry::new(destination, metric));
        self
    }

    /// The destination a single-cluster control message refers to
    pub fn subject(&self) -> Option<Ipv4Addr> {
        self.metrics.first().map(|e| e.address)
    }

    /// The generation number carried by a [`MessageKind::SetVnode`]
    pub fn subject_metric(&self) -> Option<u8> {
        self.metrics.first().map(|e| e.metric)
    }

    fn cluster_count(&self) -> usize {
        self.metrics.len().div_ceil(3)
    }

    /// Encoded size in bytes, terminator included
    pub fn encoded_size(&self) -> usize {
        MSG_HEADER_SIZE + self.cluster_count() * CLUSTER_SIZE + TERMINATOR_SIZE
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind as u8);
        buf.put_u8(self.vtime);
        buf.put_u16(self.encoded_size() as u16);
        buf.put_slice(&self.originator.octets());
        buf.put_u8(self.ttl);
        buf.put_u8(self.hops);
        buf.put_u16(self.seq);
        for chunk in self.metrics.chunks(3) {
            buf.put_u8(chunk.len() as u8);
            for i in 0..3 {
                buf.put_u8(chunk.get(i).map(|e| e.metric).unwrap_or(0));
            }
            for i in 0..3 {
                let addr = chunk
                    .get(i)
                    .map(|e| e.address)
                    .unwrap_or(Ipv4Addr::UNSPECIFIED);
                buf.put_slice(&addr.octets());
            }
        }
        buf.put_u32(0);
    }

    pub fn decode(buf: &mut &[u8]) -> Result<Self, WireError> {
        if buf.remaining() < MSG_HEADER_SIZE {
            return Err(WireError::Truncated {
                needed: MSG_HEADER_SIZE - buf.remaining(),
            });
        }
        let kind = MessageKind::from_byte(buf.get_u8())?;
        let vtime = buf.get_u8();
        let declared = buf.get_u16();
        let originator = Ipv4Addr::from(buf.get_u32());
        let ttl = buf.get_u8();
        let hops = buf.get_u8();
        let seq = buf.get_u16();

        let mut metrics = Vec::new();
        loop {
            if buf.remaining() < TERMINATOR_SIZE {
                return Err(WireError::MissingTerminator);
            }
            let count = buf.get_u8();
            if count == 0 {
                // terminator word: three more zero bytes
                let rest = [buf.get_u8(), buf.get_u8(), buf.get_u8()];
                if rest != [0, 0, 0] {
                    return Err(WireError::BadClusterCount(0));
                }
                break;
            }
            if count > 3 {
                return Err(WireError::BadClusterCount(count));
            }
            if buf.remaining() < CLUSTER_SIZE - 1 {
                return Err(WireError::Truncated {
                    needed: CLUSTER_SIZE - 1 - buf.remaining(),
                });
            }
            let ms = [buf.get_u8(), buf.get_u8(), buf.get_u8()];
            let addrs = [
                Ipv4Addr::from(buf.get_u32()),
                Ipv4Addr::from(buf.get_u32()),
                Ipv4Addr::from(buf.get_u32()),
            ];
            for i in 0..count as usize {
                metrics.push(MetricEntry::new(addrs[i], ms[i]));
            }
        }

        let message = Self {
            kind,
            vtime,
            originator,
            ttl,
            hops,
            seq,
            metrics,
        };
        let actual = message.encoded_size() as u16;
        if declared != actual {
            return Err(WireError::SizeMismatch { declared, actual });
        }
        Ok(message)
    }
}

/// Encode a full control datagram: prelude plus message
pub fn encode_datagram(pkt_seq: u16, message: &MessageHeader) -> Vec<u8> {
    let total = PKT_HEADER_SIZE + message.encoded_size();
    let mut buf = BytesMut::with_capacity(total);
    PacketHeader::new(total as u16, pkt_seq).encode(&mut buf);
    message.encode(&mut buf);
    buf.to_vec()
}

/// Decode a full control datagram: prelude plus message
pub fn decode_datagram(data: &[u8]) -> Result<(PacketHeader, MessageHeader), WireError> {
    let mut buf = data;
    let pkt = PacketHeader::decode(&mut buf)?;
    let message = MessageHeader::decode(&mut buf)?;
    Ok((pkt, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[test]
    fn test_lock_message_exact_bytes() {
        let msg = MessageHeader::new(MessageKind::LockRequest, addr(1)).about(addr(9), 0);
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        #[rustfmt::skip]
        let expected: &[u8] = &[
            2,          // type = LockRequest
            0,          // vtime
            0, 32,      // size = 12 + 16 + 4
            10, 0, 0, 1, // originator
            1,          // ttl
            0,          // hops
            0, 0,       // seq
            1,          // cluster count
            0, 0, 0,    // metrics, padded
            10, 0, 0, 9, // addr 0
            0, 0, 0, 0, // addr 1 padding
            0, 0, 0, 0, // addr 2 padding
            0, 0, 0, 0, // terminator
        ];
        assert_eq!(&buf[..], expected);
    }

    #[test]
    fn test_metric_list_roundtrip_two_clusters() {
        let mut msg = MessageHeader::new(MessageKind::MetricResponse, addr(2)).with_seq(7);
        for i in 0..5u8 {
            msg.metrics.push(MetricEntry::new(addr(10 + i), i));
        }
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        assert_eq!(buf.len(), MSG_HEADER_SIZE + 2 * CLUSTER_SIZE + TERMINATOR_SIZE);

        let decoded = MessageHeader::decode(&mut &buf[..]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_empty_metric_list() {
        let msg = MessageHeader::new(MessageKind::MetricRequest, addr(3));
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        assert_eq!(buf.len(), MSG_HEADER_SIZE + TERMINATOR_SIZE);
        let decoded = MessageHeader::decode(&mut &buf[..]).unwrap();
        assert!(decoded.metrics.is_empty());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let msg = MessageHeader::new(MessageKind::Heartbeat, addr(1));
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let mut bytes = buf.to_vec();
        bytes[0] = 99;
        assert_eq!(
            MessageHeader::decode(&mut &bytes[..]),
            Err(WireError::UnknownType(99))
        );
    }

    #[test]
    fn test_truncated_rejected() {
        let msg = MessageHeader::new(MessageKind::MetricRequest, addr(1)).about(addr(5), 3);
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        // chop the terminator off
        let short = &buf[..buf.len() - TERMINATOR_SIZE];
        assert!(MessageHeader::decode(&mut &short[..]).is_err());
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let msg = MessageHeader::new(MessageKind::MetricRequest, addr(1));
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let mut bytes = buf.to_vec();
        bytes[3] = bytes[3].wrapping_add(16); // corrupt declared size
        assert!(matches!(
            MessageHeader::decode(&mut &bytes[..]),
            Err(WireError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_datagram_roundtrip() {
        let msg = MessageHeader::new(MessageKind::SetVnode, addr(4)).about(addr(8), 1);
        let bytes = encode_datagram(42, &msg);
        let (pkt, decoded) = decode_datagram(&bytes).unwrap();
        assert_eq!(pkt.seq, 42);
        assert_eq!(pkt.length as usize, bytes.len());
        assert_eq!(decoded, msg);
        assert_eq!(decoded.subject(), Some(addr(8)));
        assert_eq!(decoded.subject_metric(), Some(1));
    }

    #[test]
    fn test_unreachable_metric_preserved() {
        let msg = MessageHeader::new(MessageKind::MetricResponse, addr(1))
            .about(addr(6), METRIC_UNREACHABLE);
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = MessageHeader::decode(&mut &buf[..]).unwrap();
        assert_eq!(decoded.metrics[0].metric, METRIC_UNREACHABLE);
    }
}
