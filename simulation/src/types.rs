//! Core types for the DDC simulation
//!
//! Models a network of numbered routers joined by point-to-point links
//! that can fail and recover mid-run, with data packets tracked from
//! injection to delivery or drop.

use std::net::Ipv4Addr;

use ddc_core::{DataPacket, NodeId};
use serde::{Deserialize, Serialize};

/// Unique identifier for a tracked packet (source node + counter)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PacketId {
    pub source: NodeId,
    pub sequence: u64,
}

impl std::fmt::Display for PacketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.source, self.sequence)
    }
}

/// A data packet in flight, with the bookkeeping the simulation tracks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedPacket {
    pub id: PacketId,
    pub packet: DataPacket,
    /// Tick the packet was injected
    pub created_at: u64,
    /// Hops taken so far
    pub hops: u32,
}

impl TrackedPacket {
    pub fn new(id: PacketId, packet: DataPacket, tick: u64) -> Self {
        Self {
            id,
            packet,
            created_at: tick,
            hops: 0,
        }
    }
}

/// Why a packet left the simulation without being delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// Every reversal option was exhausted
    NoRoute,
    /// Hop budget ran out
    TtlExpired,
    /// Bounce budget ran out
    BounceLimit,
    /// The chosen link failed before transmission
    LinkDown,
}

/// Events recorded in the simulation's log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NetworkEvent {
    /// Packet injected at a node
    Sent {
        id: PacketId,
        from: NodeId,
        dest: Ipv4Addr,
        tick: u64,
    },
    /// Packet handed to a next hop
    Forwarded {
        id: PacketId,
        node: NodeId,
        iface: usize,
        tick: u64,
    },
    /// Packet sent back out its ingress interface
    Bounced {
        id: PacketId,
        node: NodeId,
        iface: usize,
        tick: u64,
    },
    /// Packet reached its destination
    Delivered {
        id: PacketId,
        node: NodeId,
        tick: u64,
    },
    /// Packet dropped
    Dropped {
        id: PacketId,
        node: NodeId,
        reason: DropReason,
        tick: u64,
    },
    /// A link between two nodes failed
    LinkFailed { a: NodeId, b: NodeId, tick: u64 },
    /// A failed link came back
    LinkRecovered { a: NodeId, b: NodeId, tick: u64 },
}

/// Counters accumulated over one run
#[derive(Debug, Clone, Default)]
pub struct SimStats {
    pub packets_sent: u64,
    pub packets_delivered: u64,
    pub packets_dropped: u64,
    pub no_route_drops: u64,
    pub ttl_drops: u64,
    pub bounce_drops: u64,
    pub link_drops: u64,
    pub bounces: u64,
    pub control_messages: u64,
    pub total_hops: u64,
    pub total_latency: u64,
}

impl SimStats {
    pub fn delivery_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        self.packets_delivered as f64 / self.packets_sent as f64 * 100.0
    }
}

/// The address assigned to a node: 10.0.0.(index + 1)
pub fn node_addr(index: usize) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, (index + 1) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_id_display() {
        let id = PacketId {
            source: NodeId(2),
            sequence: 7,
        };
        assert_eq!(id.to_string(), "n2#7");
    }

    #[test]
    fn test_node_addr() {
        assert_eq!(node_addr(0), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(node_addr(3), Ipv4Addr::new(10, 0, 0, 4));
    }

    #[test]
    fn test_delivery_rate() {
        let mut stats = SimStats::default();
        assert_eq!(stats.delivery_rate(), 0.0);
        stats.packets_sent = 4;
        stats.packets_delivered = 3;
        assert_eq!(stats.delivery_rate(), 75.0);
    }
}
