//! Router and interface identifiers
//!
//! A [`NodeId`] is the numeric identity of one router. Node identifiers
//! form the global total order used to break ties when two neighbors
//! report the same distance to a destination.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Unique identifier for a router node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Create a new node identifier
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Generate identifiers 0..count
    pub fn range(count: u32) -> Vec<Self> {
        (0..count).map(Self).collect()
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Index of an interface within a node's interface vector
pub type IfaceIndex = usize;

/// Interface 0 is the loopback and is never classified or reversed
pub const LOOPBACK_IFACE: IfaceIndex = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_ordering() {
        assert!(NodeId(1) < NodeId(2));
        assert_eq!(NodeId::new(7), NodeId(7));
    }

    #[test]
    fn test_node_id_range() {
        let ids = NodeId::range(3);
        assert_eq!(ids, vec![NodeId(0), NodeId(1), NodeId(2)]);
    }

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId(4).to_string(), "n4");
    }
}
