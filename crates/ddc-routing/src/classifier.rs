//! Initial interface classification
//!
//! Before any failure occurs, every interface is assigned a direction per
//! destination by comparing this node's distance with the distance the
//! direct neighbor across the interface reported. The node that is
//! strictly closer takes the Input end (traffic for the destination flows
//! in from the farther neighbor); equal distances are broken by the
//! global node-identifier order, the lower identifier taking Input.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use ddc_core::{IfaceIndex, LOOPBACK_IFACE, NodeId};
use tracing::debug;

/// What one direct neighbor reported during metric exchange
#[derive(Debug, Clone)]
pub struct NeighborView {
    pub node: NodeId,
    /// The neighbor's distance to each destination it knows
    pub distances: BTreeMap<Ipv4Addr, u32>,
}

/// Snapshot of neighbor metrics, indexed by interface
///
/// `None` for the loopback and for interfaces with no router attached.
#[derive(Debug, Clone, Default)]
pub struct ClassifyInput {
    pub neighbors: Vec<Option<NeighborView>>,
}

impl ClassifyInput {
    pub fn new(iface_count: usize) -> Self {
        Self {
            neighbors: vec![None; iface_count],
        }
    }

    pub fn set_neighbor(&mut self, iface: IfaceIndex, view: NeighborView) {
        self.neighbors[iface] = Some(view);
    }
}

/// The direction an interface starts out in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialDirection {
    Input,
    Output,
}

/// Compute the initial direction of every (destination, interface) pair
///
/// Returns one assignment per interface-neighbor that knows the
/// destination; interfaces whose neighbor never learned an address are
/// left out (they stay unclassified and are adopted on first receipt).
pub fn classify(
    own_node: NodeId,
    own_distances: &BTreeMap<Ipv4Addr, u32>,
    input: &ClassifyInput,
) -> Vec<(Ipv4Addr, IfaceIndex, InitialDirection)> {
    let mut assignments = Vec::new();
    for (iface, neighbor) in input.neighbors.iter().enumerate() {
        if iface == LOOPBACK_IFACE {
            continue;
        }
        let Some(neighbor) = neighbor else {
            continue;
        };
        for (&dest, &ours) in own_distances {
            let Some(&theirs) = neighbor.distances.get(&dest) else {
                continue;
            };
            let direction = if ours < theirs {
                InitialDirection::Input
            } else if ours > theirs {
                InitialDirection::Output
            } else if own_node < neighbor.node {
                InitialDirection::Input
            } else {
                InitialDirection::Output
            };
            debug!(
                dest = %dest,
                iface,
                ours,
                theirs,
                ?direction,
                "classified interface"
            );
            assignments.push((dest, iface, direction));
        }
    }
    assignments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn view(node: u32, entries: &[(Ipv4Addr, u32)]) -> NeighborView {
        NeighborView {
            node: NodeId(node),
            distances: entries.iter().copied().collect(),
        }
    }

    #[test]
    fn test_closer_node_takes_input() {
        // we are at distance 1, the neighbor at 2: traffic flows in from them
        let mut input = ClassifyInput::new(2);
        input.set_neighbor(1, view(7, &[(addr(9), 2)]));
        let own = BTreeMap::from([(addr(9), 1)]);

        let out = classify(NodeId(3), &own, &input);
        assert_eq!(out, vec![(addr(9), 1, InitialDirection::Input)]);
    }

    #[test]
    fn test_farther_node_takes_output() {
        let mut input = ClassifyInput::new(2);
        input.set_neighbor(1, view(7, &[(addr(9), 1)]));
        let own = BTreeMap::from([(addr(9), 2)]);

        let out = classify(NodeId(3), &own, &input);
        assert_eq!(out, vec![(addr(9), 1, InitialDirection::Output)]);
    }

    #[test]
    fn test_tie_broken_by_node_id() {
        let mut input = ClassifyInput::new(2);
        input.set_neighbor(1, view(7, &[(addr(9), 2)]));
        let own = BTreeMap::from([(addr(9), 2)]);

        // lower id takes Input
        let out = classify(NodeId(3), &own, &input);
        assert_eq!(out[0].2, InitialDirection::Input);

        // higher id takes Output
        let out = classify(NodeId(8), &own, &input);
        assert_eq!(out[0].2, InitialDirection::Output);
    }

    #[test]
    fn test_unknown_destination_skipped() {
        let mut input = ClassifyInput::new(2);
        input.set_neighbor(1, view(7, &[]));
        let own = BTreeMap::from([(addr(9), 2)]);

        assert!(classify(NodeId(3), &own, &input).is_empty());
    }

    #[test]
    fn test_loopback_never_classified() {
        let mut input = ClassifyInput::new(1);
        // only the loopback slot exists
        input.neighbors[0] = Some(view(7, &[(addr(9), 1)]));
        let own = BTreeMap::from([(addr(9), 2)]);

        assert!(classify(NodeId(3), &own, &input).is_empty());
    }
}
