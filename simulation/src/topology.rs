//! Topology definitions for the DDC simulation
//!
//! A [`Topology`] is a set of numbered routers and the point-to-point
//! links between them. Builders cover the shapes the scenarios use:
//! line, ring, full mesh, star, the two-path diamond and random graphs.

use rand::Rng;

/// A network shape: `node_count` routers and undirected edges
#[derive(Debug, Clone)]
pub struct Topology {
    pub node_count: usize,
    pub edges: Vec<(usize, usize)>,
}

impl Topology {
    /// Adjacency list over node indices
    pub fn adjacency(&self) -> Vec<Vec<usize>> {
        let mut adj = vec![Vec::new(); self.node_count];
        for &(a, b) in &self.edges {
            adj[a].push(b);
            adj[b].push(a);
        }
        adj
    }

    /// Hop distances from `start` to every node, None if unreachable
    pub fn distances_from(&self, start: usize) -> Vec<Option<u32>> {
        let adj = self.adjacency();
        let mut dist = vec![None; self.node_count];
        let mut queue = std::collections::VecDeque::new();
        dist[start] = Some(0);
        queue.push_back(start);
        while let Some(n) = queue.pop_front() {
            let d = dist[n].expect("queued nodes have distances");
            for &next in &adj[n] {
                if dist[next].is_none() {
                    dist[next] = Some(d + 1);
                    queue.push_back(next);
                }
            }
        }
        dist
    }

    /// Index of the edge between two nodes, if one exists
    pub fn edge_between(&self, a: usize, b: usize) -> Option<usize> {
        self.edges
            .iter()
            .position(|&(x, y)| (x == a && y == b) || (x == b && y == a))
    }

    /// Simple ASCII rendering of the shape
    pub fn visualize(&self) -> String {
        let mut out = String::new();
        out.push_str("Topology:\n");
        out.push_str(&format!("  Nodes: {}\n", self.node_count));
        out.push_str(&format!("  Links: {}\n\n", self.edges.len()));
        let adj = self.adjacency();
        for (node, neighbors) in adj.iter().enumerate() {
            let list: Vec<String> = neighbors.iter().map(|n| format!("n{}", n)).collect();
            out.push_str(&format!("  n{} -> [{}]\n", node, list.join(", ")));
        }
        out
    }
}

/// Builder for the standard shapes
pub struct TopologyBuilder {
    node_count: usize,
}

impl TopologyBuilder {
    pub fn new(node_count: usize) -> Self {
        assert!(node_count >= 2, "a topology needs at least two nodes");
        assert!(node_count <= 250, "node addresses live in one /24");
        Self { node_count }
    }

    /// n0 - n1 - n2 - ...
    pub fn line(self) -> Topology {
        let edges = (0..self.node_count - 1).map(|i| (i, i + 1)).collect();
        Topology {
            node_count: self.node_count,
            edges,
        }
    }

    /// A line closed into a cycle
    pub fn ring(self) -> Topology {
        let mut edges: Vec<(usize, usize)> =
            (0..self.node_count - 1).map(|i| (i, i + 1)).collect();
        edges.push((self.node_count - 1, 0));
        Topology {
            node_count: self.node_count,
            edges,
        }
    }

    /// Every node connected to every other
    pub fn full_mesh(self) -> Topology {
        let mut edges = Vec::new();
        for i in 0..self.node_count {
            for j in (i + 1)..self.node_count {
                edges.push((i, j));
            }
        }
        Topology {
            node_count: self.node_count,
            edges,
        }
    }

    /// n0 in the center, everyone else a spoke
    pub fn star(self) -> Topology {
        let edges = (1..self.node_count).map(|i| (0, i)).collect();
        Topology {
            node_count: self.node_count,
            edges,
        }
    }

    /// Random graph with the given connection probability; isolated
    /// nodes get one extra edge so the graph starts connected-ish
    pub fn random(self, connection_probability: f64) -> Topology {
        let mut rng = rand::rng();
        let mut edges = Vec::new();
        for i in 0..self.node_count {
            for j in (i + 1)..self.node_count {
                if rng.random::<f64>() < connection_probability {
                    edges.push((i, j));
                }
            }
        }
        let mut topo = Topology {
            node_count: self.node_count,
            edges,
        };
        let adj = topo.adjacency();
        for (i, neighbors) in adj.iter().enumerate() {
            if neighbors.is_empty() {
                let other = if i == 0 { 1 } else { i - 1 };
                topo.edges.push((other, i));
            }
        }
        topo
    }
}

/// Two node-disjoint paths: n0 - n1 - n3 and n0 - n2 - n3
pub fn diamond() -> Topology {
    from_edges(4, &[(0, 1), (0, 2), (1, 3), (2, 3)])
}

/// Build a topology from an explicit edge list
pub fn from_edges(node_count: usize, edges: &[(usize, usize)]) -> Topology {
    for &(a, b) in edges {
        assert!(a < node_count && b < node_count, "edge out of range");
        assert!(a != b, "no self-loops");
    }
    Topology {
        node_count,
        edges: edges.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_topology() {
        let topo = TopologyBuilder::new(3).line();
        assert_eq!(topo.edges.len(), 2);
        assert!(topo.edge_between(0, 1).is_some());
        assert!(topo.edge_between(0, 2).is_none());
    }

    #[test]
    fn test_ring_wraps() {
        let topo = TopologyBuilder::new(4).ring();
        assert_eq!(topo.edges.len(), 4);
        assert!(topo.edge_between(3, 0).is_some());
    }

    #[test]
    fn test_full_mesh_edge_count() {
        let topo = TopologyBuilder::new(4).full_mesh();
        assert_eq!(topo.edges.len(), 6);
    }

    #[test]
    fn test_diamond_distances() {
        let topo = diamond();
        let dist = topo.distances_from(3);
        assert_eq!(dist[3], Some(0));
        assert_eq!(dist[1], Some(1));
        assert_eq!(dist[2], Some(1));
        assert_eq!(dist[0], Some(2));
    }

    #[test]
    fn test_disconnected_distance_is_none() {
        let topo = from_edges(3, &[(0, 1)]);
        let dist = topo.distances_from(0);
        assert_eq!(dist[2], None);
    }

    #[test]
    fn test_random_no_isolated_nodes() {
        let topo = TopologyBuilder::new(8).random(0.0);
        let adj = topo.adjacency();
        assert!(adj.iter().all(|n| !n.is_empty()));
    }
}
