//! Discrete-event engine for DDC networks
//!
//! All coordination between routers is message passing with transit
//! delay: data packets, control datagrams (carried in their wire
//! encoding) and each node's own timer events share one time-ordered
//! queue. Link failures and recoveries are events too, delivered to both
//! endpoints edge-triggered.

use std::collections::BinaryHeap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use ddc_core::{DataPacket, LinkFlag, LinkState, NodeId, SharedLinks};
use ddc_routing::classifier::{ClassifyInput, NeighborView};
use ddc_routing::{DdcRouter, Effect, RouteDecision, RouterConfig, StrategyKind, TimerEvent};
use ddc_wire::{decode_datagram, encode_datagram};
use tracing::{debug, info, trace, warn};

use crate::topology::Topology;
use crate::types::{
    DropReason, NetworkEvent, PacketId, SimStats, TrackedPacket, node_addr,
};

/// Tunables for one simulation run
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Ticks a packet or control message spends on a link
    pub transit_delay: u64,
    /// Hard stop for the event loop
    pub max_ticks: u64,
    /// TTL stamped on injected packets
    pub ttl: u8,
    /// Log every routed packet to the event log
    pub trace_routing: bool,
    /// Configuration handed to every router
    pub router: RouterConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            transit_delay: 1,
            max_ticks: 2_000,
            ttl: 32,
            trace_routing: true,
            router: RouterConfig::default(),
        }
    }
}

/// One router plus its attachment points
struct SimNode {
    id: NodeId,
    addr: Ipv4Addr,
    router: DdcRouter<SharedLinks>,
    links: Arc<SharedLinks>,
    /// Per interface: the node index and interface on the far end
    peers: Vec<Option<(usize, usize)>>,
    /// Packets delivered here
    delivered: Vec<TrackedPacket>,
    packet_seq: u64,
}

/// One point-to-point link and where it attaches
struct LinkInfo {
    a: (usize, usize),
    b: (usize, usize),
    flag: LinkFlag,
}

#[derive(Debug, Clone)]
enum SimEvent {
    Send {
        node: usize,
        dest: Ipv4Addr,
        payload: Vec<u8>,
    },
    Packet {
        node: usize,
        iface: usize,
        packet: TrackedPacket,
    },
    Control {
        node: usize,
        iface: usize,
        frame: Vec<u8>,
    },
    Timer {
        node: usize,
        event: TimerEvent,
    },
    FailLink {
        link: usize,
    },
    HealLink {
        link: usize,
    },
}

/// Queue entry; ordering is reversed so the BinaryHeap pops the earliest
/// tick first, FIFO within a tick
struct Scheduled {
    at: u64,
    seq: u64,
    event: SimEvent,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// The simulation state
pub struct Simulation {
    pub topo: Topology,
    nodes: Vec<SimNode>,
    links: Vec<LinkInfo>,
    queue: BinaryHeap<Scheduled>,
    queue_seq: u64,
    ctrl_seq: u16,
    pub now: u64,
    pub config: SimConfig,
    pub stats: SimStats,
    pub event_log: Vec<NetworkEvent>,
}

impl Simulation {
    /// Build routers for a topology, wire the links, compute hop-count
    /// metrics and run the initial classification
    pub fn new(topo: Topology, config: SimConfig) -> Self {
        let n = topo.node_count;

        // attach link endpoints
        let mut link_tables: Vec<SharedLinks> = (0..n).map(|_| SharedLinks::new()).collect();
        let mut peers: Vec<Vec<Option<(usize, usize)>>> = vec![vec![None]; n];
        let mut links = Vec::new();
        for &(a, b) in &topo.edges {
            let flag = LinkFlag::up();
            let iface_a = link_tables[a].attach(flag.clone());
            let iface_b = link_tables[b].attach(flag.clone());
            peers[a].push(Some((b, iface_b)));
            peers[b].push(Some((a, iface_a)));
            debug_assert_eq!(peers[a].len() - 1, iface_a);
            debug_assert_eq!(peers[b].len() - 1, iface_b);
            links.push(LinkInfo {
                a: (a, iface_a),
                b: (b, iface_b),
                flag,
            });
        }

        // hop distances between every pair
        let all_dists: Vec<Vec<Option<u32>>> =
            (0..n).map(|i| topo.distances_from(i)).collect();

        let mut nodes: Vec<SimNode> = link_tables
            .into_iter()
            .zip(peers)
            .enumerate()
            .map(|(i, (table, peers))| {
                let links = Arc::new(table);
                let mut router =
                    DdcRouter::new(NodeId(i as u32), links.clone(), config.router.clone());
                router.add_local_address(node_addr(i));
                SimNode {
                    id: NodeId(i as u32),
                    addr: node_addr(i),
                    router,
                    links,
                    peers,
                    delivered: Vec::new(),
                    packet_seq: 0,
                }
            })
            .collect();

        // every node learns its distance to every other reachable node
        for (i, node) in nodes.iter_mut().enumerate() {
            for dest in 0..n {
                if dest == i {
                    continue;
                }
                if let Some(d) = all_dists[dest][i] {
                    node.router.set_distance(node_addr(dest), d);
                }
            }
        }

        // classification from each neighbor's exchanged metric table
        for i in 0..n {
            let iface_count = nodes[i].peers.len();
            let mut input = ClassifyInput::new(iface_count);
            for (iface, peer) in nodes[i].peers.iter().enumerate() {
                let Some((peer_idx, _)) = peer else { continue };
                let distances = (0..n)
                    .filter_map(|dest| {
                        all_dists[dest][*peer_idx].map(|d| (node_addr(dest), d))
                    })
                    .collect();
                input.set_neighbor(
                    iface,
                    NeighborView {
                        node: NodeId(*peer_idx as u32),
                        distances,
                    },
                );
            }
            nodes[i]
                .router
                .classify_interfaces(&input)
                .expect("initial classification covers every connected interface");
        }

        // the locking strategy additionally needs the heartbeat cascade
        // order: nearer neighbors report before us, farther ones after
        if config.router.strategy == StrategyKind::Locking {
            for i in 0..n {
                for dest in 0..n {
                    if dest == i {
                        // the destination itself starts every cascade:
                        // nothing before it, every wired interface after
                        let after: Vec<usize> = (1..nodes[i].peers.len()).collect();
                        nodes[i]
                            .router
                            .set_reversal_order(node_addr(dest), Vec::new(), after);
                        continue;
                    }
                    let Some(mine) = all_dists[dest][i] else { continue };
                    let mut before = Vec::new();
                    let mut after = Vec::new();
                    for (iface, peer) in nodes[i].peers.iter().enumerate() {
                        let Some((peer_idx, _)) = peer else { continue };
                        match all_dists[dest][*peer_idx] {
                            Some(theirs) if theirs < mine => before.push(iface),
                            Some(theirs) if theirs > mine => after.push(iface),
                            _ => {}
                        }
                    }
                    nodes[i]
                        .router
                        .set_reversal_order(node_addr(dest), before, after);
                }
            }
        }

        info!(nodes = n, links = topo.edges.len(), "simulation built");
        Self {
            topo,
            nodes,
            links,
            queue: BinaryHeap::new(),
            queue_seq: 0,
            ctrl_seq: 0,
            now: 0,
            config,
            stats: SimStats::default(),
            event_log: Vec::new(),
        }
    }

    fn schedule(&mut self, at: u64, event: SimEvent) {
        self.queue_seq += 1;
        self.queue.push(Scheduled {
            at,
            seq: self.queue_seq,
            event,
        });
    }

    /// Queue a packet injection at a future tick
    pub fn send_at(&mut self, tick: u64, from: usize, dest_node: usize, payload: Vec<u8>) {
        self.schedule(
            tick,
            SimEvent::Send {
                node: from,
                dest: node_addr(dest_node),
                payload,
            },
        );
    }

    /// Queue a link failure between two adjacent nodes
    pub fn fail_link_at(&mut self, tick: u64, a: usize, b: usize) {
        let link = self
            .topo
            .edge_between(a, b)
            .expect("failing a link that exists");
        self.schedule(tick, SimEvent::FailLink { link });
    }

    /// Queue a link recovery between two adjacent nodes
    pub fn heal_link_at(&mut self, tick: u64, a: usize, b: usize) {
        let link = self
            .topo
            .edge_between(a, b)
            .expect("healing a link that exists");
        self.schedule(tick, SimEvent::HealLink { link });
    }

    /// Start the locking strategy's reversal cascade at a node, for the
    /// given destination node's address
    pub fn initial_heartbeat(&mut self, node: usize, dest_node: usize) {
        let effects = self.nodes[node]
            .router
            .send_initial_heartbeat(node_addr(dest_node));
        self.apply_effects(node, effects);
    }

    /// Process events until the queue drains or the tick budget runs out
    pub fn run(&mut self) {
        while let Some(top) = self.queue.peek() {
            if top.at > self.config.max_ticks {
                break;
            }
            let scheduled = self.queue.pop().expect("peeked entry");
            self.now = scheduled.at;
            self.dispatch(scheduled.event);
        }
    }

    /// Process events up to and including tick `until`
    pub fn run_until(&mut self, until: u64) {
        while let Some(top) = self.queue.peek() {
            if top.at > until {
                break;
            }
            let scheduled = self.queue.pop().expect("peeked entry");
            self.now = scheduled.at;
            self.dispatch(scheduled.event);
        }
        self.now = self.now.max(until);
    }

    fn dispatch(&mut self, event: SimEvent) {
        match event {
            SimEvent::Send {
                node,
                dest,
                payload,
            } => self.handle_send(node, dest, payload),
            SimEvent::Packet {
                node,
                iface,
                packet,
            } => self.handle_packet(node, iface, packet),
            SimEvent::Control { node, iface, frame } => self.handle_frame(node, iface, frame),
            SimEvent::Timer { node, event } => {
                let effects = self.nodes[node].router.handle_timer(event);
                self.apply_effects(node, effects);
            }
            SimEvent::FailLink { link } => self.apply_link_state(link, false),
            SimEvent::HealLink { link } => self.apply_link_state(link, true),
        }
    }

    fn handle_send(&mut self, node: usize, dest: Ipv4Addr, payload: Vec<u8>) {
        let id = {
            let n = &mut self.nodes[node];
            n.packet_seq += 1;
            PacketId {
                source: n.id,
                sequence: n.packet_seq,
            }
        };
        let packet = DataPacket::new(self.nodes[node].addr, dest, payload).with_ttl(self.config.ttl);
        let tracked = TrackedPacket::new(id, packet, self.now);
        self.stats.packets_sent += 1;
        self.log(NetworkEvent::Sent {
            id,
            from: self.nodes[node].id,
            dest,
            tick: self.now,
        });

        let (decision, effects) = self.nodes[node].router.route_output(dest);
        self.apply_effects(node, effects);
        match decision {
            RouteDecision::Local => self.deliver(node, tracked),
            RouteDecision::Forward { iface, seq, vnode }
            | RouteDecision::Bounce { iface, seq, vnode } => {
                self.transmit(node, iface, tracked, seq, vnode, false);
            }
            RouteDecision::NoRoute => self.drop_packet(node, id, DropReason::NoRoute),
        }
    }

    fn handle_packet(&mut self, node: usize, iface: usize, tracked: TrackedPacket) {
        trace!(
            node = %self.nodes[node].id,
            iface,
            id = %tracked.id,
            "packet arrival"
        );
        let (decision, effects) = self.nodes[node].router.route_input(&tracked.packet, iface);
        self.apply_effects(node, effects);
        match decision {
            RouteDecision::Local => self.deliver(node, tracked),
            RouteDecision::Forward {
                iface: out,
                seq,
                vnode,
            } => {
                let bounce = out == iface;
                self.transmit(node, out, tracked, seq, vnode, bounce);
            }
            RouteDecision::Bounce {
                iface: out,
                seq,
                vnode,
            } => {
                self.transmit(node, out, tracked, seq, vnode, true);
            }
            RouteDecision::NoRoute => self.drop_packet(node, tracked.id, DropReason::NoRoute),
        }
    }

    /// Stamp the header and put the packet on the wire
    fn transmit(
        &mut self,
        node: usize,
        out: usize,
        mut tracked: TrackedPacket,
        seq: u8,
        vnode: u8,
        bounce: bool,
    ) {
        tracked.packet.set_sequence_bit(seq);
        tracked.packet.set_generation(vnode);

        if bounce {
            self.stats.bounces += 1;
            self.log(NetworkEvent::Bounced {
                id: tracked.id,
                node: self.nodes[node].id,
                iface: out,
                tick: self.now,
            });
            if !tracked.packet.record_bounce(self.config.router.max_bounces) {
                self.drop_packet(node, tracked.id, DropReason::BounceLimit);
                return;
            }
        } else {
            self.log(NetworkEvent::Forwarded {
                id: tracked.id,
                node: self.nodes[node].id,
                iface: out,
                tick: self.now,
            });
        }

        if !tracked.packet.decrement_ttl() {
            self.drop_packet(node, tracked.id, DropReason::TtlExpired);
            return;
        }
        if !self.nodes[node].links.is_up(out) {
            self.drop_packet(node, tracked.id, DropReason::LinkDown);
            return;
        }
        let Some((peer, peer_iface)) = self.nodes[node].peers.get(out).copied().flatten() else {
            warn!(node = %self.nodes[node].id, out, "transmit on an unwired interface");
            self.drop_packet(node, tracked.id, DropReason::LinkDown);
            return;
        };
        tracked.hops += 1;
        let at = self.now + self.config.transit_delay;
        self.schedule(
            at,
            SimEvent::Packet {
                node: peer,
                iface: peer_iface,
                packet: tracked,
            },
        );
    }

    fn handle_frame(&mut self, node: usize, iface: usize, frame: Vec<u8>) {
        let (_, msg) = match decode_datagram(&frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(node = %self.nodes[node].id, iface, error = %e, "undecodable control frame");
                return;
            }
        };
        self.stats.control_messages += 1;
        trace!(node = %self.nodes[node].id, iface, kind = ?msg.kind, "control arrival");
        let effects = self.nodes[node].router.handle_control(iface, &msg);
        self.apply_effects(node, effects);
    }

    fn apply_effects(&mut self, node: usize, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::SendControl { iface, message } => {
                    if !self.nodes[node].links.is_up(iface) {
                        trace!(node = %self.nodes[node].id, iface, "control send on a down link");
                        continue;
                    }
                    let Some((peer, peer_iface)) =
                        self.nodes[node].peers.get(iface).copied().flatten()
                    else {
                        continue;
                    };
                    self.ctrl_seq = self.ctrl_seq.wrapping_add(1);
                    let frame = encode_datagram(self.ctrl_seq, &message);
                    let at = self.now + self.config.transit_delay;
                    self.schedule(
                        at,
                        SimEvent::Control {
                            node: peer,
                            iface: peer_iface,
                            frame,
                        },
                    );
                }
                Effect::Schedule { delay, event } => {
                    let at = self.now + delay;
                    self.schedule(at, SimEvent::Timer { node, event });
                }
            }
        }
    }

    fn apply_link_state(&mut self, link: usize, up: bool) {
        let info = &self.links[link];
        let (a, iface_a) = info.a;
        let (b, iface_b) = info.b;
        info.flag.set_up(up);
        let (id_a, id_b) = (self.nodes[a].id, self.nodes[b].id);
        if up {
            self.log(NetworkEvent::LinkRecovered {
                a: id_a,
                b: id_b,
                tick: self.now,
            });
            info!(a = %id_a, b = %id_b, tick = self.now, "link recovered");
            let effects = self.nodes[a].router.link_up(iface_a);
            self.apply_effects(a, effects);
            let effects = self.nodes[b].router.link_up(iface_b);
            self.apply_effects(b, effects);
        } else {
            self.log(NetworkEvent::LinkFailed {
                a: id_a,
                b: id_b,
                tick: self.now,
            });
            info!(a = %id_a, b = %id_b, tick = self.now, "link failed");
            let effects = self.nodes[a].router.link_down(iface_a);
            self.apply_effects(a, effects);
            let effects = self.nodes[b].router.link_down(iface_b);
            self.apply_effects(b, effects);
        }
    }

    fn deliver(&mut self, node: usize, tracked: TrackedPacket) {
        self.stats.packets_delivered += 1;
        self.stats.total_hops += tracked.hops as u64;
        self.stats.total_latency += self.now.saturating_sub(tracked.created_at);
        self.log(NetworkEvent::Delivered {
            id: tracked.id,
            node: self.nodes[node].id,
            tick: self.now,
        });
        info!(
            node = %self.nodes[node].id,
            id = %tracked.id,
            hops = tracked.hops,
            tick = self.now,
            "packet delivered"
        );
        self.nodes[node].delivered.push(tracked);
    }

    fn drop_packet(&mut self, node: usize, id: PacketId, reason: DropReason) {
        self.stats.packets_dropped += 1;
        match reason {
            DropReason::NoRoute => self.stats.no_route_drops += 1,
            DropReason::TtlExpired => self.stats.ttl_drops += 1,
            DropReason::BounceLimit => self.stats.bounce_drops += 1,
            DropReason::LinkDown => self.stats.link_drops += 1,
        }
        self.log(NetworkEvent::Dropped {
            id,
            node: self.nodes[node].id,
            reason,
            tick: self.now,
        });
        debug!(node = %self.nodes[node].id, id = %id, ?reason, "packet dropped");
    }

    fn log(&mut self, event: NetworkEvent) {
        if self.config.trace_routing {
            trace!(?event, "event");
        }
        self.event_log.push(event);
    }

    /// The router at a node index, for inspection
    pub fn router(&self, node: usize) -> &DdcRouter<SharedLinks> {
        &self.nodes[node].router
    }

    /// Packets delivered at a node
    pub fn delivered_at(&self, node: usize) -> &[TrackedPacket] {
        &self.nodes[node].delivered
    }

    /// Reversals executed across all nodes
    pub fn total_reversals(&self) -> u64 {
        self.nodes.iter().map(|n| n.router.reversal_count()).sum()
    }

    /// Partition invariant across every node and destination
    pub fn check_partitions(&self) -> bool {
        self.nodes.iter().all(|n| {
            n.router
                .known_destinations()
                .iter()
                .all(|&dest| n.router.check_partition(dest))
        })
    }

    /// One-line progress summary
    pub fn state_summary(&self) -> String {
        format!(
            "tick {}: {} sent, {} delivered, {} dropped, {} bounces, {} control msgs, {} reversals",
            self.now,
            self.stats.packets_sent,
            self.stats.packets_delivered,
            self.stats.packets_dropped,
            self.stats.bounces,
            self.stats.control_messages,
            self.total_reversals()
        )
    }

    /// Direction-state dump of every router
    pub fn dump_routing_state(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            out.push_str(&format!("{} ({}):\n", node.id, node.addr));
            for line in node.router.describe_all().lines() {
                out.push_str("  ");
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}
