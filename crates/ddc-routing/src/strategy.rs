//! The interface both reversal engines implement
//!
//! A strategy is a pure per-node state machine: it never touches a socket
//! or a timer directly. Control traffic and scheduling requests come back
//! to the caller as [`Effect`]s, and all waiting is state retained until
//! the driver delivers a later [`TimerEvent`] or message.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use ddc_core::{DataPacket, IfaceIndex, LinkState, NodeId};
use ddc_wire::MessageHeader;

use crate::classifier::{ClassifyInput, InitialDirection};
use crate::config::RouterConfig;
use crate::error::RouteError;

/// Outcome of a forwarding decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Send out `iface`, stamping the given sequence bit and generation
    Forward {
        iface: IfaceIndex,
        seq: u8,
        vnode: u8,
    },
    /// Send back out the ingress interface toward the previous hop
    Bounce {
        iface: IfaceIndex,
        seq: u8,
        vnode: u8,
    },
    /// The destination is one of this node's own addresses
    Local,
    /// Every reversal option is exhausted
    NoRoute,
}

/// Deferred work a strategy asks the driver to deliver later
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// Periodic probe of dead interfaces
    ReanimationProbe,
    /// A reversal configured with a nonzero delay
    DelayedReversal {
        dest: Ipv4Addr,
        iface: IfaceIndex,
        kind: ReversalKind,
    },
    /// Retry a denied lock acquisition
    AeoRetry { dest: Ipv4Addr },
}

/// Which way a delayed reversal flips
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReversalKind {
    InputToOutput,
    OutputToInput,
}

/// Side effects of a routing call, executed by the driver
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Transmit a control message on an interface
    SendControl {
        iface: IfaceIndex,
        message: MessageHeader,
    },
    /// Deliver a timer event after `delay` ticks
    Schedule { delay: u64, event: TimerEvent },
}

/// Shared per-call context handed to a strategy
pub struct RouterCtx<'a> {
    pub node: NodeId,
    /// This node's primary address; originator of control messages and
    /// the tie-break identity of the lock protocol
    pub local_addr: Ipv4Addr,
    pub links: &'a dyn LinkState,
    pub config: &'a RouterConfig,
    /// Node-wide index of interfaces that died for any destination,
    /// consumed by the heartbeat subsystem
    pub dead: &'a mut BTreeSet<IfaceIndex>,
    pub effects: &'a mut Vec<Effect>,
}

impl RouterCtx<'_> {
    pub fn send(&mut self, iface: IfaceIndex, message: MessageHeader) {
        self.effects.push(Effect::SendControl { iface, message });
    }

    pub fn schedule(&mut self, delay: u64, event: TimerEvent) {
        self.effects.push(Effect::Schedule { delay, event });
    }
}

/// One reversal engine: the forwarding entry points plus the setup,
/// notification and recovery surface the router facade dispatches into
pub trait ReversalStrategy {
    /// Mark a directly attached destination's interface as Output
    fn add_host_route(&mut self, ctx: &mut RouterCtx<'_>, dest: Ipv4Addr, iface: IfaceIndex);

    /// Record this node's distance to a destination
    fn set_distance(&mut self, ctx: &mut RouterCtx<'_>, dest: Ipv4Addr, metric: u32);

    fn distance(&self, dest: Ipv4Addr) -> Option<u32>;

    fn known_destinations(&self) -> Vec<Ipv4Addr>;

    /// Run initial classification from a snapshot of neighbor metrics
    fn classify(
        &mut self,
        ctx: &mut RouterCtx<'_>,
        input: &ClassifyInput,
    ) -> Result<(), RouteError>;

    /// Set an interface's preference weight for a destination
    fn set_interface_priority(
        &mut self,
        ctx: &mut RouterCtx<'_>,
        dest: Ipv4Addr,
        iface: IfaceIndex,
        priority: u32,
    );

    /// Fix the heartbeat cascade order for a destination
    fn set_reversal_order(
        &mut self,
        ctx: &mut RouterCtx<'_>,
        dest: Ipv4Addr,
        before: Vec<IfaceIndex>,
        after: Vec<IfaceIndex>,
    );

    /// Start the network-wide reversal cascade at this node
    fn send_initial_heartbeat(&mut self, ctx: &mut RouterCtx<'_>, dest: Ipv4Addr);

    /// Locally originated packet: pick an outgoing interface
    fn route_output(&mut self, ctx: &mut RouterCtx<'_>, dest: Ipv4Addr) -> RouteDecision;

    /// Transit packet: advance the handshake, then pick an interface
    fn route_input(
        &mut self,
        ctx: &mut RouterCtx<'_>,
        packet: &DataPacket,
        iif: IfaceIndex,
    ) -> RouteDecision;

    /// Edge-triggered link failure notification
    fn link_down(&mut self, ctx: &mut RouterCtx<'_>, iface: IfaceIndex);

    /// Edge-triggered link recovery notification
    fn link_up(&mut self, ctx: &mut RouterCtx<'_>, iface: IfaceIndex);

    /// Strategy-specific control traffic (the lock protocol family)
    fn handle_control(&mut self, ctx: &mut RouterCtx<'_>, iif: IfaceIndex, msg: &MessageHeader);

    /// A reversal whose configured delay has elapsed
    fn apply_delayed_reversal(
        &mut self,
        ctx: &mut RouterCtx<'_>,
        dest: Ipv4Addr,
        iface: IfaceIndex,
        kind: ReversalKind,
    );

    /// A deferred lock retry came due
    fn handle_aeo_retry(&mut self, ctx: &mut RouterCtx<'_>, dest: Ipv4Addr);

    /// Whether any Output interface for the destination has a live link
    fn has_live_output(&self, links: &dyn LinkState, dest: Ipv4Addr) -> bool;

    /// Reintegrate a reanimated interface decided by metric exchange
    fn reintegrate(
        &mut self,
        ctx: &mut RouterCtx<'_>,
        dest: Ipv4Addr,
        iface: IfaceIndex,
        direction: InitialDirection,
        new_distance: Option<u32>,
    );

    /// Partition invariant for one destination, for tests and assertions
    fn check_partition(&self, dest: Ipv4Addr) -> bool;

    /// Sequence bits (local, remote) for one link, for tests and tracing
    fn sequence_bits(&self, dest: Ipv4Addr, iface: IfaceIndex) -> Option<(u8, u8)>;

    /// Total reversals this node has executed
    fn reversal_count(&self) -> u64;

    /// Human-readable per-destination state dump
    fn describe(&self, dest: Ipv4Addr) -> String;
}
