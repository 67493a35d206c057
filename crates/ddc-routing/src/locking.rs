//! Synchronous all-edges-out reversal under a cross-neighbor lock
//!
//! The locking strategy keeps two generations of forwarding state per
//! destination. An all-edges-out (AEO) reversal builds the next
//! generation with every usable interface pointing Out, stamps it with a
//! fresh generation number and propagates that number to each neighbor,
//! so packets carrying the old number keep routing against the old state
//! and a half-reversed picture is never observable.
//!
//! The mutual exclusion that guards AEO is a message sub-protocol
//! (request/grant/deny/release), one lock per (destination, neighbor).
//! Acquisition walks the interfaces in order; a denial releases whatever
//! was acquired and defers, retried when the local grant count returns to
//! zero or a retry timer fires. Two neighbors racing for each other's
//! locks are untangled by address order: the lower address wins and the
//! higher side backs off.

use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::fmt::Write as _;
use std::net::Ipv4Addr;

use ddc_core::{DataPacket, IfaceIndex, LOOPBACK_IFACE, LinkState};
use ddc_wire::{MessageHeader, MessageKind};
use tracing::{debug, info, trace, warn};

use crate::classifier::{self, ClassifyInput, InitialDirection};
use crate::error::RouteError;
use crate::strategy::{
    ReversalKind, ReversalStrategy, RouteDecision, RouterCtx, TimerEvent,
};

/// Link direction relative to one destination, one generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkDirection {
    Unknown,
    In,
    Out,
    Dead,
}

impl LinkDirection {
    fn shorthand(self) -> &'static str {
        match self {
            Self::Unknown => "-",
            Self::In => "I",
            Self::Out => "O",
            Self::Dead => "X",
        }
    }
}

/// Heap entry ordering outputs by priority, higher first; interface
/// index breaks ties deterministically, lower first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PrioLink {
    priority: u32,
    iface: IfaceIndex,
}

impl Ord for PrioLink {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.iface.cmp(&self.iface))
    }
}

impl PartialOrd for PrioLink {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// One generation of forwarding state for one destination
#[derive(Debug, Clone)]
struct GenerationState {
    directions: Vec<LinkDirection>,
    inputs: VecDeque<IfaceIndex>,
    outputs: BinaryHeap<PrioLink>,
    to_reverse: VecDeque<IfaceIndex>,
    local_seq: Vec<u8>,
    remote_seq: Vec<u8>,
    /// Every link by priority, the last-resort pool
    prioritized: BinaryHeap<PrioLink>,
}

impl GenerationState {
    fn new(iface_count: usize) -> Self {
        Self {
            directions: vec![LinkDirection::Unknown; iface_count],
            inputs: VecDeque::new(),
            outputs: BinaryHeap::new(),
            to_reverse: VecDeque::new(),
            local_seq: vec![0; iface_count],
            remote_seq: vec![0; iface_count],
            prioritized: BinaryHeap::new(),
        }
    }
}

/// An in-flight lock acquisition, one interface at a time in order
#[derive(Debug, Clone)]
struct LockAttempt {
    granted: Vec<IfaceIndex>,
    awaiting: IfaceIndex,
    remaining: VecDeque<IfaceIndex>,
}

/// Everything the locking strategy tracks for one destination
#[derive(Debug)]
struct AeoDestination {
    distance: Option<u32>,
    generations: [GenerationState; 2],
    local_vnode: u8,
    /// Generation the neighbor across each interface expects
    remote_vnode: Vec<u8>,
    priorities: Vec<u32>,
    /// Lock grants we handed to the neighbor across each interface
    granted: Vec<bool>,
    grant_count: u32,
    /// We hold every neighbor's lock and are mid-flip
    held: bool,
    /// An AEO is wanted; retried whenever the grant count drains
    aeo_requested: bool,
    attempt: Option<LockAttempt>,
    hb_seq: u16,
    /// Who has heartbeated this round; the loopback slot marks that this
    /// node has already acted on the round
    hb_state: Vec<bool>,
    reverse_before: Vec<IfaceIndex>,
    reverse_after: Vec<IfaceIndex>,
}

impl AeoDestination {
    fn new(iface_count: usize) -> Self {
        Self {
            distance: None,
            generations: [
                GenerationState::new(iface_count),
                GenerationState::new(iface_count),
            ],
            local_vnode: 0,
            remote_vnode: vec![0; iface_count],
            priorities: vec![0; iface_count],
            granted: vec![false; iface_count],
            grant_count: 0,
            held: false,
            aeo_requested: false,
            attempt: None,
            hb_seq: 0,
            hb_state: vec![false; iface_count],
            reverse_before: Vec::new(),
            reverse_after: Vec::new(),
        }
    }
}

fn remove_value(list: &mut VecDeque<IfaceIndex>, value: IfaceIndex) {
    if let Some(pos) = list.iter().position(|&i| i == value) {
        list.remove(pos);
    }
}

fn control(kind: MessageKind, from: Ipv4Addr, dest: Ipv4Addr, metric: u8) -> MessageHeader {
    MessageHeader::new(kind, from).about(dest, metric)
}

/// The lock-based all-edges-out reversal engine
#[derive(Debug, Default)]
pub struct LockingReversal {
    dests: BTreeMap<Ipv4Addr, AeoDestination>,
    reversals: u64,
    aeo_count: u64,
}

impl LockingReversal {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, dest: Ipv4Addr, iface_count: usize) -> &mut AeoDestination {
        self.dests
            .entry(dest)
            .or_insert_with(|| AeoDestination::new(iface_count))
    }
}

/// Pop the best valid output without losing still-valid entries.
/// Entries whose direction is no longer Out, or whose link has failed,
/// are dropped; an AEO or a reversal re-adds them when they come back.
fn find_output_port(
    state: &mut GenerationState,
    links: &dyn LinkState,
    avoid: Option<IfaceIndex>,
) -> Option<IfaceIndex> {
    let mut kept: Vec<PrioLink> = Vec::new();
    let mut chosen: Option<IfaceIndex> = None;
    let mut fallback: Option<IfaceIndex> = None;
    while let Some(top) = state.outputs.pop() {
        if state.directions[top.iface] != LinkDirection::Out {
            continue;
        }
        if !links.is_up(top.iface) {
            continue;
        }
        kept.push(top);
        if avoid == Some(top.iface) {
            fallback.get_or_insert(top.iface);
            continue;
        }
        chosen = Some(top.iface);
        break;
    }
    for entry in kept {
        state.outputs.push(entry);
    }
    chosen.or(fallback)
}

/// Highest-priority live link of any direction, the last resort
fn find_high_priority_link(state: &mut GenerationState, links: &dyn LinkState) -> Option<IfaceIndex> {
    while let Some(top) = state.prioritized.pop() {
        if links.is_up(top.iface) {
            let iface = top.iface;
            state.prioritized.push(top);
            return Some(iface);
        }
    }
    None
}

fn reverse_in_to_out(
    d: &mut AeoDestination,
    v: usize,
    dest: Ipv4Addr,
    link: IfaceIndex,
    reversals: &mut u64,
) {
    if d.generations[v].directions[link] != LinkDirection::In {
        return;
    }
    *reversals += 1;
    let prio = d.priorities[link];
    let state = &mut d.generations[v];
    state.directions[link] = LinkDirection::Out;
    remove_value(&mut state.inputs, link);
    state.outputs.push(PrioLink {
        priority: prio,
        iface: link,
    });
    state.local_seq[link] ^= 1;
    debug!(dest = %dest, link, vnode = v, seq = state.local_seq[link], "reversed input to output");
}

fn reverse_out_to_in(
    d: &mut AeoDestination,
    v: usize,
    dest: Ipv4Addr,
    link: IfaceIndex,
    reversals: &mut u64,
) {
    if d.generations[v].directions[link] != LinkDirection::Out {
        return;
    }
    *reversals += 1;
    let state = &mut d.generations[v];
    state.directions[link] = LinkDirection::In;
    state.inputs.push_front(link);
    state.remote_seq[link] ^= 1;
    debug!(dest = %dest, link, vnode = v, seq = state.remote_seq[link], "reversed output to input");
}

/// Flip everything on the to-reverse list, refilling it from the inputs
/// once drained so repeated exhaustion walks the whole input pool
fn schedule_reversals(
    d: &mut AeoDestination,
    v: usize,
    dest: Ipv4Addr,
    ctx: &mut RouterCtx<'_>,
    reversals: &mut u64,
) {
    if d.generations[v].to_reverse.is_empty() {
        d.generations[v].to_reverse = d.generations[v].inputs.iter().copied().collect();
    }
    let work: Vec<IfaceIndex> = d.generations[v].to_reverse.drain(..).collect();
    let delay = ctx.config.reverse_input_to_output_delay;
    for link in work {
        if delay == 0 {
            reverse_in_to_out(d, v, dest, link, reversals);
        } else {
            ctx.schedule(
                delay,
                TimerEvent::DelayedReversal {
                    dest,
                    iface: link,
                    kind: ReversalKind::InputToOutput,
                },
            );
        }
    }
    d.generations[v].to_reverse = d.generations[v].inputs.iter().copied().collect();
}

/// The shared receive path: output, else reverse and retry, else the
/// highest-priority live link, else no route
fn standard_receive(
    d: &mut AeoDestination,
    v: usize,
    dest: Ipv4Addr,
    ctx: &mut RouterCtx<'_>,
    avoid: Option<IfaceIndex>,
    reversals: &mut u64,
) -> RouteDecision {
    let rounds = d.generations[v].directions.len() + 2;
    for _ in 0..rounds {
        if let Some(link) = find_output_port(&mut d.generations[v], ctx.links, avoid) {
            return RouteDecision::Forward {
                iface: link,
                seq: d.generations[v].local_seq[link],
                vnode: d.remote_vnode[link],
            };
        }
        if !ctx.config.allow_reversal {
            return RouteDecision::NoRoute;
        }
        schedule_reversals(d, v, dest, ctx, reversals);
        if d.generations[v].outputs.is_empty() {
            if let Some(link) = find_high_priority_link(&mut d.generations[v], ctx.links) {
                debug!(dest = %dest, link, "no output, using highest-priority live link");
                return RouteDecision::Forward {
                    iface: link,
                    seq: d.generations[v].local_seq[link],
                    vnode: d.remote_vnode[link],
                };
            }
            return RouteDecision::NoRoute;
        }
        if d.generations[v].inputs.is_empty() && d.generations[v].outputs.is_empty() {
            break;
        }
    }
    RouteDecision::NoRoute
}

impl LockingReversal {
    fn request_aeo(&mut self, ctx: &mut RouterCtx<'_>, dest: Ipv4Addr) {
        let n = ctx.links.iface_count();
        self.entry(dest, n).aeo_requested = true;
        self.try_begin_aeo(ctx, dest);
    }

    fn try_begin_aeo(&mut self, ctx: &mut RouterCtx<'_>, dest: Ipv4Addr) {
        let n = ctx.links.iface_count();
        {
            let Some(d) = self.dests.get_mut(&dest) else {
                return;
            };
            if d.held || d.attempt.is_some() {
                return;
            }
            if d.grant_count != 0 {
                trace!(dest = %dest, "grants outstanding, AEO deferred until release");
                return;
            }
            let mut ifaces: VecDeque<IfaceIndex> =
                (1..n).filter(|&i| ctx.links.is_up(i)).collect();
            if let Some(first) = ifaces.pop_front() {
                d.attempt = Some(LockAttempt {
                    granted: Vec::new(),
                    awaiting: first,
                    remaining: ifaces,
                });
                ctx.send(
                    first,
                    control(MessageKind::LockRequest, ctx.local_addr, dest, 0),
                );
                return;
            }
        }
        // no live neighbor to lock: flip immediately
        self.complete_aeo(ctx, dest, Vec::new());
    }

    /// Every neighbor granted: build the next generation all-Out,
    /// propagate it, release the locks, then heartbeat downstream
    fn complete_aeo(&mut self, ctx: &mut RouterCtx<'_>, dest: Ipv4Addr, granted: Vec<IfaceIndex>) {
        let n = ctx.links.iface_count();
        self.aeo_count += 1;
        let Some(d) = self.dests.get_mut(&dest) else {
            return;
        };
        d.aeo_requested = false;
        d.attempt = None;
        d.held = true;

        let newv = ((d.local_vnode + 1) & 1) as usize;
        d.generations[newv] = GenerationState::new(n);
        for iface in 1..n {
            d.generations[newv].prioritized.push(PrioLink {
                priority: d.priorities[iface],
                iface,
            });
            d.generations[newv].directions[iface] = LinkDirection::Out;
            d.generations[newv].outputs.push(PrioLink {
                priority: d.priorities[iface],
                iface,
            });
            if ctx.links.is_up(iface) {
                ctx.send(
                    iface,
                    control(MessageKind::SetVnode, ctx.local_addr, dest, newv as u8),
                );
            }
        }
        d.local_vnode = newv as u8;
        info!(dest = %dest, vnode = newv, "all-edges-out reversal executed");

        for iface in granted {
            ctx.send(
                iface,
                control(MessageKind::LockRelease, ctx.local_addr, dest, 0),
            );
        }
        d.held = false;

        let hb = d.hb_seq;
        for iface in d.reverse_after.clone() {
            if ctx.links.is_up(iface) {
                ctx.send(
                    iface,
                    control(MessageKind::Heartbeat, ctx.local_addr, dest, 0).with_seq(hb),
                );
            }
        }
    }

    fn on_lock_request(
        &mut self,
        ctx: &mut RouterCtx<'_>,
        iif: IfaceIndex,
        dest: Ipv4Addr,
        originator: Ipv4Addr,
    ) {
        let n = ctx.links.iface_count();
        let local = ctx.local_addr;
        let d = self.entry(dest, n);
        if d.held {
            ctx.send(iif, control(MessageKind::LockDeny, local, dest, 0));
            return;
        }
        if d.attempt.is_some() {
            if originator < local {
                // the lower address wins the race; back off and retry later
                let attempt = d.attempt.take().expect("attempt present");
                debug!(dest = %dest, %originator, "yielding lock race to lower address");
                for g in attempt.granted {
                    ctx.send(g, control(MessageKind::LockRelease, local, dest, 0));
                }
                ctx.schedule(ctx.config.aeo_retry_delay, TimerEvent::AeoRetry { dest });
            } else {
                ctx.send(iif, control(MessageKind::LockDeny, local, dest, 0));
                return;
            }
        }
        let d = self.entry(dest, n);
        if !d.granted[iif] {
            d.granted[iif] = true;
            d.grant_count += 1;
        }
        ctx.send(iif, control(MessageKind::LockGrant, local, dest, 0));
    }

    fn on_lock_grant(&mut self, ctx: &mut RouterCtx<'_>, iif: IfaceIndex, dest: Ipv4Addr) {
        let mut finished: Option<Vec<IfaceIndex>> = None;
        {
            let Some(d) = self.dests.get_mut(&dest) else {
                return;
            };
            let next = {
                let Some(attempt) = d.attempt.as_mut() else {
                    trace!(dest = %dest, iif, "grant without an attempt, ignored");
                    return;
                };
                if attempt.awaiting != iif {
                    trace!(dest = %dest, iif, "grant from unexpected interface, ignored");
                    return;
                }
                attempt.granted.push(iif);
                attempt.remaining.pop_front()
            };
            match next {
                Some(next) => {
                    d.attempt.as_mut().expect("attempt present").awaiting = next;
                    ctx.send(
                        next,
                        control(MessageKind::LockRequest, ctx.local_addr, dest, 0),
                    );
                }
                None => {
                    finished = Some(d.attempt.take().expect("attempt present").granted);
                }
            }
        }
        if let Some(granted) = finished {
            self.complete_aeo(ctx, dest, granted);
        }
    }

    fn on_lock_deny(&mut self, ctx: &mut RouterCtx<'_>, _iif: IfaceIndex, dest: Ipv4Addr) {
        let Some(d) = self.dests.get_mut(&dest) else {
            return;
        };
        let Some(attempt) = d.attempt.take() else {
            return;
        };
        debug!(dest = %dest, "lock denied, releasing and deferring");
        for g in attempt.granted {
            ctx.send(g, control(MessageKind::LockRelease, ctx.local_addr, dest, 0));
        }
        ctx.schedule(ctx.config.aeo_retry_delay, TimerEvent::AeoRetry { dest });
    }

    fn on_lock_release(&mut self, ctx: &mut RouterCtx<'_>, iif: IfaceIndex, dest: Ipv4Addr) {
        let retry = {
            let Some(d) = self.dests.get_mut(&dest) else {
                return;
            };
            if d.granted[iif] {
                d.granted[iif] = false;
                d.grant_count -= 1;
            } else {
                debug!(dest = %dest, iif, "release for a lock not granted, ignored");
            }
            d.grant_count == 0 && d.aeo_requested
        };
        if retry {
            self.try_begin_aeo(ctx, dest);
        }
    }

    fn on_set_vnode(&mut self, ctx: &mut RouterCtx<'_>, iif: IfaceIndex, dest: Ipv4Addr, v: u8) {
        let n = ctx.links.iface_count();
        let d = self.entry(dest, n);
        if !d.granted[iif] {
            // the sender flips under our granted lock; tolerate but note
            debug!(dest = %dest, iif, "generation update without a held lock");
        }
        d.remote_vnode[iif] = v & 1;
        let cv = d.local_vnode as usize;
        if d.generations[cv].directions[iif] != LinkDirection::In {
            d.generations[cv].inputs.push_front(iif);
        }
        d.generations[cv].directions[iif] = LinkDirection::In;
        d.generations[cv].local_seq[iif] = 0;
        d.generations[cv].remote_seq[iif] = 0;
        trace!(dest = %dest, iif, vnode = v, "neighbor generation adopted, link now inbound");
    }

    fn on_heartbeat(&mut self, ctx: &mut RouterCtx<'_>, iif: IfaceIndex, dest: Ipv4Addr, seq: u16) {
        let n = ctx.links.iface_count();
        let fire = {
            let d = self.entry(dest, n);
            if seq != d.hb_seq {
                if seq > d.hb_seq {
                    d.hb_seq = seq;
                    d.hb_state.iter_mut().for_each(|s| *s = false);
                } else {
                    trace!(dest = %dest, iif, seq, "stale heartbeat discarded");
                    return;
                }
            }
            d.hb_state[iif] = true;
            if d.hb_state[LOOPBACK_IFACE] {
                trace!(dest = %dest, "already reversed for this round");
                false
            } else {
                let seen_previous = d.reverse_before.iter().all(|&i| d.hb_state[i]);
                if seen_previous {
                    d.hb_state[LOOPBACK_IFACE] = true;
                }
                seen_previous
            }
        };
        if fire {
            self.request_aeo(ctx, dest);
        }
    }
}

impl ReversalStrategy for LockingReversal {
    fn add_host_route(&mut self, ctx: &mut RouterCtx<'_>, dest: Ipv4Addr, iface: IfaceIndex) {
        let d = self.entry(dest, ctx.links.iface_count());
        let cv = d.local_vnode as usize;
        let prio = d.priorities[iface];
        d.generations[cv].directions[iface] = LinkDirection::Out;
        d.generations[cv].outputs.push(PrioLink {
            priority: prio,
            iface,
        });
        debug!(dest = %dest, iface, "host route installed as output");
    }

    fn set_distance(&mut self, ctx: &mut RouterCtx<'_>, dest: Ipv4Addr, metric: u32) {
        self.entry(dest, ctx.links.iface_count()).distance = Some(metric);
    }

    fn distance(&self, dest: Ipv4Addr) -> Option<u32> {
        self.dests.get(&dest).and_then(|d| d.distance)
    }

    fn known_destinations(&self) -> Vec<Ipv4Addr> {
        self.dests.keys().copied().collect()
    }

    fn classify(
        &mut self,
        ctx: &mut RouterCtx<'_>,
        input: &ClassifyInput,
    ) -> Result<(), RouteError> {
        let n = ctx.links.iface_count();
        let own: BTreeMap<Ipv4Addr, u32> = self
            .dests
            .iter()
            .filter_map(|(addr, d)| d.distance.map(|m| (*addr, m)))
            .collect();

        for (dest, iface, direction) in classifier::classify(ctx.node, &own, input) {
            let d = self.entry(dest, n);
            let cv = d.local_vnode as usize;
            if d.generations[cv].directions[iface] != LinkDirection::Unknown {
                continue;
            }
            let prio = d.priorities[iface];
            match direction {
                InitialDirection::Input => {
                    d.generations[cv].directions[iface] = LinkDirection::In;
                    d.generations[cv].inputs.push_back(iface);
                }
                InitialDirection::Output => {
                    d.generations[cv].directions[iface] = LinkDirection::Out;
                    d.generations[cv].outputs.push(PrioLink {
                        priority: prio,
                        iface,
                    });
                }
            }
        }

        for (iface, neighbor) in input.neighbors.iter().enumerate() {
            if iface == LOOPBACK_IFACE {
                continue;
            }
            let Some(neighbor) = neighbor else { continue };
            for dest in own.keys() {
                if !neighbor.distances.contains_key(dest) {
                    continue;
                }
                let d = self.dests.get(dest).expect("classified destination");
                let cv = d.local_vnode as usize;
                if d.generations[cv].directions[iface] == LinkDirection::Unknown {
                    return Err(RouteError::Unclassified { dest: *dest, iface });
                }
            }
        }

        // seed the last-resort pool
        for d in self.dests.values_mut() {
            let cv = d.local_vnode as usize;
            if d.generations[cv].prioritized.is_empty() {
                for iface in 1..n {
                    d.generations[cv].prioritized.push(PrioLink {
                        priority: d.priorities[iface],
                        iface,
                    });
                }
            }
        }
        Ok(())
    }

    fn set_interface_priority(
        &mut self,
        ctx: &mut RouterCtx<'_>,
        dest: Ipv4Addr,
        iface: IfaceIndex,
        priority: u32,
    ) {
        let d = self.entry(dest, ctx.links.iface_count());
        if iface < d.priorities.len() {
            d.priorities[iface] = priority;
            let cv = d.local_vnode as usize;
            d.generations[cv].prioritized.push(PrioLink { priority, iface });
        }
    }

    fn set_reversal_order(
        &mut self,
        ctx: &mut RouterCtx<'_>,
        dest: Ipv4Addr,
        before: Vec<IfaceIndex>,
        after: Vec<IfaceIndex>,
    ) {
        let d = self.entry(dest, ctx.links.iface_count());
        d.reverse_before = before;
        d.reverse_after = after;
    }

    fn send_initial_heartbeat(&mut self, ctx: &mut RouterCtx<'_>, dest: Ipv4Addr) {
        let n = ctx.links.iface_count();
        {
            let d = self.entry(dest, n);
            debug_assert!(
                d.reverse_before.is_empty(),
                "initial heartbeat must start the cascade"
            );
            d.hb_seq += 1;
            d.hb_state.iter_mut().for_each(|s| *s = false);
            d.hb_state[LOOPBACK_IFACE] = true;
        }
        self.request_aeo(ctx, dest);
    }

    fn route_output(&mut self, ctx: &mut RouterCtx<'_>, dest: Ipv4Addr) -> RouteDecision {
        let Some(d) = self.dests.get_mut(&dest) else {
            trace!(dest = %dest, "no state for destination");
            return RouteDecision::NoRoute;
        };
        let v = d.local_vnode as usize;
        standard_receive(d, v, dest, ctx, None, &mut self.reversals)
    }

    fn route_input(
        &mut self,
        ctx: &mut RouterCtx<'_>,
        packet: &DataPacket,
        iif: IfaceIndex,
    ) -> RouteDecision {
        let dest = packet.destination;
        let n = ctx.links.iface_count();
        if iif >= n || iif == LOOPBACK_IFACE {
            warn!(dest = %dest, iif, "packet from an impossible ingress");
            return RouteDecision::NoRoute;
        }
        let reversals = &mut self.reversals;
        let d = self
            .dests
            .entry(dest)
            .or_insert_with(|| AeoDestination::new(n));
        let v = (packet.vnode & 1) as usize;

        match d.generations[v].directions[iif] {
            LinkDirection::In => {
                if packet.seq_bit != d.generations[v].remote_seq[iif] {
                    trace!(
                        dest = %dest,
                        iif,
                        "sequence bit disagreement on inbound link"
                    );
                }
                standard_receive(d, v, dest, ctx, Some(iif), reversals)
            }
            LinkDirection::Out => {
                if packet.seq_bit == d.generations[v].remote_seq[iif] {
                    if ctx.links.is_up(iif) {
                        // the neighbor still considers the link theirs to
                        // send on; hand the packet back along it
                        trace!(dest = %dest, iif, "output-side receipt, returning along link");
                        return RouteDecision::Forward {
                            iface: iif,
                            seq: d.generations[v].local_seq[iif],
                            vnode: d.remote_vnode[iif],
                        };
                    }
                    standard_receive(d, v, dest, ctx, Some(iif), reversals)
                } else {
                    let delay = ctx.config.reverse_output_to_input_delay;
                    if delay == 0 {
                        reverse_out_to_in(d, v, dest, iif, reversals);
                    } else {
                        ctx.schedule(
                            delay,
                            TimerEvent::DelayedReversal {
                                dest,
                                iface: iif,
                                kind: ReversalKind::OutputToInput,
                            },
                        );
                    }
                    standard_receive(d, v, dest, ctx, Some(iif), reversals)
                }
            }
            LinkDirection::Unknown | LinkDirection::Dead => {
                d.generations[v].directions[iif] = LinkDirection::In;
                d.generations[v].remote_seq[iif] = packet.seq_bit & 1;
                if !d.generations[v].inputs.contains(&iif) {
                    d.generations[v].inputs.push_front(iif);
                }
                trace!(dest = %dest, iif, "uncategorized ingress adopted as inbound");
                standard_receive(d, v, dest, ctx, Some(iif), reversals)
            }
        }
    }

    fn link_down(&mut self, _ctx: &mut RouterCtx<'_>, iface: IfaceIndex) {
        for (addr, d) in self.dests.iter_mut() {
            for state in d.generations.iter_mut() {
                if state.directions[iface] != LinkDirection::Unknown
                    && state.directions[iface] != LinkDirection::Dead
                {
                    state.directions[iface] = LinkDirection::Dead;
                    remove_value(&mut state.inputs, iface);
                    remove_value(&mut state.to_reverse, iface);
                    debug!(dest = %addr, iface, "link dead");
                }
            }
        }
    }

    fn link_up(&mut self, _ctx: &mut RouterCtx<'_>, iface: IfaceIndex) {
        // a recovered link rejoins as an unclassified input; first receipt
        // or the next AEO settles its direction
        for d in self.dests.values_mut() {
            let cv = d.local_vnode as usize;
            let state = &mut d.generations[cv];
            state.directions[iface] = LinkDirection::Unknown;
            state.local_seq[iface] = 0;
            state.remote_seq[iface] = 0;
            if !state.inputs.contains(&iface) {
                state.inputs.push_back(iface);
            }
            if !state.to_reverse.contains(&iface) {
                state.to_reverse.push_back(iface);
            }
        }
    }

    fn handle_control(&mut self, ctx: &mut RouterCtx<'_>, iif: IfaceIndex, msg: &MessageHeader) {
        let Some(dest) = msg.subject() else {
            debug!(iif, kind = ?msg.kind, "control message without a subject, dropped");
            return;
        };
        match msg.kind {
            MessageKind::LockRequest => self.on_lock_request(ctx, iif, dest, msg.originator),
            MessageKind::LockGrant => self.on_lock_grant(ctx, iif, dest),
            MessageKind::LockDeny => self.on_lock_deny(ctx, iif, dest),
            MessageKind::LockRelease => self.on_lock_release(ctx, iif, dest),
            MessageKind::SetVnode => {
                let v = msg.subject_metric().unwrap_or(0);
                self.on_set_vnode(ctx, iif, dest, v);
            }
            MessageKind::Heartbeat => self.on_heartbeat(ctx, iif, dest, msg.seq),
            MessageKind::MetricRequest | MessageKind::MetricResponse => {
                debug!(iif, "metric exchange handled by the heartbeat subsystem");
            }
        }
    }

    fn apply_delayed_reversal(
        &mut self,
        _ctx: &mut RouterCtx<'_>,
        dest: Ipv4Addr,
        iface: IfaceIndex,
        kind: ReversalKind,
    ) {
        let Some(d) = self.dests.get_mut(&dest) else {
            return;
        };
        let v = d.local_vnode as usize;
        match kind {
            ReversalKind::InputToOutput => {
                reverse_in_to_out(d, v, dest, iface, &mut self.reversals)
            }
            ReversalKind::OutputToInput => {
                reverse_out_to_in(d, v, dest, iface, &mut self.reversals)
            }
        }
    }

    fn handle_aeo_retry(&mut self, ctx: &mut RouterCtx<'_>, dest: Ipv4Addr) {
        let wanted = self
            .dests
            .get(&dest)
            .map(|d| d.aeo_requested)
            .unwrap_or(false);
        if wanted {
            self.try_begin_aeo(ctx, dest);
        }
    }

    fn has_live_output(&self, links: &dyn LinkState, dest: Ipv4Addr) -> bool {
        let Some(d) = self.dests.get(&dest) else {
            return false;
        };
        let cv = d.local_vnode as usize;
        d.generations[cv].outputs.iter().any(|p| {
            d.generations[cv].directions[p.iface] == LinkDirection::Out && links.is_up(p.iface)
        })
    }

    fn reintegrate(
        &mut self,
        ctx: &mut RouterCtx<'_>,
        dest: Ipv4Addr,
        iface: IfaceIndex,
        direction: InitialDirection,
        new_distance: Option<u32>,
    ) {
        let d = self.entry(dest, ctx.links.iface_count());
        let cv = d.local_vnode as usize;
        if !matches!(
            d.generations[cv].directions[iface],
            LinkDirection::Unknown | LinkDirection::Dead
        ) {
            return;
        }
        let prio = d.priorities[iface];
        d.generations[cv].local_seq[iface] = 0;
        d.generations[cv].remote_seq[iface] = 0;
        remove_value(&mut d.generations[cv].inputs, iface);
        match direction {
            InitialDirection::Output => {
                d.generations[cv].directions[iface] = LinkDirection::Out;
                d.generations[cv].outputs.push(PrioLink {
                    priority: prio,
                    iface,
                });
            }
            InitialDirection::Input => {
                d.generations[cv].directions[iface] = LinkDirection::In;
                d.generations[cv].inputs.push_back(iface);
            }
        }
        if let Some(metric) = new_distance {
            d.distance = Some(metric);
        }
        debug!(dest = %dest, iface, ?direction, "interface reintegrated");
    }

    fn check_partition(&self, dest: Ipv4Addr) -> bool {
        let Some(d) = self.dests.get(&dest) else {
            return true;
        };
        let cv = d.local_vnode as usize;
        let state = &d.generations[cv];
        for iface in 1..state.directions.len() {
            let in_count = state.inputs.iter().filter(|&&i| i == iface).count();
            match state.directions[iface] {
                LinkDirection::In => {
                    if in_count != 1 {
                        return false;
                    }
                }
                LinkDirection::Out => {
                    if in_count != 0 || !state.outputs.iter().any(|p| p.iface == iface) {
                        return false;
                    }
                }
                LinkDirection::Unknown | LinkDirection::Dead => {
                    // an unknown link may sit in the input pool awaiting
                    // adoption; it must not be counted twice
                    if in_count > 1 {
                        return false;
                    }
                }
            }
        }
        true
    }

    fn sequence_bits(&self, dest: Ipv4Addr, iface: IfaceIndex) -> Option<(u8, u8)> {
        let d = self.dests.get(&dest)?;
        let cv = d.local_vnode as usize;
        if iface >= d.generations[cv].local_seq.len() {
            return None;
        }
        Some((
            d.generations[cv].local_seq[iface],
            d.generations[cv].remote_seq[iface],
        ))
    }

    fn reversal_count(&self) -> u64 {
        self.reversals + self.aeo_count
    }

    fn describe(&self, dest: Ipv4Addr) -> String {
        let Some(d) = self.dests.get(&dest) else {
            return format!("{}: unknown", dest);
        };
        let cv = d.local_vnode as usize;
        let state = &d.generations[cv];
        let mut out = format!(
            "{} dist={} vnode={}",
            dest,
            d.distance.map(|m| m.to_string()).unwrap_or_else(|| "?".into()),
            cv
        );
        for iface in 1..state.directions.len() {
            let _ = write!(
                out,
                " {}:{}({}/{})",
                iface,
                state.directions[iface].shorthand(),
                state.local_seq[iface],
                state.remote_seq[iface]
            );
        }
        out
    }
}
