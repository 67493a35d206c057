//! Asynchronous single-link reversal
//!
//! The lock-free strategy: when the Output list for a destination runs
//! dry, inputs are flipped to outputs one round at a time through the
//! good-to-reverse work list, each flip toggling that link's local
//! sequence bit. The far side observes the toggled bit on the next packet
//! and performs the converse flip, so exactly one reversal per link can
//! be in flight and no cross-node lock is needed.
//!
//! The direction state machine carries the slower bounce-driven handshake
//! (`ReverseInput -> ReverseInputPrimed -> NewInput` against the
//! neighbor's `ReverseOutput`) for traffic that is sent back without a
//! completed flip.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::Ipv4Addr;

use ddc_core::{DataPacket, IfaceIndex, LOOPBACK_IFACE, LinkState};
use ddc_wire::MessageHeader;
use tracing::{debug, trace, warn};

use crate::classifier::{self, ClassifyInput, InitialDirection};
use crate::destination::{Destination, DestinationTable};
use crate::direction::{Action, DirectionState};
use crate::error::RouteError;
use crate::strategy::{
    ReversalKind, ReversalStrategy, RouteDecision, RouterCtx, TimerEvent,
};

/// The sequence-bit reversal engine
#[derive(Debug, Default)]
pub struct SequenceReversal {
    table: DestinationTable,
    reversals: u64,
}

impl SequenceReversal {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Walk the output list front to back, killing entries whose link has
/// failed, and return the first usable interface. The ingress interface
/// is only returned when nothing else is available.
fn pick_output(
    d: &mut Destination,
    dest: Ipv4Addr,
    ctx: &mut RouterCtx<'_>,
    avoid: Option<IfaceIndex>,
) -> Option<IfaceIndex> {
    let snapshot: Vec<IfaceIndex> = d.output.iter().copied().collect();
    let mut fallback = None;
    for iface in snapshot {
        if !ctx.links.is_up(iface) {
            d.advance(dest, iface, Action::DetectFailure, ctx.dead);
            continue;
        }
        if avoid == Some(iface) {
            fallback.get_or_insert(iface);
            continue;
        }
        return Some(iface);
    }
    fallback
}

/// Try every output, reversing inputs round by round when none is left.
///
/// Bounded: each round either consumes the good-to-reverse list (which
/// refills only from a shrinking input list) or promotes the
/// reverse-output pool exactly once, so the loop terminates within the
/// interface count.
fn route_toward(
    d: &mut Destination,
    dest: Ipv4Addr,
    ctx: &mut RouterCtx<'_>,
    avoid: Option<IfaceIndex>,
    reversals: &mut u64,
) -> RouteDecision {
    let rounds = d.iface_count() + 2;
    for _ in 0..rounds {
        if let Some(iface) = pick_output(d, dest, ctx, avoid) {
            return RouteDecision::Forward {
                iface,
                seq: d.local_seq[iface],
                vnode: 0,
            };
        }
        if !ctx.config.allow_reversal {
            trace!(dest = %dest, "reversal disabled, giving up");
            break;
        }
        if d.good_to_reverse.is_empty() {
            d.good_to_reverse = d.input.iter().copied().collect();
        }
        if d.good_to_reverse.is_empty() {
            if d.reverse_output.is_empty() {
                break;
            }
            let promoted = d.promote_reverse_outputs();
            debug!(dest = %dest, promoted, "promoted reverse-outputs to outputs");
            continue;
        }
        let delay = ctx.config.reverse_input_to_output_delay;
        while let Some(iface) = d.good_to_reverse.pop_front() {
            if delay == 0 {
                if d.flip_input_to_output(iface) {
                    *reversals += 1;
                    debug!(
                        dest = %dest,
                        iface,
                        seq = d.local_seq[iface],
                        "reversed input to output"
                    );
                }
            } else {
                ctx.schedule(
                    delay,
                    TimerEvent::DelayedReversal {
                        dest,
                        iface,
                        kind: ReversalKind::InputToOutput,
                    },
                );
            }
        }
        if delay != 0 {
            // flips land later; nothing more to try in this call
            break;
        }
    }
    RouteDecision::NoRoute
}

impl ReversalStrategy for SequenceReversal {
    fn add_host_route(&mut self, ctx: &mut RouterCtx<'_>, dest: Ipv4Addr, iface: IfaceIndex) {
        let d = self.table.entry(dest, ctx.links.iface_count());
        d.set_output(iface);
        debug!(dest = %dest, iface, "host route installed as output");
    }

    fn set_distance(&mut self, ctx: &mut RouterCtx<'_>, dest: Ipv4Addr, metric: u32) {
        self.table.entry(dest, ctx.links.iface_count()).distance = Some(metric);
    }

    fn distance(&self, dest: Ipv4Addr) -> Option<u32> {
        self.table.get(dest).and_then(|d| d.distance)
    }

    fn known_destinations(&self) -> Vec<Ipv4Addr> {
        self.table.addresses()
    }

    fn classify(
        &mut self,
        ctx: &mut RouterCtx<'_>,
        input: &ClassifyInput,
    ) -> Result<(), RouteError> {
        let n = ctx.links.iface_count();
        let own: BTreeMap<Ipv4Addr, u32> = self
            .table
            .iter()
            .filter_map(|(addr, d)| d.distance.map(|m| (*addr, m)))
            .collect();

        for (dest, iface, direction) in classifier::classify(ctx.node, &own, input) {
            let d = self.table.entry(dest, n);
            match direction {
                InitialDirection::Input => d.set_input(iface),
                InitialDirection::Output => d.set_output(iface),
            }
        }

        // post-condition: everything a metric-bearing neighbor sits behind
        // is classified exactly once
        for (iface, neighbor) in input.neighbors.iter().enumerate() {
            if iface == LOOPBACK_IFACE {
                continue;
            }
            let Some(neighbor) = neighbor else { continue };
            for dest in own.keys() {
                if !neighbor.distances.contains_key(dest) {
                    continue;
                }
                let d = self.table.get(*dest).expect("classified destination");
                if d.state(iface) == DirectionState::None {
                    return Err(RouteError::Unclassified { dest: *dest, iface });
                }
                debug_assert!(d.check_partition());
            }
        }

        for (_, d) in self.table.iter_mut() {
            d.sort_outputs();
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
        let d = self.table.entry(dest, ctx.links.iface_count());
        if iface < d.priorities.len() {
            d.priorities[iface] = priority;
            d.sort_outputs();
        }
    }

    fn set_reversal_order(
        &mut self,
        _ctx: &mut RouterCtx<'_>,
        dest: Ipv4Addr,
        _before: Vec<IfaceIndex>,
        _after: Vec<IfaceIndex>,
    ) {
        trace!(dest = %dest, "reversal order is a locking-strategy concern, ignored");
    }

    fn send_initial_heartbeat(&mut self, _ctx: &mut RouterCtx<'_>, dest: Ipv4Addr) {
        trace!(dest = %dest, "initial heartbeat is a locking-strategy concern, ignored");
    }

    fn route_output(&mut self, ctx: &mut RouterCtx<'_>, dest: Ipv4Addr) -> RouteDecision {
        let Some(d) = self.table.get_mut(dest) else {
            trace!(dest = %dest, "no state for destination");
            return RouteDecision::NoRoute;
        };
        route_toward(d, dest, ctx, None, &mut self.reversals)
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
        let d = self.table.entry(dest, n);

        match d.state(iif) {
            DirectionState::None => {
                // uncategorized receipt: adopt as input and trust its bit
                d.adopt_input(iif, packet.seq_bit);
                trace!(dest = %dest, iif, "adopted uncategorized ingress as input");
            }
            DirectionState::Output => {
                if packet.seq_bit == d.remote_seq[iif] {
                    // the neighbor is still sending toward us on a link we
                    // consider outbound; transient, forward it back along
                    d.advance(dest, iif, Action::Receive, ctx.dead);
                    if ctx.links.is_up(iif) {
                        trace!(dest = %dest, iif, "output-side receipt, returning along link");
                        return RouteDecision::Forward {
                            iface: iif,
                            seq: d.local_seq[iif],
                            vnode: 0,
                        };
                    }
                    d.advance(dest, iif, Action::DetectFailure, ctx.dead);
                }
                // mismatched bit: the far side completed a reversal
                else if ctx.config.reverse_output_to_input_delay == 0 {
                    if d.flip_output_to_input(iif) {
                        self.reversals += 1;
                        debug!(
                            dest = %dest,
                            iif,
                            seq = d.remote_seq[iif],
                            "reversed output to input on sequence mismatch"
                        );
                    }
                } else {
                    ctx.schedule(
                        ctx.config.reverse_output_to_input_delay,
                        TimerEvent::DelayedReversal {
                            dest,
                            iface: iif,
                            kind: ReversalKind::OutputToInput,
                        },
                    );
                }
            }
            _ => {
                d.advance(dest, iif, Action::Receive, ctx.dead);
                if matches!(
                    d.state(iif),
                    DirectionState::Input | DirectionState::NewInput
                ) && packet.seq_bit != d.remote_seq[iif]
                {
                    trace!(
                        dest = %dest,
                        iif,
                        "sequence bit mismatch during in-flight handshake"
                    );
                }
            }
        }

        let decision = route_toward(d, dest, ctx, Some(iif), &mut self.reversals);
        match decision {
            RouteDecision::Forward { .. } => {
                d.advance(dest, iif, Action::Send, ctx.dead);
                decision
            }
            RouteDecision::NoRoute => {
                // nothing can carry the packet: start flipping the ingress
                // and hand it back toward the previous hop
                d.advance(dest, iif, Action::NoPath, ctx.dead);
                if ctx.links.is_up(iif) {
                    debug!(dest = %dest, iif, "bouncing packet back out ingress");
                    RouteDecision::Bounce {
                        iface: iif,
                        seq: d.local_seq[iif],
                        vnode: 0,
                    }
                } else {
                    if d.state(iif) != DirectionState::Dead {
                        d.advance(dest, iif, Action::DetectFailure, ctx.dead);
                    }
                    RouteDecision::NoRoute
                }
            }
            other => other,
        }
    }

    fn link_down(&mut self, ctx: &mut RouterCtx<'_>, iface: IfaceIndex) {
        for (addr, d) in self.table.iter_mut() {
            if !matches!(
                d.state(iface),
                DirectionState::None | DirectionState::Dead
            ) {
                d.advance(*addr, iface, Action::DetectFailure, ctx.dead);
            }
        }
    }

    fn link_up(&mut self, _ctx: &mut RouterCtx<'_>, iface: IfaceIndex) {
        // reintegration waits for the reanimation probe and metric exchange
        trace!(iface, "link up, awaiting reanimation probe");
    }

    fn handle_control(&mut self, _ctx: &mut RouterCtx<'_>, iif: IfaceIndex, msg: &MessageHeader) {
        debug!(iif, kind = ?msg.kind, "ignoring lock-protocol message in sequence strategy");
    }

    fn apply_delayed_reversal(
        &mut self,
        _ctx: &mut RouterCtx<'_>,
        dest: Ipv4Addr,
        iface: IfaceIndex,
        kind: ReversalKind,
    ) {
        let Some(d) = self.table.get_mut(dest) else {
            return;
        };
        let flipped = match kind {
            ReversalKind::InputToOutput => d.flip_input_to_output(iface),
            ReversalKind::OutputToInput => d.flip_output_to_input(iface),
        };
        if flipped {
            self.reversals += 1;
            debug!(dest = %dest, iface, ?kind, "delayed reversal applied");
        }
    }

    fn handle_aeo_retry(&mut self, _ctx: &mut RouterCtx<'_>, _dest: Ipv4Addr) {}

    fn has_live_output(&self, links: &dyn LinkState, dest: Ipv4Addr) -> bool {
        self.table
            .get(dest)
            .map(|d| d.output.iter().any(|&i| links.is_up(i)))
            .unwrap_or(false)
    }

    fn reintegrate(
        &mut self,
        ctx: &mut RouterCtx<'_>,
        dest: Ipv4Addr,
        iface: IfaceIndex,
        direction: InitialDirection,
        new_distance: Option<u32>,
    ) {
        let d = self.table.entry(dest, ctx.links.iface_count());
        d.revive(iface, direction == InitialDirection::Output);
        if let Some(metric) = new_distance {
            d.distance = Some(metric);
        }
        debug!(dest = %dest, iface, ?direction, "interface reintegrated");
    }

    fn check_partition(&self, dest: Ipv4Addr) -> bool {
        self.table.get(dest).map(|d| d.check_partition()).unwrap_or(true)
    }

    fn sequence_bits(&self, dest: Ipv4Addr, iface: IfaceIndex) -> Option<(u8, u8)> {
        let d = self.table.get(dest)?;
        if iface >= d.iface_count() {
            return None;
        }
        Some((d.local_seq[iface], d.remote_seq[iface]))
    }

    fn reversal_count(&self) -> u64 {
        self.reversals
    }

    fn describe(&self, dest: Ipv4Addr) -> String {
        let Some(d) = self.table.get(dest) else {
            return format!("{}: unknown", dest);
        };
        let mut out = format!(
            "{} dist={}",
            dest,
            d.distance.map(|m| m.to_string()).unwrap_or_else(|| "?".into())
        );
        for iface in 1..d.iface_count() {
            let _ = write!(
                out,
                " {}:{}({}/{})",
                iface,
                d.state(iface),
                d.local_seq[iface],
                d.remote_seq[iface]
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use ddc_core::{LinkFlag, NodeId, SharedLinks};

    use crate::config::RouterConfig;
    use crate::strategy::Effect;

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    /// A node with `n` point-to-point interfaces plus loopback
    fn links(n: usize) -> (SharedLinks, Vec<LinkFlag>) {
        let mut table = SharedLinks::new();
        let flags: Vec<LinkFlag> = (0..n).map(|_| LinkFlag::up()).collect();
        for f in &flags {
            table.attach(f.clone());
        }
        (table, flags)
    }

    struct Harness {
        links: SharedLinks,
        flags: Vec<LinkFlag>,
        config: RouterConfig,
        dead: BTreeSet<usize>,
        effects: Vec<Effect>,
    }

    impl Harness {
        fn new(n: usize) -> Self {
            let (links, flags) = links(n);
            Self {
                links,
                flags,
                config: RouterConfig::default(),
                dead: BTreeSet::new(),
                effects: Vec::new(),
            }
        }

        fn ctx(&mut self) -> RouterCtx<'_> {
            RouterCtx {
                node: NodeId(1),
                local_addr: addr(1),
                links: &self.links,
                config: &self.config,
                dead: &mut self.dead,
                effects: &mut self.effects,
            }
        }
    }

    fn packet(dest: Ipv4Addr, seq: u8) -> DataPacket {
        let mut p = DataPacket::new(addr(1), dest, vec![]);
        p.set_sequence_bit(seq);
        p
    }

    /// iface 1 Output, iface 2 Input toward `dest`
    fn classified(h: &mut Harness) -> SequenceReversal {
        let mut s = SequenceReversal::new();
        let dest = addr(9);
        let mut ctx = h.ctx();
        s.set_distance(&mut ctx, dest, 2);
        drop(ctx);
        let mut input = ClassifyInput::new(3);
        input.set_neighbor(
            1,
            crate::classifier::NeighborView {
                node: NodeId(2),
                distances: BTreeMap::from([(dest, 1)]),
            },
        );
        input.set_neighbor(
            2,
            crate::classifier::NeighborView {
                node: NodeId(3),
                distances: BTreeMap::from([(dest, 3)]),
            },
        );
        let mut ctx = h.ctx();
        s.classify(&mut ctx, &input).unwrap();
        s
    }

    #[test]
    fn test_route_output_prefers_output_list() {
        let mut h = Harness::new(2);
        let mut s = classified(&mut h);
        let mut ctx = h.ctx();
        let decision = s.route_output(&mut ctx, addr(9));
        assert_eq!(
            decision,
            RouteDecision::Forward {
                iface: 1,
                seq: 0,
                vnode: 0
            }
        );
    }

    #[test]
    fn test_reversal_when_output_fails() {
        let mut h = Harness::new(2);
        let mut s = classified(&mut h);
        h.flags[0].set_up(false); // kill iface 1

        let mut ctx = h.ctx();
        let decision = s.route_output(&mut ctx, addr(9));
        // the input on iface 2 was flipped, local bit toggled
        assert_eq!(
            decision,
            RouteDecision::Forward {
                iface: 2,
                seq: 1,
                vnode: 0
            }
        );
        assert_eq!(s.reversal_count(), 1);
        assert_eq!(s.sequence_bits(addr(9), 2), Some((1, 0)));
        assert!(s.check_partition(addr(9)));
        assert!(h.dead.contains(&1));
    }

    #[test]
    fn test_no_route_when_everything_dead() {
        let mut h = Harness::new(2);
        let mut s = classified(&mut h);
        h.flags[0].set_up(false);
        h.flags[1].set_up(false);

        let mut ctx = h.ctx();
        assert_eq!(s.route_output(&mut ctx, addr(9)), RouteDecision::NoRoute);
        assert!(s.check_partition(addr(9)));
    }

    #[test]
    fn test_reversal_disabled_reports_no_route() {
        let mut h = Harness::new(2);
        let mut s = classified(&mut h);
        h.config.allow_reversal = false;
        h.flags[0].set_up(false);

        let mut ctx = h.ctx();
        assert_eq!(s.route_output(&mut ctx, addr(9)), RouteDecision::NoRoute);
        assert_eq!(s.reversal_count(), 0);
    }

    #[test]
    fn test_mismatched_sequence_reverses_output() {
        let mut h = Harness::new(2);
        let mut s = classified(&mut h);

        // a packet arrives on the Output iface 1 with a toggled bit: the
        // neighbor reversed; our end flips, which empties the output list,
        // so the input pool (now both ifaces) reverses and the packet
        // leaves via iface 2
        let mut ctx = h.ctx();
        let decision = s.route_input(&mut ctx, &packet(addr(9), 1), 1);
        assert_eq!(
            decision,
            RouteDecision::Forward {
                iface: 2,
                seq: 1,
                vnode: 0
            }
        );
        // converse flip toggled the expected remote bit on iface 1, and
        // the fresh outbound flip toggled its local bit
        assert_eq!(s.sequence_bits(addr(9), 1), Some((1, 1)));
        assert_eq!(s.sequence_bits(addr(9), 2), Some((1, 0)));
        assert_eq!(s.reversal_count(), 3);
        assert!(s.check_partition(addr(9)));
    }

    #[test]
    fn test_mismatch_with_alternate_output_flips_once() {
        // like the diamond: a second live output exists, so the converse
        // flip is the only reversal and traffic shifts over
        let mut h = Harness::new(2);
        let mut s = SequenceReversal::new();
        let dest = addr(9);
        let mut ctx = h.ctx();
        s.set_distance(&mut ctx, dest, 2);
        drop(ctx);
        let mut input = ClassifyInput::new(3);
        for iface in 1..=2 {
            input.set_neighbor(
                iface,
                crate::classifier::NeighborView {
                    node: NodeId(10 + iface as u32),
                    distances: BTreeMap::from([(dest, 1)]),
                },
            );
        }
        let mut ctx = h.ctx();
        s.classify(&mut ctx, &input).unwrap();

        let mut ctx = h.ctx();
        let decision = s.route_input(&mut ctx, &packet(dest, 1), 1);
        assert_eq!(
            decision,
            RouteDecision::Forward {
                iface: 2,
                seq: 0,
                vnode: 0
            }
        );
        assert_eq!(s.reversal_count(), 1);
        assert_eq!(s.sequence_bits(dest, 1), Some((0, 1)));
        assert!(s.check_partition(dest));
    }

    #[test]
    fn test_matching_sequence_on_output_forwards_back() {
        let mut h = Harness::new(2);
        let mut s = classified(&mut h);

        // same link, matching bit: transient condition, send it along the
        // link we still consider outbound
        let mut ctx = h.ctx();
        let decision = s.route_input(&mut ctx, &packet(addr(9), 0), 1);
        assert_eq!(
            decision,
            RouteDecision::Forward {
                iface: 1,
                seq: 0,
                vnode: 0
            }
        );
        // first half of the neighbor-initiated handshake was recorded
        assert!(s.describe(addr(9)).contains("1:RO"));
        assert!(s.check_partition(addr(9)));
    }

    #[test]
    fn test_input_receipt_forwards_via_output() {
        let mut h = Harness::new(2);
        let mut s = classified(&mut h);
        let mut ctx = h.ctx();
        let decision = s.route_input(&mut ctx, &packet(addr(9), 0), 2);
        assert_eq!(
            decision,
            RouteDecision::Forward {
                iface: 1,
                seq: 0,
                vnode: 0
            }
        );
    }

    #[test]
    fn test_unknown_ingress_adopted_as_input() {
        let mut h = Harness::new(2);
        let mut s = SequenceReversal::new();
        // no classification at all; the packet still finds no path and
        // the ingress becomes a reversing input
        let mut ctx = h.ctx();
        let decision = s.route_input(&mut ctx, &packet(addr(9), 1), 2);
        // adopted input flips to output and carries the packet back
        assert_eq!(
            decision,
            RouteDecision::Forward {
                iface: 2,
                seq: 1,
                vnode: 0
            }
        );
    }

    #[test]
    fn test_bounce_when_reversal_disabled() {
        let mut h = Harness::new(2);
        let mut s = classified(&mut h);
        h.config.allow_reversal = false;
        h.flags[0].set_up(false); // no outputs left

        let mut ctx = h.ctx();
        let decision = s.route_input(&mut ctx, &packet(addr(9), 0), 2);
        assert_eq!(
            decision,
            RouteDecision::Bounce {
                iface: 2,
                seq: 0,
                vnode: 0
            }
        );
        // the bounced ingress started the state-machine handshake
        assert!(s.check_partition(addr(9)));
    }

    #[test]
    fn test_no_double_reversal_without_handshake() {
        let mut h = Harness::new(2);
        let mut s = classified(&mut h);
        h.flags[0].set_up(false);

        // first reversal flips iface 2 and toggles its bit once
        let mut ctx = h.ctx();
        let _ = s.route_output(&mut ctx, addr(9));
        assert_eq!(s.sequence_bits(addr(9), 2), Some((1, 0)));

        // routing again must reuse the already reversed output, not
        // toggle the bit a second time
        let mut ctx = h.ctx();
        let decision = s.route_output(&mut ctx, addr(9));
        assert_eq!(
            decision,
            RouteDecision::Forward {
                iface: 2,
                seq: 1,
                vnode: 0
            }
        );
        assert_eq!(s.sequence_bits(addr(9), 2), Some((1, 0)));
        assert_eq!(s.reversal_count(), 1);
    }

    #[test]
    fn test_reversal_terminates_within_interface_budget() {
        let mut h = Harness::new(4);
        let mut s = SequenceReversal::new();
        let dest = addr(9);
        let mut ctx = h.ctx();
        s.set_distance(&mut ctx, dest, 1);
        drop(ctx);
        let mut input = ClassifyInput::new(5);
        for iface in 1..=4 {
            input.set_neighbor(
                iface,
                crate::classifier::NeighborView {
                    node: NodeId(10 + iface as u32),
                    distances: BTreeMap::from([(dest, 2)]),
                },
            );
        }
        let mut ctx = h.ctx();
        s.classify(&mut ctx, &input).unwrap();

        // all four are inputs; one round of reversal must produce a
        // usable output, within the interface budget
        let mut ctx = h.ctx();
        let decision = s.route_output(&mut ctx, dest);
        assert!(matches!(decision, RouteDecision::Forward { .. }));
        assert!(s.reversal_count() <= 4);
        assert!(s.check_partition(dest));
    }

    #[test]
    fn test_delayed_reversal_is_scheduled_not_applied() {
        let mut h = Harness::new(2);
        let mut s = classified(&mut h);
        h.config.reverse_input_to_output_delay = 3;
        h.flags[0].set_up(false);

        let mut ctx = h.ctx();
        let decision = s.route_output(&mut ctx, addr(9));
        assert_eq!(decision, RouteDecision::NoRoute);
        assert_eq!(s.reversal_count(), 0);
        assert!(h.effects.iter().any(|e| matches!(
            e,
            Effect::Schedule {
                delay: 3,
                event: TimerEvent::DelayedReversal {
                    kind: ReversalKind::InputToOutput,
                    ..
                }
            }
        )));

        // the timer lands and the flip is applied
        let mut ctx = h.ctx();
        s.apply_delayed_reversal(&mut ctx, addr(9), 2, ReversalKind::InputToOutput);
        assert_eq!(s.reversal_count(), 1);
        assert_eq!(s.sequence_bits(addr(9), 2), Some((1, 0)));
    }

    #[test]
    fn test_link_down_kills_all_destinations() {
        let mut h = Harness::new(2);
        let mut s = classified(&mut h);
        let mut ctx = h.ctx();
        s.link_down(&mut ctx, 1);
        assert!(h.dead.contains(&1));
        assert!(!s.has_live_output(&h.links, addr(9)));
        assert!(s.check_partition(addr(9)));
    }

    #[test]
    fn test_reintegrate_after_death() {
        let mut h = Harness::new(2);
        let mut s = classified(&mut h);
        let mut ctx = h.ctx();
        s.link_down(&mut ctx, 1);
        let mut ctx = h.ctx();
        s.reintegrate(&mut ctx, addr(9), 1, InitialDirection::Output, Some(2));
        assert!(s.has_live_output(&h.links, addr(9)));
        assert_eq!(s.distance(addr(9)), Some(2));
        assert_eq!(s.sequence_bits(addr(9), 1), Some((0, 0)));
        assert!(s.check_partition(addr(9)));
    }
}
