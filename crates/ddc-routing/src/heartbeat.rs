//! Reanimation probing and metric exchange
//!
//! A periodic timer inspects interfaces that died for any destination.
//! When the physical link behind one reports up again, a metric request
//! goes out on it, carrying this node's own metric list so both ends
//! settle the revived link's direction from the same information. The
//! response (or the request itself, on the passive side) decides, per
//! destination, whether the reanimated interface comes back as Output or
//! Input.
//!
//! The timer is idempotent and self-cancelling: it reschedules only while
//! dead interfaces remain.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use ddc_core::IfaceIndex;
use ddc_wire::{METRIC_UNREACHABLE, MessageHeader, MessageKind, MetricEntry};
use tracing::{debug, trace};

use crate::classifier::InitialDirection;
use crate::strategy::{ReversalStrategy, RouterCtx, TimerEvent};

/// State of the reanimation subsystem on one node
#[derive(Debug, Default)]
pub struct HeartbeatEngine {
    /// A reanimation probe timer is outstanding
    pub probe_scheduled: bool,
    /// Probed interfaces awaiting a metric response
    pending: BTreeSet<IfaceIndex>,
    /// Last metric-message sequence accepted per originator
    last_seq: BTreeMap<Ipv4Addr, u16>,
    /// Our own outgoing metric-message sequence
    seq: u16,
}

impl HeartbeatEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&mut self) -> u16 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    /// Heartbeat and metric messages not newer than the last seen from
    /// the same originator are silently discarded
    fn is_stale(&mut self, msg: &MessageHeader) -> bool {
        match self.last_seq.get(&msg.originator) {
            Some(&last) if msg.seq <= last => {
                trace!(originator = %msg.originator, seq = msg.seq, "stale metric message discarded");
                true
            }
            _ => {
                self.last_seq.insert(msg.originator, msg.seq);
                false
            }
        }
    }

    /// Build this node's metric list: own addresses at distance zero,
    /// then every known destination with its distance, or the
    /// unreachable marker when no live output remains
    fn metric_list(
        strategy: &dyn ReversalStrategy,
        ctx: &RouterCtx<'_>,
        local_addrs: &[Ipv4Addr],
    ) -> Vec<MetricEntry> {
        let mut entries: Vec<MetricEntry> = local_addrs
            .iter()
            .map(|&a| MetricEntry::new(a, 0))
            .collect();
        for dest in strategy.known_destinations() {
            if local_addrs.contains(&dest) {
                continue;
            }
            let metric = if strategy.has_live_output(ctx.links, dest) {
                strategy
                    .distance(dest)
                    .map(|m| m.min(METRIC_UNREACHABLE as u32 - 1) as u8)
                    .unwrap_or(METRIC_UNREACHABLE)
            } else {
                METRIC_UNREACHABLE
            };
            entries.push(MetricEntry::new(dest, metric));
        }
        entries
    }

    /// The reanimation timer fired: probe every dead interface whose
    /// link is back, then reschedule while any remain dead
    pub fn on_probe_timer(
        &mut self,
        strategy: &mut dyn ReversalStrategy,
        ctx: &mut RouterCtx<'_>,
        local_addrs: &[Ipv4Addr],
    ) {
        self.probe_scheduled = false;
        let candidates: Vec<IfaceIndex> = ctx.dead.iter().copied().collect();
        for iface in candidates {
            if !ctx.links.is_up(iface) {
                continue;
            }
            let seq = self.next_seq();
            let mut msg = MessageHeader::new(MessageKind::MetricRequest, ctx.local_addr)
                .with_seq(seq);
            msg.metrics = Self::metric_list(strategy, ctx, local_addrs);
            ctx.send(iface, msg);
            ctx.dead.remove(&iface);
            self.pending.insert(iface);
            debug!(iface, "probing reanimated interface");
        }
        if !ctx.dead.is_empty() {
            ctx.schedule(
                ctx.config.reanimation_interval,
                TimerEvent::ReanimationProbe,
            );
            self.probe_scheduled = true;
        }
    }

    /// A metric request arrived: absorb the embedded metrics (both sides
    /// settle the link direction from the same exchange), then reply
    pub fn on_metric_request(
        &mut self,
        strategy: &mut dyn ReversalStrategy,
        ctx: &mut RouterCtx<'_>,
        local_addrs: &[Ipv4Addr],
        iif: IfaceIndex,
        msg: &MessageHeader,
    ) {
        if self.is_stale(msg) {
            return;
        }
        // control traffic on the link proves it alive again
        ctx.dead.remove(&iif);
        self.apply_metrics(strategy, ctx, local_addrs, iif, msg);

        let seq = self.next_seq();
        let mut reply =
            MessageHeader::new(MessageKind::MetricResponse, ctx.local_addr).with_seq(seq);
        reply.metrics = Self::metric_list(strategy, ctx, local_addrs);
        ctx.send(iif, reply);
    }

    /// A metric response arrived for an interface we probed
    pub fn on_metric_response(
        &mut self,
        strategy: &mut dyn ReversalStrategy,
        ctx: &mut RouterCtx<'_>,
        local_addrs: &[Ipv4Addr],
        iif: IfaceIndex,
        msg: &MessageHeader,
    ) {
        if self.is_stale(msg) {
            return;
        }
        self.pending.remove(&iif);
        self.apply_metrics(strategy, ctx, local_addrs, iif, msg);
    }

    /// Reintegration rules, per destination in the message:
    /// no live output left => adopt the link as Output unconditionally
    /// and take advertised + 1 as our distance; otherwise the strictly
    /// closer side sends (Output), the strictly farther receives (Input),
    /// and equality falls back to address order against the originator
    fn apply_metrics(
        &mut self,
        strategy: &mut dyn ReversalStrategy,
        ctx: &mut RouterCtx<'_>,
        local_addrs: &[Ipv4Addr],
        iif: IfaceIndex,
        msg: &MessageHeader,
    ) {
        for entry in &msg.metrics {
            if local_addrs.contains(&entry.address) {
                continue;
            }
            if entry.metric == METRIC_UNREACHABLE {
                trace!(dest = %entry.address, iif, "neighbor has no path, leaving link alone");
                continue;
            }
            let advertised = entry.metric as u32;
            let ours = strategy.distance(entry.address);
            let no_output = !strategy.has_live_output(ctx.links, entry.address);

            let (direction, new_distance) = if ours.is_none() || no_output {
                (InitialDirection::Output, Some(advertised + 1))
            } else {
                let ours = ours.expect("distance known");
                if advertised < ours {
                    (InitialDirection::Output, None)
                } else if advertised > ours {
                    (InitialDirection::Input, None)
                } else if ctx.local_addr < msg.originator {
                    // same tie-break convention as the classifier:
                    // the lower identity takes the Input end
                    (InitialDirection::Input, None)
                } else {
                    (InitialDirection::Output, None)
                }
            };
            strategy.reintegrate(ctx, entry.address, iif, direction, new_distance);
        }
    }
}
