//! The per-node router facade
//!
//! [`DdcRouter`] owns one reversal strategy and the heartbeat engine and
//! is the only surface the host stack talks to: the forwarding entry
//! points, the setup calls made before traffic flows, link notifications
//! and the control/timer dispatch. Every call returns the side effects
//! (control sends, timer requests) for the driver to execute; the router
//! itself never blocks and never reaches into another node.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use ddc_core::{DataPacket, IfaceIndex, LinkState, NodeId};
use ddc_wire::{MessageHeader, MessageKind};
use tracing::{debug, trace};

use crate::classifier::ClassifyInput;
use crate::config::{RouterConfig, StrategyKind};
use crate::error::RouteError;
use crate::heartbeat::HeartbeatEngine;
use crate::locking::LockingReversal;
use crate::sequence::SequenceReversal;
use crate::strategy::{Effect, ReversalStrategy, RouteDecision, RouterCtx, TimerEvent};

/// One router instance, owning all per-destination state for its node
pub struct DdcRouter<L: LinkState> {
    node: NodeId,
    links: Arc<L>,
    config: RouterConfig,
    local_addrs: Vec<Ipv4Addr>,
    strategy: Box<dyn ReversalStrategy>,
    heartbeat: HeartbeatEngine,
    dead: BTreeSet<IfaceIndex>,
}

/// Split the router into disjoint field borrows: the strategy, the
/// heartbeat engine and a [`RouterCtx`] over the rest
macro_rules! split {
    ($self:ident, $effects:ident => $strategy:ident, $heartbeat:ident, $ctx:ident) => {
        let $strategy = $self.strategy.as_mut();
        let $heartbeat = &mut $self.heartbeat;
        let mut $ctx = RouterCtx {
            node: $self.node,
            local_addr: $self
                .local_addrs
                .first()
                .copied()
                .unwrap_or(Ipv4Addr::UNSPECIFIED),
            links: &*$self.links,
            config: &$self.config,
            dead: &mut $self.dead,
            effects: &mut $effects,
        };
    };
}

impl<L: LinkState> DdcRouter<L> {
    pub fn new(node: NodeId, links: Arc<L>, config: RouterConfig) -> Self {
        let strategy: Box<dyn ReversalStrategy> = match config.strategy {
            StrategyKind::Sequence => Box::new(SequenceReversal::new()),
            StrategyKind::Locking => Box::new(LockingReversal::new()),
        };
        Self {
            node,
            links,
            config,
            local_addrs: Vec::new(),
            strategy,
            heartbeat: HeartbeatEngine::new(),
            dead: BTreeSet::new(),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Register one of this node's own addresses; packets for it are
    /// delivered locally
    pub fn add_local_address(&mut self, addr: Ipv4Addr) {
        if !self.local_addrs.contains(&addr) {
            self.local_addrs.push(addr);
        }
    }

    pub fn is_local(&self, addr: Ipv4Addr) -> bool {
        self.local_addrs.contains(&addr)
    }

    /// Mark a directly attached destination's interface as Output
    pub fn add_host_route(&mut self, dest: Ipv4Addr, iface: IfaceIndex) {
        let mut effects = Vec::new();
        split!(self, effects => strategy, _hb, ctx);
        strategy.add_host_route(&mut ctx, dest, iface);
    }

    /// Record this node's distance to a destination
    pub fn set_distance(&mut self, dest: Ipv4Addr, metric: u32) {
        let mut effects = Vec::new();
        split!(self, effects => strategy, _hb, ctx);
        strategy.set_distance(&mut ctx, dest, metric);
    }

    pub fn distance(&self, dest: Ipv4Addr) -> Option<u32> {
        self.strategy.distance(dest)
    }

    /// Run initial classification from a snapshot of neighbor metrics
    pub fn classify_interfaces(&mut self, input: &ClassifyInput) -> Result<(), RouteError> {
        let mut effects = Vec::new();
        split!(self, effects => strategy, _hb, ctx);
        strategy.classify(&mut ctx, input)
    }

    pub fn set_interface_priority(&mut self, dest: Ipv4Addr, iface: IfaceIndex, priority: u32) {
        let mut effects = Vec::new();
        split!(self, effects => strategy, _hb, ctx);
        strategy.set_interface_priority(&mut ctx, dest, iface, priority);
    }

    pub fn set_reversal_order(
        &mut self,
        dest: Ipv4Addr,
        before: Vec<IfaceIndex>,
        after: Vec<IfaceIndex>,
    ) {
        let mut effects = Vec::new();
        split!(self, effects => strategy, _hb, ctx);
        strategy.set_reversal_order(&mut ctx, dest, before, after);
    }

    pub fn send_initial_heartbeat(&mut self, dest: Ipv4Addr) -> Vec<Effect> {
        let mut effects = Vec::new();
        {
            split!(self, effects => strategy, _hb, ctx);
            strategy.send_initial_heartbeat(&mut ctx, dest);
        }
        self.arm_reanimation(&mut effects);
        effects
    }

    /// Locally originated packet: pick an outgoing interface
    pub fn route_output(&mut self, dest: Ipv4Addr) -> (RouteDecision, Vec<Effect>) {
        let mut effects = Vec::new();
        if self.is_local(dest) {
            return (RouteDecision::Local, effects);
        }
        let decision = {
            split!(self, effects => strategy, _hb, ctx);
            strategy.route_output(&mut ctx, dest)
        };
        if decision == RouteDecision::NoRoute {
            debug!(node = %self.node, dest = %dest, "no route to host");
        }
        self.arm_reanimation(&mut effects);
        (decision, effects)
    }

    /// Transit packet: advance the handshake state, then pick a way out
    pub fn route_input(
        &mut self,
        packet: &DataPacket,
        iif: IfaceIndex,
    ) -> (RouteDecision, Vec<Effect>) {
        let mut effects = Vec::new();
        if self.is_local(packet.destination) {
            trace!(node = %self.node, dest = %packet.destination, "delivering locally");
            return (RouteDecision::Local, effects);
        }
        let decision = {
            split!(self, effects => strategy, _hb, ctx);
            strategy.route_input(&mut ctx, packet, iif)
        };
        self.arm_reanimation(&mut effects);
        (decision, effects)
    }

    /// Edge-triggered notification that a link failed
    pub fn link_down(&mut self, iface: IfaceIndex) -> Vec<Effect> {
        let mut effects = Vec::new();
        {
            split!(self, effects => strategy, _hb, ctx);
            strategy.link_down(&mut ctx, iface);
            // even an interface no destination references yet gets probed
            // once its link returns
            ctx.dead.insert(iface);
        }
        self.arm_reanimation(&mut effects);
        effects
    }

    /// Edge-triggered notification that a link recovered
    pub fn link_up(&mut self, iface: IfaceIndex) -> Vec<Effect> {
        let mut effects = Vec::new();
        {
            split!(self, effects => strategy, _hb, ctx);
            strategy.link_up(&mut ctx, iface);
        }
        self.arm_reanimation(&mut effects);
        effects
    }

    /// Dispatch an arriving control message
    pub fn handle_control(&mut self, iif: IfaceIndex, msg: &MessageHeader) -> Vec<Effect> {
        let mut effects = Vec::new();
        {
            let local_addrs = self.local_addrs.clone();
            split!(self, effects => strategy, heartbeat, ctx);
            match msg.kind {
                MessageKind::MetricRequest => {
                    heartbeat.on_metric_request(strategy, &mut ctx, &local_addrs, iif, msg);
                }
                MessageKind::MetricResponse => {
                    heartbeat.on_metric_response(strategy, &mut ctx, &local_addrs, iif, msg);
                }
                _ => strategy.handle_control(&mut ctx, iif, msg),
            }
        }
        self.arm_reanimation(&mut effects);
        effects
    }

    /// Deliver a previously requested timer event
    pub fn handle_timer(&mut self, event: TimerEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        {
            let local_addrs = self.local_addrs.clone();
            split!(self, effects => strategy, heartbeat, ctx);
            match event {
                TimerEvent::ReanimationProbe => {
                    heartbeat.on_probe_timer(strategy, &mut ctx, &local_addrs);
                }
                TimerEvent::DelayedReversal { dest, iface, kind } => {
                    strategy.apply_delayed_reversal(&mut ctx, dest, iface, kind);
                }
                TimerEvent::AeoRetry { dest } => {
                    strategy.handle_aeo_retry(&mut ctx, dest);
                }
            }
        }
        effects
    }

    /// Arm the reanimation timer whenever dead interfaces exist and no
    /// probe is outstanding; the probe handler rearms itself while any
    /// remain, so the timer self-cancels at quiescence
    fn arm_reanimation(&mut self, effects: &mut Vec<Effect>) {
        if !self.dead.is_empty() && !self.heartbeat.probe_scheduled {
            effects.push(Effect::Schedule {
                delay: self.config.reanimation_interval,
                event: TimerEvent::ReanimationProbe,
            });
            self.heartbeat.probe_scheduled = true;
        }
    }

    /// Interfaces currently dead for at least one destination
    pub fn dead_interfaces(&self) -> Vec<IfaceIndex> {
        self.dead.iter().copied().collect()
    }

    pub fn has_dead_interfaces(&self) -> bool {
        !self.dead.is_empty()
    }

    pub fn reversal_count(&self) -> u64 {
        self.strategy.reversal_count()
    }

    pub fn check_partition(&self, dest: Ipv4Addr) -> bool {
        self.strategy.check_partition(dest)
    }

    pub fn sequence_bits(&self, dest: Ipv4Addr, iface: IfaceIndex) -> Option<(u8, u8)> {
        self.strategy.sequence_bits(dest, iface)
    }

    pub fn known_destinations(&self) -> Vec<Ipv4Addr> {
        self.strategy.known_destinations()
    }

    /// Routing-table style dump for one destination
    pub fn describe(&self, dest: Ipv4Addr) -> String {
        self.strategy.describe(dest)
    }

    /// Full dump across destinations, one line each
    pub fn describe_all(&self) -> String {
        let mut out = String::new();
        for dest in self.strategy.known_destinations() {
            out.push_str(&self.strategy.describe(dest));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ddc_core::{LinkFlag, SharedLinks};

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn router(n: usize, config: RouterConfig) -> (DdcRouter<SharedLinks>, Vec<LinkFlag>) {
        let mut links = SharedLinks::new();
        let flags: Vec<LinkFlag> = (0..n).map(|_| LinkFlag::up()).collect();
        for f in &flags {
            links.attach(f.clone());
        }
        let mut r = DdcRouter::new(NodeId(1), Arc::new(links), config);
        r.add_local_address(addr(1));
        (r, flags)
    }

    #[test]
    fn test_local_delivery() {
        let (mut r, _flags) = router(1, RouterConfig::default());
        let (decision, _) = r.route_output(addr(1));
        assert_eq!(decision, RouteDecision::Local);

        let packet = DataPacket::new(addr(2), addr(1), vec![]);
        let (decision, _) = r.route_input(&packet, 1);
        assert_eq!(decision, RouteDecision::Local);
    }

    #[test]
    fn test_host_route_and_forwarding() {
        let (mut r, _flags) = router(1, RouterConfig::default());
        r.add_host_route(addr(9), 1);
        let (decision, _) = r.route_output(addr(9));
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
    fn test_link_down_schedules_reanimation_probe() {
        let (mut r, flags) = router(1, RouterConfig::default());
        r.add_host_route(addr(9), 1);
        flags[0].set_up(false);
        let effects = r.link_down(1);
        assert!(r.has_dead_interfaces());
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Schedule {
                event: TimerEvent::ReanimationProbe,
                ..
            }
        )));

        // the probe is armed exactly once while outstanding
        let effects = r.link_down(1);
        assert!(!effects.iter().any(|e| matches!(
            e,
            Effect::Schedule {
                event: TimerEvent::ReanimationProbe,
                ..
            }
        )));
    }

    #[test]
    fn test_probe_timer_requests_metrics_after_recovery() {
        let (mut r, flags) = router(1, RouterConfig::default());
        r.add_host_route(addr(9), 1);
        r.set_distance(addr(9), 1);
        flags[0].set_up(false);
        r.link_down(1);

        flags[0].set_up(true);
        let effects = r.handle_timer(TimerEvent::ReanimationProbe);
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::SendControl { iface: 1, message } if message.kind == MessageKind::MetricRequest
        )));
        assert!(!r.has_dead_interfaces());
    }

    #[test]
    fn test_locking_strategy_selected_by_config() {
        let config = RouterConfig {
            strategy: StrategyKind::Locking,
            ..Default::default()
        };
        let (mut r, _flags) = router(1, config);
        r.add_host_route(addr(9), 1);
        let (decision, _) = r.route_output(addr(9));
        assert!(matches!(decision, RouteDecision::Forward { iface: 1, .. }));
        assert!(r.describe(addr(9)).contains("vnode=0"));
    }

    #[test]
    fn test_initial_heartbeat_runs_the_cascade() {
        let config = RouterConfig {
            strategy: StrategyKind::Locking,
            ..Default::default()
        };
        let (mut r, flags) = router(1, config);
        r.set_distance(addr(9), 0);
        r.set_reversal_order(addr(9), vec![], vec![1]);
        flags[0].set_up(false); // nobody to lock, the flip is immediate

        r.send_initial_heartbeat(addr(9));
        assert!(r.describe(addr(9)).contains("vnode=1"));
    }

    #[test]
    fn test_describe_all_lists_destinations() {
        let (mut r, _flags) = router(1, RouterConfig::default());
        r.add_host_route(addr(9), 1);
        r.add_host_route(addr(8), 1);
        let dump = r.describe_all();
        assert!(dump.contains("10.0.0.8"));
        assert!(dump.contains("10.0.0.9"));
    }
}
