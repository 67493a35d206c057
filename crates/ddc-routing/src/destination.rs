//! Per-destination direction state
//!
//! One [`Destination`] holds everything a node tracks about forwarding to
//! one address: the distance metric, the per-interface direction cells,
//! the five membership lists, the two 1-bit sequence counters per
//! interface and the good-to-reverse work list. The lists and the cells
//! are two views of the same classification; [`Destination::check_partition`]
//! verifies they agree.
//!
//! Entries are created lazily the first time a route or metric is learned
//! for an address and are never deleted.

use std::collections::{BTreeMap, BTreeSet};
use std::collections::VecDeque;
use std::net::Ipv4Addr;

use ddc_core::{IfaceIndex, LOOPBACK_IFACE};
use tracing::{debug, error, trace};

use crate::direction::{Action, DirectionState};

/// Remove the first occurrence of a value from a list
fn remove_value(list: &mut VecDeque<IfaceIndex>, value: IfaceIndex) {
    if let Some(pos) = list.iter().position(|&i| i == value) {
        list.remove(pos);
    }
}

/// All forwarding state one node keeps for one destination address
#[derive(Debug, Clone)]
pub struct Destination {
    /// Hop-count metric, used at initial classification and reanimation
    pub distance: Option<u32>,
    /// Direction cell per interface
    cells: Vec<DirectionState>,
    /// Interfaces we expect traffic for this destination to arrive on
    pub input: VecDeque<IfaceIndex>,
    /// Interfaces that carry traffic toward the destination, front preferred
    pub output: VecDeque<IfaceIndex>,
    /// Inputs this node is in the middle of flipping
    pub reverse_input: VecDeque<IfaceIndex>,
    /// Outputs the neighbor has started flipping
    pub reverse_output: VecDeque<IfaceIndex>,
    /// Interfaces lost to link failure
    pub dead: VecDeque<IfaceIndex>,
    /// Sequence bit stamped on traffic we send, per interface
    pub local_seq: Vec<u8>,
    /// Sequence bit expected on traffic we receive, per interface
    pub remote_seq: Vec<u8>,
    /// Inputs still permitted to reverse in the current reversal round
    pub good_to_reverse: VecDeque<IfaceIndex>,
    /// Preference weight per interface, higher preferred
    pub priorities: Vec<u32>,
}

impl Destination {
    pub fn new(iface_count: usize) -> Self {
        Self {
            distance: None,
            cells: vec![DirectionState::None; iface_count],
            input: VecDeque::new(),
            output: VecDeque::new(),
            reverse_input: VecDeque::new(),
            reverse_output: VecDeque::new(),
            dead: VecDeque::new(),
            local_seq: vec![0; iface_count],
            remote_seq: vec![0; iface_count],
            good_to_reverse: VecDeque::new(),
            priorities: vec![0; iface_count],
        }
    }

    pub fn state(&self, iface: IfaceIndex) -> DirectionState {
        self.cells
            .get(iface)
            .copied()
            .unwrap_or(DirectionState::None)
    }

    pub fn iface_count(&self) -> usize {
        self.cells.len()
    }

    /// Classify an unclassified interface as Input
    pub fn set_input(&mut self, iface: IfaceIndex) {
        if self.cells[iface] != DirectionState::None {
            return;
        }
        self.cells[iface] = DirectionState::Input;
        self.input.push_back(iface);
    }

    /// Classify an unclassified interface as Output
    pub fn set_output(&mut self, iface: IfaceIndex) {
        if self.cells[iface] != DirectionState::None {
            return;
        }
        self.cells[iface] = DirectionState::Output;
        self.output.push_back(iface);
    }

    /// Adopt an uncategorized interface as Input on first receipt,
    /// taking the carried sequence bit as the expected one
    pub fn adopt_input(&mut self, iface: IfaceIndex, seq: u8) {
        debug_assert_eq!(self.cells[iface], DirectionState::None);
        self.cells[iface] = DirectionState::Input;
        self.input.push_back(iface);
        self.remote_seq[iface] = seq & 1;
    }

    /// Advance the direction state machine for one interface
    ///
    /// List membership is updated alongside the cell; transitions into
    /// `Dead` also record the interface in the node-wide dead index.
    pub fn advance(
        &mut self,
        dest: Ipv4Addr,
        iface: IfaceIndex,
        action: Action,
        dead_index: &mut BTreeSet<IfaceIndex>,
    ) {
        use Action::*;
        use DirectionState::*;

        let before = self.cells[iface];
        match (before, action) {
            (None, Receive) => {
                // uncategorized receipt; caller normally goes through
                // adopt_input to also capture the sequence bit
                self.cells[iface] = Input;
                self.input.push_back(iface);
            }
            (None, DetectFailure) => {
                self.kill(dest, iface, dead_index);
            }
            (None, _) => {}

            (Input, Receive) | (Input, Send) => {}
            (Input, NoPath) => {
                self.cells[iface] = ReverseInput;
                remove_value(&mut self.input, iface);
                self.reverse_input.push_back(iface);
            }
            (Input, DetectFailure) => self.kill(dest, iface, dead_index),

            (Output, Receive) => {
                self.cells[iface] = ReverseOutput;
                remove_value(&mut self.output, iface);
                self.reverse_output.push_back(iface);
            }
            (Output, Send) => {}
            (Output, NoPath) => self.invalid(dest, iface, before, action),
            (Output, DetectFailure) => self.kill(dest, iface, dead_index),

            (ReverseOutput, Receive) | (ReverseOutput, Send) | (ReverseOutput, NoPath) => {}
            (ReverseOutput, DetectFailure) => self.kill(dest, iface, dead_index),

            (ReverseInput, Receive) => {
                self.cells[iface] = ReverseInputPrimed;
            }
            (ReverseInput, Send) => {}
            (ReverseInput, NoPath) => self.invalid(dest, iface, before, action),
            (ReverseInput, DetectFailure) => self.kill(dest, iface, dead_index),

            (ReverseInputPrimed, Receive) => {
                self.cells[iface] = NewInput;
                remove_value(&mut self.reverse_input, iface);
                self.input.push_back(iface);
            }
            (ReverseInputPrimed, Send) => {}
            (ReverseInputPrimed, NoPath) => self.invalid(dest, iface, before, action),
            (ReverseInputPrimed, DetectFailure) => self.kill(dest, iface, dead_index),

            (NewInput, Send) => {
                // one full round without a further reversal request
                self.cells[iface] = Input;
            }
            (NewInput, Receive) => {}
            (NewInput, NoPath) => {
                self.cells[iface] = ReverseInput;
                remove_value(&mut self.input, iface);
                self.reverse_input.push_back(iface);
            }
            (NewInput, DetectFailure) => self.kill(dest, iface, dead_index),

            (Dead, DetectFailure) => self.invalid(dest, iface, before, action),
            (Dead, _) => {}
        }

        if before != self.cells[iface] {
            trace!(
                dest = %dest,
                iface,
                from = %before,
                to = %self.cells[iface],
                ?action,
                "direction transition"
            );
        }
    }

    /// Mark an interface dead for this destination
    fn kill(&mut self, dest: Ipv4Addr, iface: IfaceIndex, dead_index: &mut BTreeSet<IfaceIndex>) {
        remove_value(&mut self.input, iface);
        remove_value(&mut self.output, iface);
        remove_value(&mut self.reverse_input, iface);
        remove_value(&mut self.reverse_output, iface);
        remove_value(&mut self.good_to_reverse, iface);
        self.cells[iface] = DirectionState::Dead;
        if !self.dead.contains(&iface) {
            self.dead.push_back(iface);
        }
        dead_index.insert(iface);
        debug!(dest = %dest, iface, "interface marked dead");
    }

    /// An action arrived that the current state does not admit
    ///
    /// Programmer error in debug builds; in release the cell is left in
    /// its current, already-safe state and the event is logged.
    fn invalid(&self, dest: Ipv4Addr, iface: IfaceIndex, state: DirectionState, action: Action) {
        debug_assert!(
            false,
            "invalid action {:?} in state {} for {} iface {}",
            action, state, dest, iface
        );
        error!(
            dest = %dest,
            iface,
            state = %state,
            ?action,
            "invalid state machine action ignored"
        );
    }

    /// Flip an Input (or NewInput) interface to Output, toggling the
    /// local sequence bit so the far side can observe the reversal
    ///
    /// Returns false when the interface is not currently an input.
    pub fn flip_input_to_output(&mut self, iface: IfaceIndex) -> bool {
        if !matches!(
            self.state(iface),
            DirectionState::Input | DirectionState::NewInput
        ) {
            return false;
        }
        remove_value(&mut self.input, iface);
        remove_value(&mut self.good_to_reverse, iface);
        self.cells[iface] = DirectionState::Output;
        self.output.push_back(iface);
        self.local_seq[iface] ^= 1;
        true
    }

    /// Converse flip on a sequence-mismatched receipt: the neighbor has
    /// reversed its end, so this Output becomes an Input and the expected
    /// remote bit toggles to match
    pub fn flip_output_to_input(&mut self, iface: IfaceIndex) -> bool {
        if self.state(iface) != DirectionState::Output {
            return false;
        }
        remove_value(&mut self.output, iface);
        self.cells[iface] = DirectionState::Input;
        self.input.push_front(iface);
        self.remote_seq[iface] ^= 1;
        true
    }

    /// Reclaim every half-reversed output as a plain Output again,
    /// used once all other options are exhausted
    pub fn promote_reverse_outputs(&mut self) -> usize {
        let mut promoted = 0;
        while let Some(iface) = self.reverse_output.pop_front() {
            self.cells[iface] = DirectionState::Output;
            self.output.push_back(iface);
            promoted += 1;
        }
        promoted
    }

    /// Bring a dead or unclassified interface back as Input or Output
    ///
    /// Used by the heartbeat subsystem after a metric exchange. Both
    /// sequence bits restart at zero, matching the far side doing the same.
    pub fn revive(&mut self, iface: IfaceIndex, as_output: bool) {
        if !matches!(
            self.state(iface),
            DirectionState::None | DirectionState::Dead
        ) {
            return;
        }
        remove_value(&mut self.dead, iface);
        self.local_seq[iface] = 0;
        self.remote_seq[iface] = 0;
        if as_output {
            self.cells[iface] = DirectionState::Output;
            self.output.push_back(iface);
        } else {
            self.cells[iface] = DirectionState::Input;
            self.input.push_back(iface);
        }
    }

    /// Order the output list by descending priority, interface index as
    /// the deterministic tie-break
    pub fn sort_outputs(&mut self) {
        let mut v: Vec<_> = self.output.iter().copied().collect();
        v.sort_by_key(|&i| (std::cmp::Reverse(self.priorities[i]), i));
        self.output = v.into();
    }

    /// Every classified non-loopback interface must sit in exactly one
    /// list, and that list must match its cell
    pub fn check_partition(&self) -> bool {
        for iface in 0..self.cells.len() {
            if iface == LOOPBACK_IFACE {
                continue;
            }
            let memberships = [
                (self.input.contains(&iface), DirectionState::Input),
                (self.output.contains(&iface), DirectionState::Output),
                (
                    self.reverse_input.contains(&iface),
                    DirectionState::ReverseInput,
                ),
                (
                    self.reverse_output.contains(&iface),
                    DirectionState::ReverseOutput,
                ),
                (self.dead.contains(&iface), DirectionState::Dead),
            ];
            let count = memberships.iter().filter(|(m, _)| *m).count();
            match self.state(iface) {
                DirectionState::None => {
                    if count != 0 {
                        return false;
                    }
                }
                DirectionState::Input | DirectionState::NewInput => {
                    if count != 1 || !self.input.contains(&iface) {
                        return false;
                    }
                }
                DirectionState::Output => {
                    if count != 1 || !self.output.contains(&iface) {
                        return false;
                    }
                }
                DirectionState::ReverseInput | DirectionState::ReverseInputPrimed => {
                    if count != 1 || !self.reverse_input.contains(&iface) {
                        return false;
                    }
                }
                DirectionState::ReverseOutput => {
                    if count != 1 || !self.reverse_output.contains(&iface) {
                        return false;
                    }
                }
                DirectionState::Dead => {
                    if count != 1 || !self.dead.contains(&iface) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

/// Lazily populated registry of every destination this node has seen
#[derive(Debug, Default)]
pub struct DestinationTable {
    entries: BTreeMap<Ipv4Addr, Destination>,
}

impl DestinationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or create the entry for an address
    pub fn entry(&mut self, addr: Ipv4Addr, iface_count: usize) -> &mut Destination {
        self.entries
            .entry(addr)
            .or_insert_with(|| Destination::new(iface_count))
    }

    pub fn get(&self, addr: Ipv4Addr) -> Option<&Destination> {
        self.entries.get(&addr)
    }

    pub fn get_mut(&mut self, addr: Ipv4Addr) -> Option<&mut Destination> {
        self.entries.get_mut(&addr)
    }

    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        self.entries.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Ipv4Addr, &Destination)> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&Ipv4Addr, &mut Destination)> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest_addr() -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, 9)
    }

    fn fresh(n: usize) -> (Destination, BTreeSet<IfaceIndex>) {
        (Destination::new(n), BTreeSet::new())
    }

    #[test]
    fn test_classification_moves_lists() {
        let (mut d, _) = fresh(3);
        d.set_input(1);
        d.set_output(2);
        assert_eq!(d.state(1), DirectionState::Input);
        assert_eq!(d.state(2), DirectionState::Output);
        assert!(d.check_partition());

        // re-classification of an already classified interface is a no-op
        d.set_output(1);
        assert_eq!(d.state(1), DirectionState::Input);
    }

    #[test]
    fn test_input_no_path_starts_reversal() {
        let (mut d, mut dead) = fresh(2);
        d.set_input(1);
        d.advance(dest_addr(), 1, Action::NoPath, &mut dead);
        assert_eq!(d.state(1), DirectionState::ReverseInput);
        assert!(d.input.is_empty());
        assert!(d.reverse_input.contains(&1));
        assert!(d.check_partition());
    }

    #[test]
    fn test_reverse_input_handshake_completes() {
        let (mut d, mut dead) = fresh(2);
        d.set_input(1);
        d.advance(dest_addr(), 1, Action::NoPath, &mut dead);
        d.advance(dest_addr(), 1, Action::Receive, &mut dead);
        assert_eq!(d.state(1), DirectionState::ReverseInputPrimed);
        d.advance(dest_addr(), 1, Action::Receive, &mut dead);
        assert_eq!(d.state(1), DirectionState::NewInput);
        assert!(d.input.contains(&1));
        // one send demotes the transitional label
        d.advance(dest_addr(), 1, Action::Send, &mut dead);
        assert_eq!(d.state(1), DirectionState::Input);
        assert!(d.check_partition());
    }

    #[test]
    fn test_output_receive_marks_reverse_output() {
        let (mut d, mut dead) = fresh(2);
        d.set_output(1);
        d.advance(dest_addr(), 1, Action::Receive, &mut dead);
        assert_eq!(d.state(1), DirectionState::ReverseOutput);
        assert!(d.output.is_empty());
        // further receives confirm and stay
        d.advance(dest_addr(), 1, Action::Receive, &mut dead);
        assert_eq!(d.state(1), DirectionState::ReverseOutput);
        assert!(d.check_partition());
    }

    #[test]
    fn test_detect_failure_wins_from_every_state() {
        for setup in 0..5 {
            let (mut d, mut dead) = fresh(2);
            match setup {
                0 => d.set_input(1),
                1 => d.set_output(1),
                2 => {
                    d.set_input(1);
                    d.advance(dest_addr(), 1, Action::NoPath, &mut dead);
                }
                3 => {
                    d.set_output(1);
                    d.advance(dest_addr(), 1, Action::Receive, &mut dead);
                }
                _ => {
                    d.set_input(1);
                    d.advance(dest_addr(), 1, Action::NoPath, &mut dead);
                    d.advance(dest_addr(), 1, Action::Receive, &mut dead);
                }
            }
            d.advance(dest_addr(), 1, Action::DetectFailure, &mut dead);
            assert_eq!(d.state(1), DirectionState::Dead, "setup {}", setup);
            assert!(dead.contains(&1));
            assert!(d.check_partition(), "setup {}", setup);
        }
    }

    #[test]
    fn test_dead_absorbs_normal_actions() {
        let (mut d, mut dead) = fresh(2);
        d.set_input(1);
        d.advance(dest_addr(), 1, Action::DetectFailure, &mut dead);
        for action in [Action::Receive, Action::Send, Action::NoPath] {
            d.advance(dest_addr(), 1, action, &mut dead);
            assert_eq!(d.state(1), DirectionState::Dead);
        }
    }

    #[test]
    #[should_panic]
    fn test_detect_failure_on_dead_asserts() {
        let (mut d, mut dead) = fresh(2);
        d.set_input(1);
        d.advance(dest_addr(), 1, Action::DetectFailure, &mut dead);
        d.advance(dest_addr(), 1, Action::DetectFailure, &mut dead);
    }

    #[test]
    fn test_revive_resets_sequence_bits() {
        let (mut d, mut dead) = fresh(2);
        d.set_input(1);
        d.local_seq[1] = 1;
        d.advance(dest_addr(), 1, Action::DetectFailure, &mut dead);
        d.revive(1, true);
        assert_eq!(d.state(1), DirectionState::Output);
        assert_eq!(d.local_seq[1], 0);
        assert_eq!(d.remote_seq[1], 0);
        assert!(d.dead.is_empty());
        assert!(d.check_partition());
    }

    #[test]
    fn test_revive_leaves_live_interfaces_alone() {
        let (mut d, _) = fresh(2);
        d.set_input(1);
        d.revive(1, true);
        assert_eq!(d.state(1), DirectionState::Input);
    }

    #[test]
    fn test_sort_outputs_by_priority() {
        let (mut d, _) = fresh(4);
        d.set_output(1);
        d.set_output(2);
        d.set_output(3);
        d.priorities[2] = 10;
        d.sort_outputs();
        assert_eq!(d.output.front(), Some(&2));
    }

    #[test]
    fn test_table_lazy_entry() {
        let mut table = DestinationTable::new();
        assert!(table.get(dest_addr()).is_none());
        table.entry(dest_addr(), 3).set_output(1);
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.get(dest_addr()).unwrap().state(1),
            DirectionState::Output
        );
    }
}
