//! Per-interface direction states and the actions that drive them
//!
//! Every (destination, interface) pair carries one [`DirectionState`].
//! The handshake states between `Input` and `Output` exist so that a
//! reversal is never observed half-complete: an interface being flipped
//! walks `Input -> ReverseInput -> ReverseInputPrimed -> NewInput` on one
//! side while the other side sees `Output -> ReverseOutput`.

use std::fmt::Display;

/// Direction of one interface relative to one destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionState {
    /// Not yet classified for this destination
    None,
    /// Carries traffic away from the destination (we receive on it)
    Input,
    /// Carries traffic toward the destination (we send on it)
    Output,
    /// Input being flipped by this node; flip request sent, not yet seen
    ReverseInput,
    /// Far side acknowledged the flip request
    ReverseInputPrimed,
    /// Flip confirmed in both directions; demoted to `Input` after one send
    NewInput,
    /// Output the neighbor has started flipping toward us
    ReverseOutput,
    /// Underlying link failed; only the heartbeat subsystem revives it
    Dead,
}

impl Display for DirectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "-",
            Self::Input => "I",
            Self::Output => "O",
            Self::ReverseInput => "RI",
            Self::ReverseInputPrimed => "RI'",
            Self::NewInput => "I+",
            Self::ReverseOutput => "RO",
            Self::Dead => "X",
        };
        write!(f, "{}", s)
    }
}

/// Events the state machine advances on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// A data packet arrived on the interface
    Receive,
    /// A data packet was sent out the interface
    Send,
    /// The node exhausted its other options and is flipping this link
    NoPath,
    /// The underlying link was observed down
    DetectFailure,
}
