//! Routing error types

use std::net::Ipv4Addr;

use thiserror::Error;

/// Errors surfaced by the routing core
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    /// All reversal options are exhausted; per-packet, never fatal
    #[error("No route to host {0}")]
    NoRouteToHost(Ipv4Addr),

    /// Classification left an interface uncovered for a destination
    #[error("Destination {dest} interface {iface} unclassified after classification")]
    Unclassified { dest: Ipv4Addr, iface: usize },

    /// An interface index outside this node's interface vector
    #[error("Interface {0} out of range")]
    BadInterface(usize),
}

/// Result type for routing operations
pub type RouteResult<T> = Result<T, RouteError>;
