//! # DDC Core
//!
//! Shared vocabulary for the DDC forwarding stack.
//!
//! This crate holds the types every other crate agrees on:
//!
//! - [`NodeId`] and interface indices: who a router is and how it numbers
//!   its ports
//! - [`DataPacket`]: the data-plane header the forwarding core reads
//!   (destination, TTL) and annotates (sequence bit, generation, bounces)
//! - [`LinkState`]: the seam through which the core observes physical
//!   link liveness, with [`SharedLinks`] as the point-to-point-channel
//!   implementation used by the simulation
//!
//! The routing core itself lives in `ddc-routing`; the control-message
//! wire format in `ddc-wire`.

pub mod identity;
pub mod link;
pub mod packet;

pub use identity::{IfaceIndex, LOOPBACK_IFACE, NodeId};
pub use link::{LinkFlag, LinkState, SharedLinks};
pub use packet::DataPacket;
