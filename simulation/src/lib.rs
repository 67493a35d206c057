//! # DDC Simulation
//!
//! Discrete-event simulation of DDC routers over point-to-point links
//! that fail and recover mid-run.
//!
//! - [`topology`]: network shapes (line, ring, mesh, diamond, random)
//! - [`simulation`]: the event engine wiring routers together with
//!   transit-delayed packet, control and timer events
//! - [`scenarios`]: the canonical failure/recovery runs
//! - [`types`]: tracked packets, the event log and run statistics

pub mod scenarios;
pub mod simulation;
pub mod topology;
pub mod types;

pub use simulation::{SimConfig, Simulation};
pub use topology::{Topology, TopologyBuilder, diamond, from_edges};
pub use types::{DropReason, NetworkEvent, PacketId, SimStats, TrackedPacket, node_addr};
