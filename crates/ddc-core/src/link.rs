//! Link state abstraction
//!
//! The forwarding core never owns the physical links; it asks a
//! [`LinkState`] whether the link behind an interface is currently up.
//! This trait is the seam between the routing core and whatever device
//! layer hosts it (the simulation's point-to-point channels, in this
//! repository).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::identity::IfaceIndex;

/// Read-only view of the node's physical link status
pub trait LinkState {
    /// Number of interfaces on this node, including the loopback at index 0
    fn iface_count(&self) -> usize;

    /// Whether the physical link behind an interface is currently up
    fn is_up(&self, iface: IfaceIndex) -> bool;
}

/// Shared handle to one link's up/down flag
///
/// Both endpoints of a point-to-point link hold clones of the same flag,
/// so failing a link is observed by both routers at once.
#[derive(Debug, Clone, Default)]
pub struct LinkFlag(Arc<AtomicBool>);

impl LinkFlag {
    /// Create a flag, initially up
    pub fn up() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn set_up(&self, up: bool) {
        self.0.store(up, Ordering::Relaxed);
    }

    pub fn is_up(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-node link table backed by shared flags
#[derive(Debug, Default)]
pub struct SharedLinks {
    links: Vec<LinkFlag>,
}

impl SharedLinks {
    /// Create a table containing only the loopback, which is always up
    pub fn new() -> Self {
        Self {
            links: vec![LinkFlag::up()],
        }
    }

    /// Attach a link flag, returning the interface index it was assigned
    pub fn attach(&mut self, flag: LinkFlag) -> IfaceIndex {
        self.links.push(flag);
        self.links.len() - 1
    }

    /// The flag behind an interface, for drivers that need to flip it
    pub fn flag(&self, iface: IfaceIndex) -> Option<&LinkFlag> {
        self.links.get(iface)
    }
}

impl LinkState for SharedLinks {
    fn iface_count(&self) -> usize {
        self.links.len()
    }

    fn is_up(&self, iface: IfaceIndex) -> bool {
        self.links.get(iface).map(|f| f.is_up()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_always_present() {
        let links = SharedLinks::new();
        assert_eq!(links.iface_count(), 1);
        assert!(links.is_up(0));
    }

    #[test]
    fn test_shared_flag_visible_to_both_sides() {
        let flag = LinkFlag::up();
        let mut a = SharedLinks::new();
        let mut b = SharedLinks::new();
        let ia = a.attach(flag.clone());
        let ib = b.attach(flag.clone());

        assert!(a.is_up(ia));
        assert!(b.is_up(ib));

        flag.set_up(false);
        assert!(!a.is_up(ia));
        assert!(!b.is_up(ib));
    }

    #[test]
    fn test_out_of_range_is_down() {
        let links = SharedLinks::new();
        assert!(!links.is_up(5));
    }
}
