//! Discovery lifecycle for network device parents.
//!
//! A parent is the network root (a tuner box, a gateway) under which child
//! capture devices are found. Parents are tracked before their children are
//! fully identified, and their address follows DHCP reassignment with
//! last-write-wins semantics. No socket I/O happens here.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use log::{debug, info};
use parking_lot::RwLock;
use serde::Serialize;

/// A network root grouping child devices.
#[derive(Debug)]
pub struct DiscoveredDeviceParent {
    name: String,
    parent_id: u32,
    address: RwLock<IpAddr>,
    children: RwLock<Vec<String>>,
}

impl DiscoveredDeviceParent {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent_id(&self) -> u32 {
        self.parent_id
    }

    pub fn remote_address(&self) -> IpAddr {
        *self.address.read()
    }

    pub fn children(&self) -> Vec<String> {
        self.children.read().clone()
    }
}

/// Handle returned by [`DiscoveryTracker::track_parent`].
pub type ParentHandle = Arc<DiscoveredDeviceParent>;

/// Serializable view of a tracked parent.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ParentStatus {
    pub name: String,
    pub parent_id: u32,
    pub address: IpAddr,
    pub children: Vec<String>,
}

impl From<&DiscoveredDeviceParent> for ParentStatus {
    fn from(parent: &DiscoveredDeviceParent) -> Self {
        Self {
            name: parent.name.clone(),
            parent_id: parent.parent_id,
            address: parent.remote_address(),
            children: parent.children(),
        }
    }
}

/// Tracks discovered parents by id.
#[derive(Debug, Default)]
pub struct DiscoveryTracker {
    parents: RwLock<BTreeMap<u32, ParentHandle>>,
}

impl DiscoveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a parent, or refresh the address of a known one.
    ///
    /// `None` starts a new parent at the loopback address until a real
    /// address is learned.
    pub fn track_parent(&self, name: &str, parent_id: u32, address: Option<IpAddr>) -> ParentHandle {
        let mut parents = self.parents.write();

        if let Some(existing) = parents.get(&parent_id) {
            if let Some(address) = address {
                Self::update_address(existing, address);
            }
            return Arc::clone(existing);
        }

        let parent = Arc::new(DiscoveredDeviceParent {
            name: name.to_string(),
            parent_id,
            address: RwLock::new(address.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))),
            children: RwLock::new(Vec::new()),
        });
        info!(
            "Tracking device parent {} (id={}) at {}",
            name,
            parent_id,
            parent.remote_address()
        );
        parents.insert(parent_id, Arc::clone(&parent));
        parent
    }

    /// Record a new address for a parent. Last write wins.
    pub fn update_address(handle: &DiscoveredDeviceParent, address: IpAddr) {
        let mut current = handle.address.write();
        if *current != address {
            info!(
                "Device parent {} moved from {} to {}",
                handle.name, *current, address
            );
            *current = address;
        }
    }

    pub fn remote_address(handle: &DiscoveredDeviceParent) -> IpAddr {
        handle.remote_address()
    }

    /// Remember a child device discovered under `handle`.
    pub fn add_child(handle: &DiscoveredDeviceParent, device_name: &str) {
        let mut children = handle.children.write();
        if !children.iter().any(|c| c == device_name) {
            debug!("Device {} belongs to parent {}", device_name, handle.name);
            children.push(device_name.to_string());
            children.sort();
        }
    }

    pub fn parent(&self, parent_id: u32) -> Option<ParentHandle> {
        self.parents.read().get(&parent_id).cloned()
    }

    /// Tracked parents ordered by id.
    pub fn parents(&self) -> Vec<ParentHandle> {
        self.parents.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_track_defaults_to_loopback() {
        let tracker = DiscoveryTracker::new();
        let parent = tracker.track_parent("HDHR-1013ABCD", 0x1013_abcd, None);
        assert!(parent.remote_address().is_loopback());
        assert_eq!(parent.name(), "HDHR-1013ABCD");
        assert_eq!(parent.parent_id(), 0x1013_abcd);
    }

    #[test]
    fn test_update_address_last_write_wins() {
        let tracker = DiscoveryTracker::new();
        let parent = tracker.track_parent("Prime", 7, Some(ip("192.168.1.20")));

        DiscoveryTracker::update_address(&parent, ip("192.168.1.21"));
        DiscoveryTracker::update_address(&parent, ip("192.168.1.21"));
        assert_eq!(DiscoveryTracker::remote_address(&parent), ip("192.168.1.21"));

        DiscoveryTracker::update_address(&parent, ip("10.0.0.5"));
        assert_eq!(parent.remote_address(), ip("10.0.0.5"));
    }

    #[test]
    fn test_retrack_returns_same_handle() {
        let tracker = DiscoveryTracker::new();
        let first = tracker.track_parent("Prime", 7, Some(ip("192.168.1.20")));
        let second = tracker.track_parent("Prime", 7, Some(ip("192.168.1.30")));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.remote_address(), ip("192.168.1.30"));

        // Unknown address keeps the last known one.
        let third = tracker.track_parent("Prime", 7, None);
        assert_eq!(third.remote_address(), ip("192.168.1.30"));
        assert_eq!(tracker.parents().len(), 1);
    }

    #[test]
    fn test_children_are_unique_and_sorted() {
        let tracker = DiscoveryTracker::new();
        let parent = tracker.track_parent("Prime", 7, None);
        DiscoveryTracker::add_child(&parent, "Prime-2");
        DiscoveryTracker::add_child(&parent, "Prime-0");
        DiscoveryTracker::add_child(&parent, "Prime-2");

        let status = ParentStatus::from(tracker.parent(7).unwrap().as_ref());
        assert_eq!(status.children, vec!["Prime-0", "Prime-2"]);
    }
}
