//! Registry of loaded capture devices.
//!
//! The registry is the single owner of every live device. Lookups go through
//! the name map; status enumeration reads a prebuilt snapshot that is swapped
//! on every mutation, so readers never wait on a load or unload in progress.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info};
use parking_lot::RwLock;

use crate::device::DeviceHandle;
use crate::error::{CaptureError, Result};

/// Authoritative table of loaded devices, keyed by unique name.
pub struct DeviceRegistry {
    devices: RwLock<BTreeMap<String, DeviceHandle>>,
    /// Name-ordered copy of `devices`, republished after each mutation.
    snapshot: RwLock<Arc<[DeviceHandle]>>,
    generation: AtomicU64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(BTreeMap::new()),
            snapshot: RwLock::new(Arc::from(Vec::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Make a fully constructed device visible.
    pub fn load_device(&self, device: DeviceHandle) -> Result<()> {
        let name = device.name().to_string();
        let mut devices = self.devices.write();

        if devices.contains_key(&name) {
            debug!("Refusing to load {}: already loaded", name);
            return Err(CaptureError::DuplicateName(name));
        }

        devices.insert(name.clone(), device);
        self.publish(&devices);
        info!("Loaded capture device {}", name);
        Ok(())
    }

    /// Remove a device. The returned handle is the last registry-held reference.
    pub fn unload_device(&self, name: &str) -> Result<DeviceHandle> {
        let mut devices = self.devices.write();
        let removed = devices
            .remove(name)
            .ok_or_else(|| CaptureError::NotFound(name.to_string()))?;
        self.publish(&devices);
        info!("Unloaded capture device {}", name);
        Ok(removed)
    }

    pub fn get_device(&self, name: &str) -> Result<DeviceHandle> {
        self.devices
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CaptureError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.devices.read().contains_key(name)
    }

    /// Name-ordered point-in-time view of every loaded device.
    pub fn list_all_sorted(&self) -> Arc<[DeviceHandle]> {
        Arc::clone(&self.snapshot.read())
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Incremented on every load and unload.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    // Called with the `devices` write lock held so snapshots publish in mutation order.
    fn publish(&self, devices: &BTreeMap<String, DeviceHandle>) {
        let snapshot: Arc<[DeviceHandle]> = devices.values().cloned().collect();
        *self.snapshot.write() = snapshot;
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
