//! Capture device capability surface.
//!
//! Device-type implementations (network tuners, software sources, ...) live
//! outside this crate. They implement [`CaptureDevice`] and usually embed a
//! [`DeviceAttributes`] block, which carries the state the registry and pool
//! manager read and write.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

/// Shared handle to a loaded device. The registry owns the only long-lived copy.
pub type DeviceHandle = Arc<dyn CaptureDevice>;

/// Mutable per-device state shared by every implementation.
#[derive(Debug, Default)]
pub struct DeviceAttributes {
    locked: AtomicBool,
    external_locked: AtomicBool,
    merit: AtomicI32,
    recorded_bytes: AtomicU64,
    offline_scan_enabled: AtomicBool,
    text: RwLock<TextAttributes>,
}

#[derive(Debug, Default, Clone)]
struct TextAttributes {
    pool_name: Option<String>,
    channel_lineup: String,
    last_channel: Option<String>,
    recording_path: Option<String>,
}

impl DeviceAttributes {
    /// Create attributes for a device on the given channel lineup.
    pub fn new(channel_lineup: impl Into<String>) -> Self {
        let attrs = Self::default();
        attrs.text.write().channel_lineup = channel_lineup.into();
        attrs
    }

    /// Builder-style toggle for offline channel scanning.
    pub fn with_offline_scan(self, enabled: bool) -> Self {
        self.offline_scan_enabled.store(enabled, Ordering::SeqCst);
        self
    }

    /// Atomically set the lock flag. Returns false if it was already set.
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Clear the lock flag. Returns whether the flag was set.
    pub fn unlock(&self) -> bool {
        self.locked.swap(false, Ordering::AcqRel)
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn is_external_locked(&self) -> bool {
        self.external_locked.load(Ordering::Acquire)
    }

    /// Written by whatever observes the out-of-process lock holder.
    pub fn set_external_locked(&self, locked: bool) {
        self.external_locked.store(locked, Ordering::Release);
    }

    pub fn merit(&self) -> i32 {
        self.merit.load(Ordering::Acquire)
    }

    pub fn set_merit(&self, merit: i32) {
        self.merit.store(merit, Ordering::Release);
    }

    pub fn recorded_bytes(&self) -> u64 {
        self.recorded_bytes.load(Ordering::Acquire)
    }

    /// Account for bytes written by the streaming side.
    pub fn add_recorded_bytes(&self, bytes: u64) {
        self.recorded_bytes.fetch_add(bytes, Ordering::AcqRel);
    }

    pub fn offline_scan_enabled(&self) -> bool {
        self.offline_scan_enabled.load(Ordering::Acquire)
    }

    pub fn pool_name(&self) -> Option<String> {
        self.text.read().pool_name.clone()
    }

    /// Empty names are stored as "no pool".
    pub fn set_pool_name(&self, pool_name: Option<String>) {
        self.text.write().pool_name = pool_name.filter(|p| !p.is_empty());
    }

    pub fn channel_lineup(&self) -> String {
        self.text.read().channel_lineup.clone()
    }

    pub fn set_channel_lineup(&self, lineup: impl Into<String>) {
        self.text.write().channel_lineup = lineup.into();
    }

    pub fn last_channel(&self) -> Option<String> {
        self.text.read().last_channel.clone()
    }

    pub fn set_last_channel(&self, channel: Option<String>) {
        self.text.write().last_channel = channel;
    }

    pub fn recording_path(&self) -> Option<String> {
        self.text.read().recording_path.clone()
    }

    /// Setting a new destination restarts the byte counter.
    pub fn set_recording_path(&self, path: Option<String>) {
        self.text.write().recording_path = path;
        self.recorded_bytes.store(0, Ordering::Release);
    }
}

/// Capability surface of a tunable capture device.
///
/// Only `name` and `attributes` are required; everything else delegates to
/// the embedded [`DeviceAttributes`] unless an implementation knows better.
pub trait CaptureDevice: Send + Sync {
    /// Unique, immutable device name.
    fn name(&self) -> &str;

    /// Implementation tag this device was built from.
    fn implementation(&self) -> &str;

    fn attributes(&self) -> &DeviceAttributes;

    /// Whether the device can change channel without being restarted.
    fn can_switch(&self) -> bool {
        false
    }

    fn try_lock(&self) -> bool {
        self.attributes().try_lock()
    }

    fn unlock(&self) -> bool {
        self.attributes().unlock()
    }

    fn is_locked(&self) -> bool {
        self.attributes().is_locked()
    }

    fn is_external_locked(&self) -> bool {
        self.attributes().is_external_locked()
    }

    fn pool_name(&self) -> Option<String> {
        self.attributes().pool_name()
    }

    fn set_pool_name(&self, pool_name: Option<String>) {
        self.attributes().set_pool_name(pool_name)
    }

    fn merit(&self) -> i32 {
        self.attributes().merit()
    }

    fn set_merit(&self, merit: i32) {
        self.attributes().set_merit(merit)
    }

    fn channel_lineup(&self) -> String {
        self.attributes().channel_lineup()
    }

    fn set_channel_lineup(&self, lineup: &str) {
        self.attributes().set_channel_lineup(lineup)
    }

    fn last_channel(&self) -> Option<String> {
        self.attributes().last_channel()
    }

    fn set_last_channel(&self, channel: Option<String>) {
        self.attributes().set_last_channel(channel)
    }

    fn recording_path(&self) -> Option<String> {
        self.attributes().recording_path()
    }

    fn set_recording_path(&self, path: Option<String>) {
        self.attributes().set_recording_path(path)
    }

    fn recorded_bytes(&self) -> u64 {
        self.attributes().recorded_bytes()
    }

    fn is_offline_scan_enabled(&self) -> bool {
        self.attributes().offline_scan_enabled()
    }
}

impl std::fmt::Debug for dyn CaptureDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureDevice")
            .field("name", &self.name())
            .field("implementation", &self.implementation())
            .field("pool", &self.pool_name())
            .field("merit", &self.merit())
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Point-in-time view of a device for status reporting.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeviceStatus {
    pub name: String,
    pub implementation: String,
    pub pool_name: Option<String>,
    pub merit: i32,
    pub locked: bool,
    pub external_locked: bool,
    pub channel_lineup: String,
    pub last_channel: Option<String>,
    pub recording_path: Option<String>,
    pub recorded_bytes: u64,
    pub offline_scan_enabled: bool,
    pub can_switch: bool,
}

impl DeviceStatus {
    pub fn capture(device: &dyn CaptureDevice) -> Self {
        Self {
            name: device.name().to_string(),
            implementation: device.implementation().to_string(),
            pool_name: device.pool_name(),
            merit: device.merit(),
            locked: device.is_locked(),
            external_locked: device.is_external_locked(),
            channel_lineup: device.channel_lineup(),
            last_channel: device.last_channel(),
            recording_path: device.recording_path(),
            recorded_bytes: device.recorded_bytes(),
            offline_scan_enabled: device.is_offline_scan_enabled(),
            can_switch: device.can_switch(),
        }
    }
}
