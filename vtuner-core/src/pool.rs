//! Pool manager: merit-ranked selection of loaded devices.
//!
//! Devices that share a pool name are interchangeable from the recording
//! engine's point of view. A tuning request for a virtual tuner alias is
//! resolved to the best unlocked member of its pool, which is locked and
//! bound to the alias until released.
//!
//! All index state lives behind one mutex. Gathering candidates, picking
//! the winner, locking it and recording the binding happen while that mutex
//! is held, so two requests can never pick the same device. The mutex is
//! never held across I/O.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::device::DeviceHandle;
use crate::error::{CaptureError, Result};
use crate::registry::DeviceRegistry;

/// A request to tune a virtual tuner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningRequest {
    /// Virtual tuner alias the consumer addresses.
    pub alias: String,
    /// Explicit pool; when absent the pool is resolved from the alias.
    #[serde(default)]
    pub pool: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub recording_path: Option<String>,
}

impl TuningRequest {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            ..Self::default()
        }
    }

    pub fn in_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn recording_path(mut self, path: impl Into<String>) -> Self {
        self.recording_path = Some(path.into());
        self
    }
}

/// Outcome of a successful selection.
#[derive(Debug, Clone)]
pub struct Selection {
    pub alias: String,
    pub device: DeviceHandle,
    /// Pool the device was chosen from; `None` for direct resolution.
    pub pool: Option<String>,
    /// The alias was already bound and kept its device.
    pub retuned: bool,
}

/// Alias to device binding, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AliasBinding {
    pub alias: String,
    pub device: String,
}

/// Pool and merit settings for a device.
///
/// `pool = Some("")` takes the device out of every pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default)]
    pub pool: Option<String>,
    #[serde(default)]
    pub merit: Option<i32>,
}

impl DeviceSettings {
    fn merge(&mut self, newer: DeviceSettings) {
        if newer.pool.is_some() {
            self.pool = newer.pool;
        }
        if newer.merit.is_some() {
            self.merit = newer.merit;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_none() && self.merit.is_none()
    }
}

/// Whether a reconfiguration took effect immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reconfigured {
    Applied,
    /// The device is in use; the change applies on release.
    Deferred,
}

#[derive(Debug, Default)]
struct PoolIndex {
    use_pools: bool,
    /// Pool name to member device names.
    members: BTreeMap<String, BTreeSet<String>>,
    /// Device name to its single pool.
    device_pool: HashMap<String, String>,
    /// Alias to bound device name.
    bindings: BTreeMap<String, String>,
    /// Device name to the alias holding it.
    device_alias: HashMap<String, String>,
    pending: HashMap<String, DeviceSettings>,
    /// Configured alias to pool mapping.
    virtual_tuners: HashMap<String, String>,
}

impl PoolIndex {
    fn set_membership(&mut self, device: &str, pool: Option<String>) {
        if let Some(old) = self.device_pool.remove(device) {
            if let Some(set) = self.members.get_mut(&old) {
                set.remove(device);
                if set.is_empty() {
                    self.members.remove(&old);
                }
            }
        }
        if let Some(pool) = pool.filter(|p| !p.is_empty()) {
            self.members
                .entry(pool.clone())
                .or_default()
                .insert(device.to_string());
            self.device_pool.insert(device.to_string(), pool);
        }
    }

    fn bind(&mut self, alias: &str, device: &str) {
        self.bindings.insert(alias.to_string(), device.to_string());
        self.device_alias.insert(device.to_string(), alias.to_string());
    }
}

/// Groups loaded devices into pools and arbitrates exclusive use.
pub struct PoolManager {
    registry: Arc<DeviceRegistry>,
    state: Mutex<PoolIndex>,
}

impl PoolManager {
    pub fn new(registry: Arc<DeviceRegistry>, use_pools: bool) -> Self {
        Self {
            registry,
            state: Mutex::new(PoolIndex {
                use_pools,
                ..PoolIndex::default()
            }),
        }
    }

    pub fn use_pools(&self) -> bool {
        self.state.lock().use_pools
    }

    pub fn set_use_pools(&self, use_pools: bool) {
        let mut state = self.state.lock();
        if state.use_pools != use_pools {
            info!("Pooling {}", if use_pools { "enabled" } else { "disabled" });
            state.use_pools = use_pools;
        }
    }

    /// Map a virtual tuner alias to a pool.
    pub fn set_virtual_tuner(&self, alias: &str, pool: &str) {
        self.state
            .lock()
            .virtual_tuners
            .insert(alias.to_string(), pool.to_string());
    }

    /// Index a freshly loaded device under its current pool name.
    pub fn add_device(&self, device: &DeviceHandle) {
        let mut state = self.state.lock();
        let pool = device.pool_name();
        debug!("Indexing {} in pool {:?}", device.name(), pool);
        state.set_membership(device.name(), pool);
    }

    /// Drop a device from the index, releasing any binding it holds.
    pub fn remove_device(&self, name: &str) {
        let mut state = self.state.lock();
        state.set_membership(name, None);
        state.pending.remove(name);

        if let Some(alias) = state.device_alias.remove(name) {
            state.bindings.remove(&alias);
            warn!("Device {} removed while bound to {}", name, alias);
            if let Ok(device) = self.registry.get_device(name) {
                device.unlock();
                device.set_recording_path(None);
            }
        }
    }

    /// Resolve, lock and bind a device for `request`.
    pub fn select(&self, request: &TuningRequest) -> Result<Selection> {
        let mut state = self.state.lock();

        if let Some(bound) = state.bindings.get(&request.alias).cloned() {
            return self.retune(request, &bound);
        }

        if !state.use_pools {
            return self.select_direct(&mut state, request);
        }

        let pool = match self.resolve_pool(&state, request) {
            Some(pool) => pool,
            // Unpooled device named by the alias.
            None => return self.select_direct(&mut state, request),
        };

        let device = self.best_candidate(&state, &pool)?;

        if let Some(holder) = state.device_alias.get(device.name()) {
            return Err(self.violation(format!(
                "{} is unlocked but still bound to {}",
                device.name(),
                holder
            )));
        }
        if !device.try_lock() {
            return Err(self.violation(format!(
                "{} was eligible in pool {} but is already locked",
                device.name(),
                pool
            )));
        }

        state.bind(&request.alias, device.name());
        record_request(&device, request);
        info!(
            "Bound {} to {} from pool {} (merit {})",
            request.alias,
            device.name(),
            pool,
            device.merit()
        );

        Ok(Selection {
            alias: request.alias.clone(),
            device,
            pool: Some(pool),
            retuned: false,
        })
    }

    /// Unlock the device bound to `alias` and destroy the binding.
    pub fn release(&self, alias: &str) -> Result<DeviceHandle> {
        let mut state = self.state.lock();

        let name = state
            .bindings
            .remove(alias)
            .ok_or_else(|| CaptureError::NotFound(alias.to_string()))?;
        state.device_alias.remove(&name);

        let device = match self.registry.get_device(&name) {
            Ok(device) => device,
            Err(_) => {
                return Err(self.violation(format!(
                    "{} was bound to {} but is not loaded",
                    alias, name
                )))
            }
        };

        device.set_recording_path(None);
        if !device.unlock() {
            return Err(self.violation(format!(
                "{} was bound to {} but not locked",
                alias, name
            )));
        }

        if let Some(pending) = state.pending.remove(&name) {
            apply_settings(&mut state, &device, pending);
        }

        info!("Released {} from {}", name, alias);
        Ok(device)
    }

    /// Change a device's pool or merit.
    ///
    /// A locked device keeps its current settings until it is released.
    pub fn reconfigure(&self, name: &str, settings: DeviceSettings) -> Result<Reconfigured> {
        let mut state = self.state.lock();
        let device = self.registry.get_device(name)?;

        if device.is_locked() {
            debug!("Deferring reconfiguration of {} until release", name);
            state.pending.entry(name.to_string()).or_default().merge(settings);
            return Ok(Reconfigured::Deferred);
        }

        apply_settings(&mut state, &device, settings);
        Ok(Reconfigured::Applied)
    }

    /// Settings waiting for `name` to be released.
    pub fn pending_settings(&self, name: &str) -> Option<DeviceSettings> {
        self.state.lock().pending.get(name).cloned()
    }

    pub fn binding(&self, alias: &str) -> Option<String> {
        self.state.lock().bindings.get(alias).cloned()
    }

    pub fn alias_for_device(&self, name: &str) -> Option<String> {
        self.state.lock().device_alias.get(name).cloned()
    }

    pub fn bindings(&self) -> Vec<AliasBinding> {
        self.state
            .lock()
            .bindings
            .iter()
            .map(|(alias, device)| AliasBinding {
                alias: alias.clone(),
                device: device.clone(),
            })
            .collect()
    }

    pub fn pool_names(&self) -> Vec<String> {
        self.state.lock().members.keys().cloned().collect()
    }

    /// Device names indexed under `pool`, whether or not they are loaded.
    pub fn member_names(&self, pool: &str) -> Vec<String> {
        self.state
            .lock()
            .members
            .get(pool)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Loaded members of `pool` in selection order, locked ones included.
    pub fn pool_members(&self, pool: &str) -> Vec<DeviceHandle> {
        let state = self.state.lock();
        let mut members: Vec<DeviceHandle> = state
            .members
            .get(pool)
            .into_iter()
            .flatten()
            .filter_map(|name| self.registry.get_device(name).ok())
            .collect();
        sort_by_merit(&mut members);
        members
    }

    fn resolve_pool(&self, state: &PoolIndex, request: &TuningRequest) -> Option<String> {
        request
            .pool
            .clone()
            .or_else(|| state.virtual_tuners.get(&request.alias).cloned())
            .or_else(|| state.device_pool.get(&request.alias).cloned())
    }

    fn best_candidate(&self, state: &PoolIndex, pool: &str) -> Result<DeviceHandle> {
        // A known pool whose members are all offline is exhausted, not unknown.
        let names = match state.members.get(pool) {
            Some(names) => names,
            None => {
                debug!("Pool {} has no loaded members", pool);
                return Err(CaptureError::NoAvailableDevice(pool.to_string()));
            }
        };

        let mut candidates = Vec::with_capacity(names.len());
        for name in names {
            let device = match self.registry.get_device(name) {
                Ok(device) => device,
                Err(_) => {
                    return Err(self.violation(format!(
                        "pool {} lists {} but it is not loaded",
                        pool, name
                    )))
                }
            };
            if device.pool_name().as_deref() != Some(pool) {
                return Err(self.violation(format!(
                    "pool {} lists {} but the device reports {:?}",
                    pool,
                    name,
                    device.pool_name()
                )));
            }
            if !device.is_locked() && !device.is_external_locked() {
                candidates.push(device);
            }
        }

        sort_by_merit(&mut candidates);
        candidates.into_iter().next().ok_or_else(|| {
            debug!("Pool {} exhausted", pool);
            CaptureError::NoAvailableDevice(pool.to_string())
        })
    }

    fn select_direct(&self, state: &mut PoolIndex, request: &TuningRequest) -> Result<Selection> {
        let device = self.registry.get_device(&request.alias)?;

        // Passthrough ignores the external lock; pooled mode never does.
        if device.is_locked() || (state.use_pools && device.is_external_locked()) {
            debug!("{} requested directly but in use", request.alias);
            return Err(CaptureError::NoAvailableDevice(request.alias.clone()));
        }
        if let Some(holder) = state.device_alias.get(device.name()) {
            return Err(self.violation(format!(
                "{} is unlocked but still bound to {}",
                device.name(),
                holder
            )));
        }
        if !device.try_lock() {
            return Err(self.violation(format!(
                "{} was unlocked but could not be locked",
                device.name()
            )));
        }

        state.bind(&request.alias, device.name());
        record_request(&device, request);
        info!("Bound {} directly", request.alias);

        Ok(Selection {
            alias: request.alias.clone(),
            device,
            pool: None,
            retuned: false,
        })
    }

    fn retune(&self, request: &TuningRequest, bound: &str) -> Result<Selection> {
        let device = match self.registry.get_device(bound) {
            Ok(device) => device,
            Err(_) => {
                return Err(self.violation(format!(
                    "{} is bound to {} but it is not loaded",
                    request.alias, bound
                )))
            }
        };
        if !device.is_locked() {
            return Err(self.violation(format!(
                "{} is bound to {} but the device is unlocked",
                request.alias, bound
            )));
        }

        record_request(&device, request);
        debug!("Retuned {} on {}", request.alias, bound);

        Ok(Selection {
            alias: request.alias.clone(),
            pool: device.pool_name(),
            device,
            retuned: true,
        })
    }

    fn violation(&self, message: String) -> CaptureError {
        error!("Pool invariant violated: {}", message);
        CaptureError::InvariantViolation(message)
    }
}

/// Merit descending, then name ascending.
fn sort_by_merit(devices: &mut [DeviceHandle]) {
    devices.sort_by(|a, b| {
        (Reverse(a.merit()), a.name()).cmp(&(Reverse(b.merit()), b.name()))
    });
}

fn record_request(device: &DeviceHandle, request: &TuningRequest) {
    if request.channel.is_some() {
        device.set_last_channel(request.channel.clone());
    }
    if request.recording_path.is_some() {
        device.set_recording_path(request.recording_path.clone());
    }
}

fn apply_settings(state: &mut PoolIndex, device: &DeviceHandle, settings: DeviceSettings) {
    if let Some(merit) = settings.merit {
        device.set_merit(merit);
    }
    if let Some(pool) = settings.pool {
        let pool = Some(pool).filter(|p| !p.is_empty());
        device.set_pool_name(pool.clone());
        state.set_membership(device.name(), pool);
    }
    info!(
        "{} now in pool {:?} with merit {}",
        device.name(),
        device.pool_name(),
        device.merit()
    );
}
