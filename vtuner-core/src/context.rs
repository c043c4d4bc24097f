//! Process-wide tuner context.
//!
//! One [`TunerContext`] is built at startup and shared by `Arc` with every
//! discovery worker and request handler. It wires the descriptor factory,
//! registry and pool manager together so a device is only ever indexed by
//! the pool manager after it is fully loaded, and dropped from the index
//! before it leaves the registry.
//!
//! Registration, loading, unloading and reconfiguration are serialized by a
//! single lifecycle mutex, so a name is never both a pending descriptor and
//! a loaded device, and the pool index never names an unloaded device.
//! Lock order is lifecycle, then pools or factory, then registry. Selection
//! does not take the lifecycle mutex.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use parking_lot::{Mutex, RwLock};

use crate::descriptor::{CaptureDeviceDescriptor, ConstructionRecipe};
use crate::device::DeviceHandle;
use crate::discovery::DiscoveryTracker;
use crate::error::{CaptureError, Result};
use crate::factory::DescriptorFactory;
use crate::pool::{DeviceSettings, PoolManager, Reconfigured, Selection, TuningRequest};
use crate::registry::DeviceRegistry;

/// Shared state of the tuner virtualization layer.
pub struct TunerContext {
    registry: Arc<DeviceRegistry>,
    factory: DescriptorFactory,
    discovery: Arc<DiscoveryTracker>,
    pools: PoolManager,
    /// Configured pool/merit per device name, applied on every load.
    settings: RwLock<HashMap<String, DeviceSettings>>,
    lifecycle: Mutex<()>,
}

impl TunerContext {
    pub fn new(use_pools: bool) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        Self {
            factory: DescriptorFactory::new(Arc::clone(&registry)),
            discovery: Arc::new(DiscoveryTracker::new()),
            pools: PoolManager::new(Arc::clone(&registry), use_pools),
            registry,
            settings: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn factory(&self) -> &DescriptorFactory {
        &self.factory
    }

    pub fn discovery(&self) -> &DiscoveryTracker {
        &self.discovery
    }

    /// Owned tracker handle for device constructors that follow their parent.
    pub fn discovery_tracker(&self) -> Arc<DiscoveryTracker> {
        Arc::clone(&self.discovery)
    }

    pub fn pools(&self) -> &PoolManager {
        &self.pools
    }

    /// Record a descriptor reported by a discovery worker.
    pub fn register(
        &self,
        name: &str,
        recipe: ConstructionRecipe,
        persistent: bool,
    ) -> Result<CaptureDeviceDescriptor> {
        let _lifecycle = self.lifecycle.lock();
        self.factory.register(name, recipe, persistent)
    }

    /// Instantiate the named descriptor and load the result.
    pub fn load_descriptor(&self, name: &str) -> Result<DeviceHandle> {
        let _lifecycle = self.lifecycle.lock();
        if self.registry.contains(name) {
            return Err(CaptureError::DuplicateName(name.to_string()));
        }
        let descriptor = self.factory.descriptor(name)?;
        let device = self.factory.instantiate(&descriptor)?;
        self.load_locked(device)
    }

    /// Apply configured settings, load, then index a constructed device.
    ///
    /// Fails with `DuplicateName` while a non-persistent descriptor for the
    /// same name is still pending.
    pub fn load_device(&self, device: DeviceHandle) -> Result<DeviceHandle> {
        let _lifecycle = self.lifecycle.lock();
        if let Ok(pending) = self.factory.descriptor(device.name()) {
            if !pending.persistent {
                return Err(CaptureError::DuplicateName(device.name().to_string()));
            }
        }
        self.load_locked(device)
    }

    fn load_locked(&self, device: DeviceHandle) -> Result<DeviceHandle> {
        if let Some(settings) = self.settings.read().get(device.name()) {
            if let Some(pool) = &settings.pool {
                device.set_pool_name(Some(pool.clone()));
            }
            if let Some(merit) = settings.merit {
                device.set_merit(merit);
            }
        }

        self.registry.load_device(Arc::clone(&device))?;
        self.pools.add_device(&device);
        Ok(device)
    }

    /// Remove a device from the pools and the registry.
    pub fn unload_device(&self, name: &str) -> Result<DeviceHandle> {
        let _lifecycle = self.lifecycle.lock();
        if !self.registry.contains(name) {
            return Err(CaptureError::NotFound(name.to_string()));
        }
        self.pools.remove_device(name);
        let device = self.registry.unload_device(name)?;

        if self.factory.is_retained(name) {
            info!("{} can be reloaded from its persistent descriptor", name);
        }
        Ok(device)
    }

    /// Store settings for `name` and apply them if the device is loaded.
    ///
    /// Returns `None` when the device is not loaded yet; the settings are
    /// applied when it is.
    pub fn configure_device(&self, name: &str, settings: DeviceSettings) -> Result<Option<Reconfigured>> {
        if settings.is_empty() {
            return Ok(None);
        }

        let _lifecycle = self.lifecycle.lock();
        {
            let mut stored = self.settings.write();
            let entry = stored.entry(name.to_string()).or_default();
            if settings.pool.is_some() {
                entry.pool = settings.pool.clone();
            }
            if settings.merit.is_some() {
                entry.merit = settings.merit;
            }
        }

        match self.pools.reconfigure(name, settings) {
            Ok(result) => Ok(Some(result)),
            Err(CaptureError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Violations are already logged by the pool manager.
    pub fn select(&self, request: &TuningRequest) -> Result<Selection> {
        self.pools.select(request)
    }

    pub fn release(&self, alias: &str) -> Result<DeviceHandle> {
        self.pools.release(alias)
    }

    pub fn list_all_sorted(&self) -> Arc<[DeviceHandle]> {
        self.registry.list_all_sorted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ArgKind;
    use crate::device::{CaptureDevice, DeviceAttributes};
    use std::sync::Barrier;
    use std::thread;

    struct SoftDevice {
        name: String,
        attributes: DeviceAttributes,
    }

    impl CaptureDevice for SoftDevice {
        fn name(&self) -> &str {
            &self.name
        }

        fn implementation(&self) -> &str {
            "soft"
        }

        fn attributes(&self) -> &DeviceAttributes {
            &self.attributes
        }
    }

    fn context(use_pools: bool) -> TunerContext {
        let context = TunerContext::new(use_pools);
        context
            .factory()
            .register_implementation("soft", vec![ArgKind::Str, ArgKind::Str], |args| {
                Ok(Box::new(SoftDevice {
                    name: args.str(0)?.to_string(),
                    attributes: DeviceAttributes::new(args.str(1)?),
                }))
            });
        context
    }

    fn recipe(name: &str) -> ConstructionRecipe {
        ConstructionRecipe::new("soft", vec![name.into(), "Local".into()])
    }

    fn soft(name: &str) -> DeviceHandle {
        Arc::new(SoftDevice {
            name: name.to_string(),
            attributes: DeviceAttributes::new("Local"),
        })
    }

    fn settings(pool: &str, merit: i32) -> DeviceSettings {
        DeviceSettings {
            pool: Some(pool.into()),
            merit: Some(merit),
        }
    }

    #[test]
    fn test_configured_settings_applied_on_load() {
        let context = context(true);
        context
            .configure_device(
                "HDHR-1",
                DeviceSettings {
                    pool: Some("Cable".into()),
                    merit: Some(10),
                },
            )
            .unwrap();
        context.register("HDHR-1", recipe("HDHR-1"), false).unwrap();
        let device = context.load_descriptor("HDHR-1").unwrap();

        assert_eq!(device.pool_name().as_deref(), Some("Cable"));
        assert_eq!(device.merit(), 10);
        assert_eq!(context.pools().pool_names(), vec!["Cable"]);
    }

    #[test]
    fn test_persistent_round_trip() {
        let context = context(true);
        context
            .configure_device(
                "File-1",
                DeviceSettings {
                    pool: Some("Files".into()),
                    merit: Some(3),
                },
            )
            .unwrap();
        context.register("File-1", recipe("File-1"), true).unwrap();

        let first = context.load_descriptor("File-1").unwrap();
        assert!(matches!(
            context.load_descriptor("File-1"),
            Err(CaptureError::DuplicateName(_))
        ));
        context.unload_device("File-1").unwrap();
        assert!(context.list_all_sorted().is_empty());

        let second = context.load_descriptor("File-1").unwrap();
        assert_eq!(second.name(), first.name());
        assert_eq!(second.channel_lineup(), first.channel_lineup());
        assert_eq!(second.pool_name(), first.pool_name());
        assert_eq!(second.merit(), first.merit());
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_non_persistent_descriptor_consumed() {
        let context = context(true);
        context.register("HDHR-1", recipe("HDHR-1"), false).unwrap();
        context.load_descriptor("HDHR-1").unwrap();
        context.unload_device("HDHR-1").unwrap();

        assert!(matches!(
            context.load_descriptor("HDHR-1"),
            Err(CaptureError::NotFound(_))
        ));
        // The name is fully free again.
        context.register("HDHR-1", recipe("HDHR-1"), false).unwrap();
    }

    #[test]
    fn test_unload_unknown() {
        let context = context(true);
        assert!(matches!(
            context.unload_device("HDHR-1"),
            Err(CaptureError::NotFound(_))
        ));
    }

    #[test]
    fn test_select_and_release_through_context() {
        let context = context(true);
        for (name, merit) in [("HDHR-1", 10), ("HDHR-2", 20)] {
            context
                .configure_device(
                    name,
                    DeviceSettings {
                        pool: Some("Cable".into()),
                        merit: Some(merit),
                    },
                )
                .unwrap();
            context.register(name, recipe(name), false).unwrap();
            context.load_descriptor(name).unwrap();
        }

        let selection = context
            .select(&TuningRequest::new("Tuner A").in_pool("Cable"))
            .unwrap();
        assert_eq!(selection.device.name(), "HDHR-2");

        // Unloading a bound device releases it.
        context.unload_device("HDHR-2").unwrap();
        assert!(matches!(
            context.release("Tuner A"),
            Err(CaptureError::NotFound(_))
        ));
    }

    #[test]
    fn test_pools_disabled_direct_binding() {
        let context = context(false);
        context.register("HDHR-1", recipe("HDHR-1"), false).unwrap();
        context.load_descriptor("HDHR-1").unwrap();

        let selection = context.select(&TuningRequest::new("HDHR-1")).unwrap();
        assert_eq!(selection.device.name(), "HDHR-1");
        assert_eq!(context.pools().binding("HDHR-1").as_deref(), Some("HDHR-1"));
        context.release("HDHR-1").unwrap();
    }

    #[test]
    fn test_pending_descriptor_blocks_direct_load() {
        let context = context(true);

        // A consumed descriptor registered again under the same name.
        context.register("HDHR-1", recipe("HDHR-1"), false).unwrap();
        let built = context.factory().instantiate_named("HDHR-1").unwrap();
        context.register("HDHR-1", recipe("HDHR-1"), false).unwrap();
        assert!(matches!(
            context.load_device(built),
            Err(CaptureError::DuplicateName(_))
        ));
        assert!(!context.registry().contains("HDHR-1"));

        // A direct load never bypasses a pending descriptor.
        context.register("HDHR-2", recipe("HDHR-2"), false).unwrap();
        assert!(matches!(
            context.load_device(soft("HDHR-2")),
            Err(CaptureError::DuplicateName(_))
        ));
        context.load_descriptor("HDHR-2").unwrap();
        assert!(context.factory().descriptor("HDHR-2").is_err());

        // Once loaded, the name cannot be registered again.
        assert!(matches!(
            context.register("HDHR-2", recipe("HDHR-2"), false),
            Err(CaptureError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_select_reports_violation_unchanged() {
        let context = context(true);
        context.configure_device("HDHR-1", settings("Cable", 10)).unwrap();
        let device = context.load_device(soft("HDHR-1")).unwrap();

        // Pool name changed behind the pool manager's back.
        device.set_pool_name(Some("Antenna".into()));
        assert!(matches!(
            context.select(&TuningRequest::new("Tuner A").in_pool("Cable")),
            Err(CaptureError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_concurrent_lifecycle_keeps_index_consistent() {
        const ROUNDS: i32 = 300;
        let names = ["HDHR-0", "HDHR-1", "HDHR-2"];
        let context = Arc::new(context(true));
        let barrier = Arc::new(Barrier::new(5));
        let mut handles = Vec::new();

        for worker in 0..5 {
            let context = Arc::clone(&context);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                for round in 0..ROUNDS {
                    for name in names {
                        match worker {
                            0 => {
                                let _ = context.load_device(soft(name));
                            }
                            1 => {
                                let _ = context.unload_device(name);
                            }
                            2 => {
                                let pool = if round % 2 == 0 { "Cable" } else { "Antenna" };
                                context.configure_device(name, settings(pool, round)).unwrap();
                            }
                            3 => {
                                if context.register(name, recipe(name), false).is_ok() {
                                    let _ = context.load_descriptor(name);
                                }
                            }
                            _ => {
                                let alias = format!("Tuner {}", round % 2);
                                for pool in ["Cable", "Antenna"] {
                                    match context.select(&TuningRequest::new(alias.as_str()).in_pool(pool)) {
                                        Ok(_) => {
                                            let _ = context.release(&alias);
                                        }
                                        Err(CaptureError::InvariantViolation(message)) => {
                                            panic!("violation during churn: {}", message)
                                        }
                                        Err(_) => {}
                                    }
                                }
                            }
                        }
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        for pool in ["Cable", "Antenna"] {
            let mut loaded: Vec<String> = context
                .list_all_sorted()
                .iter()
                .filter(|d| d.pool_name().as_deref() == Some(pool))
                .map(|d| d.name().to_string())
                .collect();
            loaded.sort();
            assert_eq!(context.pools().member_names(pool), loaded);
        }
        for device in context.list_all_sorted().iter() {
            assert!(
                context.factory().descriptor(device.name()).is_err(),
                "{} is both loaded and pending",
                device.name()
            );
        }
    }
}
