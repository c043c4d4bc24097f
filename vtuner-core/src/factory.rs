//! Descriptor factory: named constructors plus the set of unloaded descriptors.
//!
//! Device types register a constructor under an implementation tag together
//! with the parameter kinds it expects. Discovery code then registers
//! descriptors naming that tag, and the factory builds devices from them on
//! demand. Nothing here touches the registry's contents or the pools; loading
//! the constructed device is the caller's job.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::RwLock;

use crate::descriptor::{ArgKind, CaptureDeviceDescriptor, ConstructionRecipe, RecipeArgs};
use crate::device::{CaptureDevice, DeviceHandle};
use crate::error::{CaptureError, InstantiationError, Result};
use crate::registry::DeviceRegistry;

/// Constructor for one device implementation.
pub type DeviceConstructor = Arc<
    dyn Fn(RecipeArgs<'_>) -> std::result::Result<Box<dyn CaptureDevice>, InstantiationError>
        + Send
        + Sync,
>;

#[derive(Clone)]
struct DeviceImplementation {
    params: Vec<ArgKind>,
    constructor: DeviceConstructor,
}

/// Holds deferred construction recipes and turns them into live devices.
pub struct DescriptorFactory {
    implementations: RwLock<HashMap<String, DeviceImplementation>>,
    unloaded: RwLock<BTreeMap<String, CaptureDeviceDescriptor>>,
    registry: Arc<DeviceRegistry>,
}

impl DescriptorFactory {
    /// Create a factory that checks names against `registry`.
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            implementations: RwLock::new(HashMap::new()),
            unloaded: RwLock::new(BTreeMap::new()),
            registry,
        }
    }

    /// Register (or replace) the constructor for an implementation tag.
    pub fn register_implementation<F>(&self, tag: &str, params: Vec<ArgKind>, constructor: F)
    where
        F: Fn(RecipeArgs<'_>) -> std::result::Result<Box<dyn CaptureDevice>, InstantiationError>
            + Send
            + Sync
            + 'static,
    {
        let implementation = DeviceImplementation {
            params,
            constructor: Arc::new(constructor),
        };
        if self
            .implementations
            .write()
            .insert(tag.to_string(), implementation)
            .is_some()
        {
            warn!("Replaced device implementation {}", tag);
        } else {
            debug!("Registered device implementation {}", tag);
        }
    }

    /// Registered implementation tags, sorted.
    pub fn implementation_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.implementations.read().keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Record a recipe for a device that is not loaded yet.
    ///
    /// Arguments are not checked here; a bad recipe only fails at `instantiate`.
    pub fn register(
        &self,
        name: &str,
        recipe: ConstructionRecipe,
        persistent: bool,
    ) -> Result<CaptureDeviceDescriptor> {
        let mut unloaded = self.unloaded.write();

        if unloaded.contains_key(name) || self.registry.contains(name) {
            return Err(CaptureError::DuplicateName(name.to_string()));
        }

        let descriptor = CaptureDeviceDescriptor::new(name, recipe, persistent);
        unloaded.insert(name.to_string(), descriptor.clone());
        info!(
            "Registered descriptor {} ({}, persistent={})",
            name, descriptor.recipe.implementation, persistent
        );
        Ok(descriptor)
    }

    /// Build a device from `descriptor`.
    ///
    /// A non-persistent descriptor is consumed on success; instantiating it a
    /// second time reports `NotFound`.
    pub fn instantiate(&self, descriptor: &CaptureDeviceDescriptor) -> Result<DeviceHandle> {
        if !self.unloaded.read().contains_key(&descriptor.name) {
            return Err(CaptureError::NotFound(descriptor.name.clone()));
        }

        let recipe = &descriptor.recipe;
        let implementation = self
            .implementations
            .read()
            .get(&recipe.implementation)
            .cloned()
            .ok_or_else(|| InstantiationError::UnknownImplementation(recipe.implementation.clone()))?;

        check_arguments(recipe, &implementation.params)?;

        let device = (implementation.constructor)(RecipeArgs::new(&recipe.implementation, &recipe.args))?;

        if device.name().is_empty() {
            return Err(InstantiationError::CapabilityCheck(format!(
                "{} produced a device without a name",
                recipe.implementation
            ))
            .into());
        }
        if device.name() != descriptor.name {
            return Err(InstantiationError::CapabilityCheck(format!(
                "{} produced device {} for descriptor {}",
                recipe.implementation,
                device.name(),
                descriptor.name
            ))
            .into());
        }

        if !descriptor.persistent {
            // Two callers may race to build the same descriptor; only one consumes it.
            if self.unloaded.write().remove(&descriptor.name).is_none() {
                return Err(CaptureError::NotFound(descriptor.name.clone()));
            }
        }

        debug!("Instantiated {} from {}", descriptor.name, recipe.implementation);
        Ok(Arc::from(device))
    }

    /// Look up a descriptor by name and build it.
    pub fn instantiate_named(&self, name: &str) -> Result<DeviceHandle> {
        let descriptor = self.descriptor(name)?;
        self.instantiate(&descriptor)
    }

    pub fn descriptor(&self, name: &str) -> Result<CaptureDeviceDescriptor> {
        self.unloaded
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CaptureError::NotFound(name.to_string()))
    }

    /// Drop a descriptor that was never loaded.
    pub fn forget(&self, name: &str) -> Result<CaptureDeviceDescriptor> {
        let removed = self
            .unloaded
            .write()
            .remove(name)
            .ok_or_else(|| CaptureError::NotFound(name.to_string()))?;
        info!("Forgot descriptor {}", name);
        Ok(removed)
    }

    /// Whether a persistent recipe is retained for `name`.
    pub fn is_retained(&self, name: &str) -> bool {
        self.unloaded
            .read()
            .get(name)
            .map(|d| d.persistent)
            .unwrap_or(false)
    }

    /// Descriptors available for instantiation, in descriptor order.
    ///
    /// Retained persistent descriptors whose device is currently loaded are
    /// left out.
    pub fn unloaded_sorted(&self) -> Vec<CaptureDeviceDescriptor> {
        let mut list: Vec<_> = self
            .unloaded
            .read()
            .values()
            .filter(|d| !self.registry.contains(&d.name))
            .cloned()
            .collect();
        list.sort();
        list
    }
}

fn check_arguments(
    recipe: &ConstructionRecipe,
    params: &[ArgKind],
) -> std::result::Result<(), InstantiationError> {
    if recipe.args.len() != params.len() {
        return Err(InstantiationError::ArityMismatch {
            implementation: recipe.implementation.clone(),
            expected: params.len(),
            actual: recipe.args.len(),
        });
    }

    for (index, (arg, expected)) in recipe.args.iter().zip(params).enumerate() {
        if arg.kind() != *expected {
            return Err(InstantiationError::ArgumentType {
                implementation: recipe.implementation.clone(),
                index,
                expected: expected.name(),
                actual: arg.kind().name(),
            });
        }
    }

    Ok(())
}
