//! Virtual tuner core: capture device registry and pooling.
//!
//! This crate keeps track of capture devices that come and go on the
//! network, builds them from deferred recipes, groups them into named
//! pools and hands out the best available device for a tuning request.
//!
//! # Components
//!
//! - [`DescriptorFactory`]: named constructors and unloaded descriptors
//! - [`DiscoveryTracker`]: network parents and their addresses
//! - [`DeviceRegistry`]: loaded devices keyed by name
//! - [`PoolManager`]: merit-ranked selection, locking and alias bindings
//! - [`TunerContext`]: the process-wide object wiring them together
//!
//! # Example
//!
//! ```rust
//! use vtuner_core::{
//!     ArgKind, CaptureDevice, ConstructionRecipe, DeviceAttributes, DeviceSettings,
//!     TunerContext, TuningRequest,
//! };
//!
//! struct Tuner {
//!     name: String,
//!     attributes: DeviceAttributes,
//! }
//!
//! impl CaptureDevice for Tuner {
//!     fn name(&self) -> &str { &self.name }
//!     fn implementation(&self) -> &str { "demo" }
//!     fn attributes(&self) -> &DeviceAttributes { &self.attributes }
//! }
//!
//! let context = TunerContext::new(true);
//! context.factory().register_implementation("demo", vec![ArgKind::Str], |args| {
//!     Ok(Box::new(Tuner {
//!         name: args.str(0)?.to_string(),
//!         attributes: DeviceAttributes::new("US-Cable"),
//!     }))
//! });
//!
//! for (name, merit) in [("HDHR-1", 10), ("HDHR-2", 20)] {
//!     let settings = DeviceSettings { pool: Some("Cable".into()), merit: Some(merit) };
//!     context.configure_device(name, settings).unwrap();
//!     context.register(name, ConstructionRecipe::new("demo", vec![name.into()]), false).unwrap();
//!     context.load_descriptor(name).unwrap();
//! }
//!
//! let selection = context.select(&TuningRequest::new("Tuner A").in_pool("Cable")).unwrap();
//! assert_eq!(selection.device.name(), "HDHR-2");
//! context.release("Tuner A").unwrap();
//! ```

pub mod context;
pub mod descriptor;
pub mod device;
pub mod discovery;
pub mod error;
pub mod factory;
pub mod pool;
pub mod registry;

pub use context::TunerContext;
pub use descriptor::{ArgKind, CaptureDeviceDescriptor, ConstructionRecipe, RecipeArg, RecipeArgs};
pub use device::{CaptureDevice, DeviceAttributes, DeviceHandle, DeviceStatus};
pub use discovery::{DiscoveredDeviceParent, DiscoveryTracker, ParentHandle, ParentStatus};
pub use error::{CaptureError, InstantiationError, Result};
pub use factory::{DescriptorFactory, DeviceConstructor};
pub use pool::{AliasBinding, DeviceSettings, PoolManager, Reconfigured, Selection, TuningRequest};
pub use registry::DeviceRegistry;
