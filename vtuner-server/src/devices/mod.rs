//! Capture device implementations served by this process.
//!
//! - [`HttpTuner`]: one tuner of a network tuner box, streamed over HTTP
//! - [`SoftwareDevice`]: a file-backed device used for offline scans

pub mod http;
pub mod software;

use std::sync::Arc;

use vtuner_core::{CaptureError, ConstructionRecipe, TunerContext};

pub use http::HttpTuner;
pub use software::SoftwareDevice;

/// Register every implementation tag with the context's factory.
pub fn register_implementations(context: &TunerContext) {
    let tracker = context.discovery_tracker();
    context.factory().register_implementation(
        http::IMPLEMENTATION,
        http::PARAMS.to_vec(),
        move |args| HttpTuner::construct(&tracker, args),
    );
    context.factory().register_implementation(
        software::IMPLEMENTATION,
        software::PARAMS.to_vec(),
        SoftwareDevice::construct,
    );
}

/// Register and load a tuner, skipping one that is already loaded.
///
/// Returns `Ok(false)` when the device was already loaded.
pub fn ensure_loaded(
    context: &Arc<TunerContext>,
    name: &str,
    recipe: ConstructionRecipe,
    persistent: bool,
) -> vtuner_core::Result<bool> {
    if context.registry().contains(name) {
        return Ok(false);
    }
    match context.register(name, recipe, persistent) {
        Ok(_) => {}
        // Left behind by an earlier failed load, or a retained persistent one.
        Err(CaptureError::DuplicateName(_)) if context.factory().descriptor(name).is_ok() => {}
        Err(e) => return Err(e),
    }
    match context.load_descriptor(name) {
        Ok(_) => Ok(true),
        // Lost the race with another worker.
        Err(CaptureError::DuplicateName(_)) => Ok(false),
        Err(e) => Err(e),
    }
}
