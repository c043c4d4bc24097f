//! File-backed capture device.
//!
//! Software devices replay a transport stream from disk. They never switch
//! channels on their own and are always available for offline scans.

use std::path::{Path, PathBuf};

use vtuner_core::{
    ArgKind, CaptureDevice, ConstructionRecipe, DeviceAttributes, InstantiationError, RecipeArgs,
};

pub const IMPLEMENTATION: &str = "software";

/// name, source path, channel lineup.
pub const PARAMS: [ArgKind; 3] = [ArgKind::Str, ArgKind::Str, ArgKind::Str];

pub fn recipe(name: &str, source: &str, lineup: &str) -> ConstructionRecipe {
    ConstructionRecipe::new(IMPLEMENTATION, vec![name.into(), source.into(), lineup.into()])
}

#[derive(Debug)]
pub struct SoftwareDevice {
    name: String,
    source: PathBuf,
    attributes: DeviceAttributes,
}

impl SoftwareDevice {
    pub fn construct(args: RecipeArgs<'_>) -> Result<Box<dyn CaptureDevice>, InstantiationError> {
        let name = args.str(0)?;
        let source = args.str(1)?;
        let lineup = args.str(2)?;

        if source.trim().is_empty() {
            return Err(InstantiationError::Construction(format!(
                "software device {} has no source",
                name
            )));
        }

        Ok(Box::new(SoftwareDevice {
            name: name.to_string(),
            source: PathBuf::from(source),
            attributes: DeviceAttributes::new(lineup).with_offline_scan(true),
        }))
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

impl CaptureDevice for SoftwareDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn implementation(&self) -> &str {
        IMPLEMENTATION
    }

    fn attributes(&self) -> &DeviceAttributes {
        &self.attributes
    }
}
