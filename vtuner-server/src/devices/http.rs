//! Network tuner streamed over HTTP.
//!
//! Each physical tuner of a tuner box is one device named
//! `<parent>-<index>`. The box itself is a tracked discovery parent, so the
//! stream URL always uses the box's latest address.

use std::net::IpAddr;

use vtuner_core::{
    ArgKind, CaptureDevice, ConstructionRecipe, DeviceAttributes, DiscoveryTracker,
    InstantiationError, ParentHandle, RecipeArgs,
};

pub const IMPLEMENTATION: &str = "http";

/// name, parent id, tuner index, channel lineup.
pub const PARAMS: [ArgKind; 4] = [ArgKind::Str, ArgKind::Int, ArgKind::Int, ArgKind::Str];

/// Port tuner boxes serve streams on.
pub const STREAM_PORT: u16 = 5004;

/// Highest tuner index a box can report.
const MAX_TUNER_INDEX: i64 = 63;

pub fn recipe(name: &str, parent_id: u32, index: u32, lineup: &str) -> ConstructionRecipe {
    ConstructionRecipe::new(
        IMPLEMENTATION,
        vec![
            name.into(),
            i64::from(parent_id).into(),
            i64::from(index).into(),
            lineup.into(),
        ],
    )
}

/// Device name for tuner `index` of `parent`.
pub fn tuner_name(parent: &str, index: u32) -> String {
    format!("{}-{}", parent, index)
}

#[derive(Debug)]
pub struct HttpTuner {
    name: String,
    parent: ParentHandle,
    index: u32,
    attributes: DeviceAttributes,
}

impl HttpTuner {
    pub fn construct(
        tracker: &DiscoveryTracker,
        args: RecipeArgs<'_>,
    ) -> Result<Box<dyn CaptureDevice>, InstantiationError> {
        let name = args.str(0)?;
        let parent_id = args.int(1)?;
        let index = args.int(2)?;
        let lineup = args.str(3)?;

        let parent_id = u32::try_from(parent_id)
            .map_err(|_| InstantiationError::Construction(format!("invalid parent id {}", parent_id)))?;
        if !(0..=MAX_TUNER_INDEX).contains(&index) {
            return Err(InstantiationError::Construction(format!(
                "tuner index {} out of range for {}",
                index, name
            )));
        }
        let parent = tracker.parent(parent_id).ok_or_else(|| {
            InstantiationError::Construction(format!("parent {:08X} is not tracked", parent_id))
        })?;

        DiscoveryTracker::add_child(&parent, name);

        Ok(Box::new(HttpTuner {
            name: name.to_string(),
            parent,
            index: index as u32,
            attributes: DeviceAttributes::new(lineup),
        }))
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn parent(&self) -> &ParentHandle {
        &self.parent
    }

    pub fn remote_address(&self) -> IpAddr {
        DiscoveryTracker::remote_address(&self.parent)
    }

    /// Stream URL for `channel` at the parent's current address.
    pub fn stream_url(&self, channel: &str) -> String {
        let host = match self.remote_address() {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => format!("[{}]", v6),
        };
        format!(
            "http://{}:{}/tuner{}/ch{}",
            host, STREAM_PORT, self.index, channel
        )
    }
}

impl CaptureDevice for HttpTuner {
    fn name(&self) -> &str {
        &self.name
    }

    fn implementation(&self) -> &str {
        IMPLEMENTATION
    }

    fn attributes(&self) -> &DeviceAttributes {
        &self.attributes
    }

    fn can_switch(&self) -> bool {
        true
    }
}
