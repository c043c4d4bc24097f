//! Devices declared in the configuration file.

use std::sync::Arc;

use log::{info, warn};

use vtuner_core::TunerContext;

use crate::config::{ConfigFile, HttpTunerSection, SoftwareDeviceSection};
use crate::devices::{self, http, software};
use crate::discovery::{DiscoveryError, ShutdownSignal};

/// Registers and loads configured devices once.
pub struct StaticDiscovery {
    context: Arc<TunerContext>,
    software: Vec<SoftwareDeviceSection>,
    http: Vec<HttpTunerSection>,
}

impl StaticDiscovery {
    pub fn from_config(context: Arc<TunerContext>, config: &ConfigFile) -> Self {
        Self {
            context,
            software: config.software_devices.clone(),
            http: config.http_tuners.clone(),
        }
    }

    /// Load every configured device, returning how many were newly loaded.
    ///
    /// A device that fails to load is logged and skipped.
    pub fn load_all(&self) -> usize {
        let mut loaded = 0;

        for device in &self.software {
            let recipe = software::recipe(&device.name, &device.source, &device.lineup);
            match devices::ensure_loaded(&self.context, &device.name, recipe, true) {
                Ok(true) => loaded += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to load software device {}: {}", device.name, e),
            }
        }

        for tuner in &self.http {
            let parent_name = tuner.parent.as_deref().unwrap_or(&tuner.name);
            self.context
                .discovery()
                .track_parent(parent_name, tuner.parent_id, Some(tuner.address));

            for index in 0..tuner.tuner_count {
                let name = http::tuner_name(&tuner.name, index);
                let recipe = http::recipe(&name, tuner.parent_id, index, &tuner.lineup);
                match devices::ensure_loaded(&self.context, &name, recipe, false) {
                    Ok(true) => loaded += 1,
                    Ok(false) => {}
                    Err(e) => warn!("Failed to load tuner {}: {}", name, e),
                }
            }
        }

        info!("Static discovery loaded {} device(s)", loaded);
        loaded
    }

    /// Worker entry point. Loads once and returns.
    pub async fn run(self, _shutdown: ShutdownSignal) -> Result<(), DiscoveryError> {
        self.load_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn context() -> Arc<TunerContext> {
        let context = Arc::new(TunerContext::new(true));
        devices::register_implementations(&context);
        context
    }

    fn config(contents: &str) -> ConfigFile {
        ConfigFile::parse(contents, Path::new("test.toml")).unwrap()
    }

    const CONFIG: &str = r#"
[[software_device]]
name = "File-1"
source = "/srv/captures/sample.ts"

[[http_tuner]]
name = "HDHR-1013ABCD"
parent_id = 0x1013ABCD
address = "192.168.1.20"
tuner_count = 2
lineup = "US-Cable"
"#;

    #[test]
    fn test_load_all() {
        let context = context();
        let discovery = StaticDiscovery::from_config(Arc::clone(&context), &config(CONFIG));

        assert_eq!(discovery.load_all(), 3);
        let names: Vec<String> = context
            .list_all_sorted()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names, vec!["File-1", "HDHR-1013ABCD-0", "HDHR-1013ABCD-1"]);

        let parent = context.discovery().parent(0x1013_abcd).unwrap();
        assert_eq!(parent.remote_address().to_string(), "192.168.1.20");
        assert_eq!(parent.children(), vec!["HDHR-1013ABCD-0", "HDHR-1013ABCD-1"]);

        // Persistent software descriptor is retained, the tuners are consumed.
        assert!(context.factory().is_retained("File-1"));
        assert!(context.factory().descriptor("HDHR-1013ABCD-0").is_err());
    }

    #[test]
    fn test_load_all_twice_is_noop() {
        let context = context();
        let discovery = StaticDiscovery::from_config(Arc::clone(&context), &config(CONFIG));
        discovery.load_all();
        assert_eq!(discovery.load_all(), 0);
        assert_eq!(context.list_all_sorted().len(), 3);
    }

    #[test]
    fn test_configured_pool_settings_apply() {
        let context = context();
        let config = config(&format!(
            "{}\n[[device]]\nname = \"HDHR-1013ABCD-1\"\npool = \"Cable\"\nmerit = 5\n",
            CONFIG
        ));
        crate::config::apply_pool_settings(&context, &config);
        StaticDiscovery::from_config(Arc::clone(&context), &config).load_all();

        let members: Vec<String> = context
            .pools()
            .pool_members("Cable")
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(members, vec!["HDHR-1013ABCD-1"]);
    }

    #[tokio::test]
    async fn test_run_as_worker() {
        let context = context();
        let mut supervisor = crate::discovery::DiscoverySupervisor::default();
        let discovery = StaticDiscovery::from_config(Arc::clone(&context), &config(CONFIG));
        supervisor.spawn("static", |shutdown| discovery.run(shutdown));

        let report = supervisor.stop().await;
        assert_eq!(report.joined, vec!["static"]);
        assert_eq!(context.list_all_sorted().len(), 3);
    }
}
