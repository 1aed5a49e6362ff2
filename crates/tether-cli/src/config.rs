//! Configuration file support.
//!
//! The file is TOML with a single `[bridge]` table mirroring
//! [`BridgeConfig`]. Missing keys take their defaults.
//!
//! ```toml
//! [bridge]
//! strict_leak_check = true
//! collect_interval = 64
//! max_events_per_dispatch = 256
//! namespace = "tether"
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tether_core::BridgeConfig;

/// Contents of a configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Bridge settings.
    pub bridge: BridgeSection,
}

/// The `[bridge]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeSection {
    /// Fail shutdown when owning handles leak.
    pub strict_leak_check: bool,
    /// Collect after this many export calls.
    pub collect_interval: Option<u32>,
    /// Events delivered per dispatch at most.
    pub max_events_per_dispatch: usize,
    /// Run the helper layer.
    pub run_helper_layer: bool,
    /// Global name of the module.
    pub namespace: String,
}

impl Default for BridgeSection {
    fn default() -> Self {
        BridgeConfig::default().into()
    }
}

impl From<BridgeConfig> for BridgeSection {
    fn from(config: BridgeConfig) -> Self {
        Self {
            strict_leak_check: config.strict_leak_check,
            collect_interval: config.collect_interval,
            max_events_per_dispatch: config.max_events_per_dispatch,
            run_helper_layer: config.run_helper_layer,
            namespace: config.namespace,
        }
    }
}

impl From<BridgeSection> for BridgeConfig {
    fn from(section: BridgeSection) -> Self {
        BridgeConfig::default()
            .with_strict_leak_check(section.strict_leak_check)
            .with_collect_interval(section.collect_interval)
            .with_max_events_per_dispatch(section.max_events_per_dispatch)
            .with_helper_layer(section.run_helper_layer)
            .with_namespace(section.namespace)
    }
}

impl FileConfig {
    /// Parse TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse configuration")
    }

    /// Read and parse a file.
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml(&text)
    }

    /// The bridge configuration, validated.
    pub fn bridge_config(&self) -> Result<BridgeConfig> {
        let config = BridgeConfig::from(self.bridge.clone());
        config.validate().context("Invalid bridge configuration")?;
        Ok(config)
    }
}

/// Load the bridge configuration from `path`, or the defaults without one.
pub fn load(path: Option<&Path>) -> Result<BridgeConfig> {
    match path {
        Some(path) => FileConfig::read(path)?.bridge_config(),
        None => Ok(BridgeConfig::default()),
    }
}
