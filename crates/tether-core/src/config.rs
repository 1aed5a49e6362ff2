//! Configuration for the bridge.

use crate::error::{BridgeError, BridgeResult};

/// Configuration for a bridge context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Treat owning handles still live at shutdown as an error.
    ///
    /// Leaked handles are always finalized and logged; this only decides
    /// whether [`BridgeError::LeakedHandles`] is reported.
    pub strict_leak_check: bool,

    /// Run a collection after every N export calls.
    ///
    /// `None` leaves collection entirely to the host.
    pub collect_interval: Option<u32>,

    /// Maximum number of queued native events delivered per dispatch.
    pub max_events_per_dispatch: usize,

    /// Hand the raw exports to the helper layer, if one is supplied.
    pub run_helper_layer: bool,

    /// Name of the namespace the target is published under.
    pub namespace: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            strict_leak_check: false,
            collect_interval: None,
            max_events_per_dispatch: 1024,
            run_helper_layer: true,
            namespace: "tether".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable strict leak checking.
    pub fn with_strict_leak_check(mut self, enabled: bool) -> Self {
        self.strict_leak_check = enabled;
        self
    }

    /// Set the automatic collection interval.
    pub fn with_collect_interval(mut self, calls: Option<u32>) -> Self {
        self.collect_interval = calls;
        self
    }

    /// Set the per-dispatch event budget.
    pub fn with_max_events_per_dispatch(mut self, events: usize) -> Self {
        self.max_events_per_dispatch = events;
        self
    }

    /// Enable or disable the helper layer.
    pub fn with_helper_layer(mut self, enabled: bool) -> Self {
        self.run_helper_layer = enabled;
        self
    }

    /// Set the namespace name.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// A configuration for tests and debug builds: leaks are errors and
    /// collection runs after every call.
    pub fn strict() -> Self {
        Self {
            strict_leak_check: true,
            collect_interval: Some(1),
            ..Self::default()
        }
    }

    /// A configuration that leaves collection to the host and tolerates leaks.
    pub fn relaxed() -> Self {
        Self {
            strict_leak_check: false,
            collect_interval: None,
            max_events_per_dispatch: 8192,
            ..Self::default()
        }
    }

    /// Check the configuration for invalid values.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.max_events_per_dispatch == 0 {
            return Err(BridgeError::InvalidConfig(
                "max_events_per_dispatch must be greater than zero".to_string(),
            ));
        }
        if self.collect_interval == Some(0) {
            return Err(BridgeError::InvalidConfig(
                "collect_interval must be greater than zero".to_string(),
            ));
        }
        if self.namespace.trim().is_empty() {
            return Err(BridgeError::InvalidConfig(
                "namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
