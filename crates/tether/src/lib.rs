//! # Tether - Native Objects for Scripting Hosts
//!
//! Tether exposes natively owned objects to a garbage-collected scripting
//! host. Scripts hold opaque handles; the bridge marshals arguments and
//! results, finalizes owned objects exactly once when the host collects
//! their handles, and funnels native events back into host callbacks on the
//! host thread.
//!
//! ## Features
//!
//! - **Ownership**: owning handles destroy their object on collection,
//!   borrowing handles never do
//! - **Declared signatures**: every export lists its argument kinds and
//!   result shape, checked on each call
//! - **Threaded natives, single-threaded host**: events fired anywhere are
//!   queued and delivered when the host pumps
//!
//! ## Quick Start
//!
//! ```ignore
//! use tether::prelude::*;
//!
//! let module = Tether::builder()
//!     .with_collect_interval(Some(64))
//!     .build()?;
//!
//! let timer = module.call("timer.new", &[module.event_loop()?])?;
//! module.call("timer.force_tick", &[timer])?;
//! module.call("eventpump.tick", &[module.event_loop()?])?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   Scripting host                        │
//! ├─────────────────────────────────────────────────────────┤
//! │                 tether (facade)                         │
//! │               ┌──────────────────┐                      │
//! │               │  Tether Builder  │                      │
//! │               └────────┬─────────┘                      │
//! │                        │                                │
//! │  ┌─────────────┬───────┴───────┬────────────────────┐   │
//! │  │ tether-core │ tether-host   │ tether-net         │   │
//! │  │ (values,    │ (marshaling,  │ (pump, timers,     │   │
//! │  │  handles)   │  relay, init) │  addresses)        │   │
//! │  └─────────────┴───────────────┴────────────────────┘   │
//! └─────────────────────────────────────────────────────────┘
//! ```

use tether_core::{BridgeConfig, BridgeError, HostObject, HostValue, NativeObject};
use tether_host::{Bridge, BridgeStats, GLOBAL_EVENT_LOOP, HelperLayer, NativeLibrary};
use tether_net::{NetHelpers, NetLibrary};
use tracing::debug;

// Re-export from sub-crates
pub use tether_core;
pub use tether_host;
pub use tether_net;

/// Main entry point for Tether.
pub struct Tether;

impl Tether {
    /// Create a new module builder.
    pub fn builder<'a>() -> TetherBuilder<'a> {
        TetherBuilder::new()
    }

    /// Initialize the net library with default configuration.
    pub fn with_defaults() -> Result<TetherModule, TetherError> {
        TetherBuilder::new().build()
    }
}

/// Builder for configuring a bridged module.
pub struct TetherBuilder<'a> {
    config: BridgeConfig,
    library: Option<&'a dyn NativeLibrary>,
    helper: Option<&'a dyn HelperLayer>,
    event_loop: Option<NativeObject>,
}

impl<'a> TetherBuilder<'a> {
    /// Create a builder for the net library with its helper layer.
    pub fn new() -> Self {
        Self {
            config: BridgeConfig::default(),
            library: None,
            helper: None,
            event_loop: None,
        }
    }

    // Bridge configuration

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Treat owning handles still live at shutdown as an error.
    pub fn with_strict_leak_check(mut self, enabled: bool) -> Self {
        self.config.strict_leak_check = enabled;
        self
    }

    /// Collect after every `calls` export calls.
    pub fn with_collect_interval(mut self, calls: Option<u32>) -> Self {
        self.config.collect_interval = calls;
        self
    }

    /// Cap the events delivered per dispatch.
    pub fn with_max_events_per_dispatch(mut self, events: usize) -> Self {
        self.config.max_events_per_dispatch = events;
        self
    }

    /// Name under which [`TetherBuilder::build_global`] publishes the module.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    // Library and helpers

    /// Bridge a different native library. Its helper layer, if any, must be
    /// given with [`TetherBuilder::with_helper`].
    pub fn with_library(mut self, library: &'a dyn NativeLibrary) -> Self {
        self.library = Some(library);
        self.helper = None;
        self
    }

    /// Use a custom helper layer.
    pub fn with_helper(mut self, helper: &'a dyn HelperLayer) -> Self {
        self.helper = Some(helper);
        self.config.run_helper_layer = true;
        self
    }

    /// Copy the raw exports into the target instead of running a helper layer.
    pub fn without_helpers(mut self) -> Self {
        self.config.run_helper_layer = false;
        self
    }

    /// Drive an existing event loop instead of creating one.
    pub fn with_event_loop(mut self, event_loop: NativeObject) -> Self {
        self.event_loop = Some(event_loop);
        self
    }

    fn parts(&self) -> (&'a dyn NativeLibrary, Option<&'a dyn HelperLayer>) {
        match self.library {
            Some(library) => (library, self.helper),
            None => (
                &NetLibrary,
                self.helper.or(Some(&NetHelpers as &'static dyn HelperLayer)),
            ),
        }
    }

    /// Initialize the module into a fresh target.
    pub fn build(self) -> Result<TetherModule, TetherError> {
        self.build_into(HostObject::new())
    }

    /// Initialize the module into `target`.
    pub fn build_into(self, target: HostObject) -> Result<TetherModule, TetherError> {
        let (library, helper) = self.parts();
        let bridge =
            tether_host::initialize_bridge(library, &target, self.event_loop, self.config, helper)?;
        debug!(library = library.name(), members = target.len(), "Module built");
        Ok(TetherModule { bridge, target })
    }

    /// Initialize the module and publish it on `global` under the configured
    /// namespace.
    pub fn build_global(self, global: &HostObject) -> Result<TetherModule, TetherError> {
        let namespace = self.config.namespace.clone();
        let module = self.build_into(HostObject::new())?;
        global.set(namespace, module.target.clone());
        Ok(module)
    }
}

impl Default for TetherBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// A bridged module: the bridge context plus the populated target.
pub struct TetherModule {
    bridge: Bridge,
    target: HostObject,
}

impl TetherModule {
    /// The bridge context.
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// The populated target.
    pub fn target(&self) -> &HostObject {
        &self.target
    }

    /// Look up a member by dotted path, e.g. `"timer.start"`.
    pub fn get(&self, path: &str) -> Result<HostValue, TetherError> {
        let mut current = HostValue::Object(self.target.clone());
        for segment in path.split('.') {
            let next = current
                .as_object()
                .and_then(|object| object.get(segment))
                .ok_or_else(|| TetherError::MissingMember(path.to_string()))?;
            current = next;
        }
        Ok(current)
    }

    /// Call a member function by dotted path.
    pub fn call(&self, path: &str, args: &[HostValue]) -> Result<HostValue, TetherError> {
        let member = self.get(path)?;
        let function = member
            .as_function()
            .ok_or_else(|| TetherError::NotCallable(path.to_string()))?;
        Ok(function.call(args)?)
    }

    /// The event loop handle.
    pub fn event_loop(&self) -> Result<HostValue, TetherError> {
        self.target
            .get(GLOBAL_EVENT_LOOP)
            .ok_or_else(|| TetherError::MissingMember(GLOBAL_EVENT_LOOP.to_string()))
    }

    /// Current bridge counters.
    pub fn stats(&self) -> Result<BridgeStats, TetherError> {
        Ok(self.bridge.stats()?)
    }

    /// Tear the module down. The target is dropped first, so handles only it
    /// referenced are collected rather than reported as leaks.
    pub fn shutdown(self) -> Result<BridgeStats, TetherError> {
        let Self { bridge, target } = self;
        drop(target);
        Ok(bridge.shutdown()?)
    }
}

impl std::fmt::Debug for TetherModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("TetherModule");
        debug.field("members", &self.target.keys());
        if let Ok(stats) = self.bridge.stats() {
            debug.field("stats", &stats);
        }
        debug.finish()
    }
}

/// Errors from the facade.
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    /// Bridge error.
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// No member at this path.
    #[error("No member at '{0}'")]
    MissingMember(String),

    /// The member exists but is not a function.
    #[error("Member '{0}' is not callable")]
    NotCallable(String),
}

/// Prelude module for convenient imports.
pub mod prelude {
    // Main types
    pub use crate::{Tether, TetherBuilder, TetherError, TetherModule};

    // Core types
    pub use tether_core::{
        BridgeConfig, BridgeError, BridgeResult, FunctionRef, HostObject, HostValue,
        NativeObject, NativeValue, Ownership,
    };

    // Host types
    pub use tether_host::{
        ArgKind, Bridge, EventSource, ExportTableBuilder, HelperLayer, NativeLibrary, PostCall,
        ResultShape, initialize_bridge,
    };

    // Net library
    pub use tether_net::{NetHelpers, NetLibrary};
}
