//! Tether Host
//!
//! The host-facing half of the Tether bridge. It includes:
//!
//! - [`marshal`]: declared argument kinds and result shapes, and the
//!   conversions between host values and native values
//! - [`CallbackRelay`]: queues native events and delivers them to host
//!   callables on the host thread
//! - [`ExportTable`]: the declarative list of functions a native library
//!   exposes
//! - [`Bridge`] and [`initialize_bridge`]: the per-module context tying it
//!   all together
//!
//! # Example
//!
//! ```ignore
//! use tether_core::{BridgeConfig, HostObject, HostValue};
//! use tether_host::initialize_bridge;
//!
//! let target = HostObject::new();
//! let bridge = initialize_bridge(&library, &target, None, BridgeConfig::default(), None)?;
//!
//! let pump = target.get("global_eventpump").unwrap_or_default();
//! let timer = target.call("timer_new", &[pump])?;
//! target.call("timer_start", &[timer, HostValue::Int32(100)])?;
//! ```

pub mod bridge;
pub mod context;
pub mod exports;
pub mod marshal;
pub mod relay;

// Re-export main types
pub use bridge::{
    Bridge, BridgeStats, GLOBAL_EVENT_LOOP, HelperLayer, initialize_bridge, initialize_global,
};
pub use context::{NativeCall, PostCall};
pub use exports::{
    EventLoopMode, ExportEntry, ExportTable, ExportTableBuilder, NativeFn, NativeLibrary,
};
pub use marshal::{ArgKind, NativeArg, NativeArgs, ResultShape, decode, encode, encode_value};
pub use relay::{
    CallbackRelay, Delivery, EventSlot, EventSource, RegistrationState, RelayMessage,
    RelaySender, RelayStats, SourceId,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::bridge::{Bridge, HelperLayer, initialize_bridge};
    pub use crate::context::{NativeCall, PostCall};
    pub use crate::exports::{EventLoopMode, ExportTableBuilder, NativeLibrary};
    pub use crate::marshal::{ArgKind, NativeArgs, ResultShape};
    pub use crate::relay::{EventSource, RelaySender};
}
