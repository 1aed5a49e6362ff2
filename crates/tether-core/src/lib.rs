//! Tether Core
//!
//! The data model of the Tether bridge, which lets a garbage-collected
//! scripting host hold opaque handles to natively owned objects:
//!
//! - [`HostValue`]: values as the host sees them, with ECMAScript coercions
//! - [`HandleTable`]: the side table behind every [`OpaqueHandle`], which
//!   finalizes owning handles exactly once
//! - [`NativeValue`] / [`NativeObject`]: values as native code produces them
//! - [`BridgeConfig`] and [`BridgeError`]
//!
//! Marshaling, the callback relay and export tables live in `tether-host`.

pub mod config;
pub mod error;
pub mod handle;
pub mod native;
pub mod value;

// Re-export main types
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use handle::{
    Destructor, Finalized, HandleId, HandleStats, HandleTable, OpaqueHandle, Ownership,
    RawAddress, TypeTag,
};
pub use native::{NativeObject, NativeValue};
pub use value::{FunctionRef, HostObject, HostValue};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::BridgeConfig;
    pub use crate::error::{BridgeError, BridgeResult};
    pub use crate::handle::{HandleTable, OpaqueHandle, Ownership, RawAddress, TypeTag};
    pub use crate::native::{NativeObject, NativeValue};
    pub use crate::value::{FunctionRef, HostObject, HostValue};
}
