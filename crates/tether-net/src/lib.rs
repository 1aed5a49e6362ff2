//! Tether Net
//!
//! A small native library exposed through the Tether bridge. It provides:
//!
//! - [`EventPump`]: the event loop object behind `global_eventpump`
//! - [`Timer`]: periodic `tick` events from a background thread
//! - [`Address`], [`ErrorReport`] and [`Filter`]: plain native objects,
//!   including a borrowed handle (`filter_local`)
//!
//! [`NetLibrary`] registers the exports and [`NetHelpers`] groups them into
//! namespaces on the host target.
//!
//! # Example
//!
//! ```ignore
//! use tether_core::{BridgeConfig, HostObject, HostValue};
//! use tether_host::initialize_bridge;
//! use tether_net::{NetHelpers, NetLibrary};
//!
//! let target = HostObject::new();
//! let bridge = initialize_bridge(&NetLibrary, &target, None, BridgeConfig::default(), Some(&NetHelpers))?;
//! println!("{:?}", target.get("version"));
//! ```

pub mod address;
pub mod filter;
pub mod helpers;
pub mod library;
pub mod pump;
pub mod report;
pub mod timer;

// Re-export main types
pub use address::Address;
pub use filter::Filter;
pub use helpers::NetHelpers;
pub use library::{NetLibrary, VERSION};
pub use pump::EventPump;
pub use report::ErrorReport;
pub use timer::{TICK, Timer};
