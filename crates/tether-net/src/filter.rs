//! Listen filters.
//!
//! A [`Filter`] describes how a server binds: a local address, a local port
//! and whether the address may be reused. The local address lives inside the
//! filter at a fixed location, so it can be lent to the host as a borrowed
//! handle.

use parking_lot::Mutex;

use crate::address::Address;

#[derive(Debug, Default, Clone, Copy)]
struct FilterOptions {
    local_port: u16,
    reuse: bool,
}

/// Bind options for a server.
#[derive(Debug, Default)]
pub struct Filter {
    local: Box<Address>,
    options: Mutex<FilterOptions>,
}

impl Filter {
    /// Create a filter with an unspecified local address.
    pub fn new() -> Self {
        Self::default()
    }

    /// The local address. It stays at the same location for the filter's
    /// lifetime; [`Filter::set_local`] overwrites it in place.
    pub fn local(&self) -> &Address {
        &self.local
    }

    /// Copy `address` into the filter.
    pub fn set_local(&self, address: &Address) {
        self.local.assign(address);
    }

    /// The local port.
    pub fn local_port(&self) -> u16 {
        self.options.lock().local_port
    }

    /// Change the local port.
    pub fn set_local_port(&self, port: u16) {
        self.options.lock().local_port = port;
    }

    /// Whether the local address may be reused.
    pub fn reuse(&self) -> bool {
        self.options.lock().reuse
    }

    /// Allow or forbid address reuse.
    pub fn set_reuse(&self, reuse: bool) {
        self.options.lock().reuse = reuse;
    }
}
