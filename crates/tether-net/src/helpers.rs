//! Helper layer for the net library.
//!
//! [`NetHelpers`] turns the flat raw exports (`timer_start`, `address_port`,
//! ...) into one namespace object per prefix (`timer.start`,
//! `address.port`, ...) on the target.

use tether_core::{BridgeResult, HostObject, HostValue};
use tether_host::{GLOBAL_EVENT_LOOP, HelperLayer};
use tracing::debug;

/// Groups raw exports by prefix.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetHelpers;

impl NetHelpers {
    /// Create the helper layer.
    pub fn new() -> Self {
        Self
    }
}

impl HelperLayer for NetHelpers {
    fn install(&self, exports: &HostObject, target: &HostObject) -> BridgeResult<()> {
        let mut namespaces = 0;

        for name in exports.keys() {
            let Some(value) = exports.get(&name) else {
                continue;
            };

            let Some((prefix, member)) = name
                .split_once('_')
                .filter(|_| name != GLOBAL_EVENT_LOOP)
            else {
                target.set(name, value);
                continue;
            };

            let namespace = match target.get(prefix).as_ref().and_then(HostValue::as_object) {
                Some(existing) => existing.clone(),
                None => {
                    let created = HostObject::new();
                    target.set(prefix, created.clone());
                    namespaces += 1;
                    created
                }
            };
            namespace.set(member, value);
        }

        if exports.contains("global_version") {
            target.set("version", exports.call("global_version", &[])?);
        }

        debug!(namespaces, "Installed net helpers");
        Ok(())
    }
}
