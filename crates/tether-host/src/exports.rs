//! Declarative export tables.
//!
//! Each exported function is an [`ExportEntry`]: a stable name, the ordered
//! argument kinds, the result shape and the native entry point. One generic
//! dispatch routine (`Bridge::call`) drives every entry, so native libraries
//! only declare their functions through an [`ExportTableBuilder`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tether_core::{BridgeError, BridgeResult, NativeObject, NativeValue};
use tracing::{debug, info};

use crate::context::NativeCall;
use crate::marshal::{ArgKind, NativeArgs, ResultShape};
use crate::relay::RelaySender;

/// A native entry point.
pub type NativeFn =
    Arc<dyn Fn(&mut NativeCall<'_>, &NativeArgs<'_>) -> BridgeResult<NativeValue> + Send + Sync>;

/// One exported function.
#[derive(Clone)]
pub struct ExportEntry {
    name: String,
    args: Vec<ArgKind>,
    result: ResultShape,
    entry: NativeFn,
    description: Option<String>,
}

impl ExportEntry {
    /// Declare an export.
    pub fn new<F>(name: impl Into<String>, args: &[ArgKind], result: ResultShape, entry: F) -> Self
    where
        F: Fn(&mut NativeCall<'_>, &NativeArgs<'_>) -> BridgeResult<NativeValue>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            args: args.to_vec(),
            result,
            entry: Arc::new(entry),
            description: None,
        }
    }

    /// Attach a human-readable description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The exported name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared argument kinds, in order.
    pub fn args(&self) -> &[ArgKind] {
        &self.args
    }

    /// Number of required arguments.
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// Declared result shape.
    pub fn result(&self) -> ResultShape {
        self.result
    }

    /// Description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Signature such as `(handle<Timer>, int32) -> nothing`.
    pub fn signature(&self) -> String {
        let args: Vec<String> = self.args.iter().map(ToString::to_string).collect();
        format!("({}) -> {}", args.join(", "), self.result)
    }

    /// Run the native entry point on already decoded arguments.
    pub fn invoke(&self, call: &mut NativeCall<'_>, args: &NativeArgs<'_>) -> BridgeResult<NativeValue> {
        (self.entry)(call, args)
    }
}

impl fmt::Debug for ExportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportEntry")
            .field("name", &self.name)
            .field("signature", &self.signature())
            .finish()
    }
}

/// Whether the bridge creates the event loop or the host supplies one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLoopMode {
    /// Export the library's event-loop functions and create a fresh loop.
    Create,
    /// The host drives its own loop; only its handle is exposed.
    HostSupplied,
}

/// A native library that can be exposed to the host.
pub trait NativeLibrary {
    /// Library name.
    fn name(&self) -> &str;

    /// Library version string.
    fn version(&self) -> &str;

    /// Register the exports that create and drive an event loop. Skipped when
    /// the host supplies its own loop.
    fn register_event_loop(&self, builder: &mut ExportTableBuilder) -> BridgeResult<()>;

    /// Register every other export.
    fn register(&self, builder: &mut ExportTableBuilder) -> BridgeResult<()>;

    /// Create the event loop exposed when the host does not supply one.
    fn create_event_loop(&self, sender: &RelaySender) -> BridgeResult<NativeObject>;
}

/// The immutable set of exports of one bridge.
#[derive(Clone)]
pub struct ExportTable {
    entries: BTreeMap<String, ExportEntry>,
    mode: EventLoopMode,
}

impl ExportTable {
    /// Start building a table.
    pub fn builder(mode: EventLoopMode) -> ExportTableBuilder {
        ExportTableBuilder::new(mode)
    }

    /// Build the table for a native library.
    pub fn for_library(library: &dyn NativeLibrary, mode: EventLoopMode) -> BridgeResult<Self> {
        let mut builder = ExportTableBuilder::new(mode);
        if mode == EventLoopMode::Create {
            library.register_event_loop(&mut builder)?;
        }
        library.register(&mut builder)?;

        info!(
            library = library.name(),
            version = library.version(),
            ?mode,
            "Built export table"
        );
        Ok(builder.build())
    }

    /// Look up an export.
    pub fn get(&self, name: &str) -> Option<&ExportEntry> {
        self.entries.get(name)
    }

    /// Look up an export, failing with [`BridgeError::UnknownExport`].
    pub fn lookup(&self, name: &str) -> BridgeResult<&ExportEntry> {
        self.get(name)
            .ok_or_else(|| BridgeError::UnknownExport(name.to_string()))
    }

    /// Whether an export exists.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Export names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ExportEntry> {
        self.entries.values()
    }

    /// Number of exports.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The event-loop mode the table was built for.
    pub fn mode(&self) -> EventLoopMode {
        self.mode
    }
}

impl fmt::Debug for ExportTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportTable")
            .field("exports", &self.entries.len())
            .field("mode", &self.mode)
            .finish()
    }
}

/// Builder for an [`ExportTable`].
pub struct ExportTableBuilder {
    entries: BTreeMap<String, ExportEntry>,
    mode: EventLoopMode,
}

impl ExportTableBuilder {
    /// Create an empty builder.
    pub fn new(mode: EventLoopMode) -> Self {
        Self {
            entries: BTreeMap::new(),
            mode,
        }
    }

    /// The event-loop mode being built for.
    pub fn mode(&self) -> EventLoopMode {
        self.mode
    }

    /// Check if an export is already registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Register a declared export.
    pub fn register(&mut self, entry: ExportEntry) -> BridgeResult<&mut Self> {
        if self.is_registered(entry.name()) {
            return Err(BridgeError::AlreadyRegistered(entry.name().to_string()));
        }

        debug!(name = entry.name(), signature = %entry.signature(), "Registered export");
        self.entries.insert(entry.name().to_string(), entry);
        Ok(self)
    }

    /// Declare and register an export in one step.
    pub fn function<F>(
        &mut self,
        name: &str,
        args: &[ArgKind],
        result: ResultShape,
        entry: F,
    ) -> BridgeResult<&mut Self>
    where
        F: Fn(&mut NativeCall<'_>, &NativeArgs<'_>) -> BridgeResult<NativeValue>
            + Send
            + Sync
            + 'static,
    {
        self.register(ExportEntry::new(name, args, result, entry))
    }

    /// Number of exports registered so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finish the table.
    pub fn build(self) -> ExportTable {
        ExportTable {
            entries: self.entries,
            mode: self.mode,
        }
    }
}
