//! The bridge context and module initialization.
//!
//! A [`Bridge`] owns everything one host module needs: the handle table, the
//! callback relay, the export table and the configuration. It is created by
//! [`initialize_bridge`] and lives as long as the host module. There is no
//! process-wide state; every marshaling call goes through a bridge.
//!
//! # Re-entrancy
//!
//! Host callables are never invoked while the bridge state is borrowed.
//! Events are dequeued and translated under the borrow, then the borrow is
//! released before the callable runs, so a callback may freely call exports.
//!
//! A native entry point is different: it runs with the state borrowed, since
//! the handles it was given must stay live until it returns. If it calls a
//! host callable synchronously and that callable reaches back into the same
//! bridge, the inner operation fails with [`BridgeError::Host`].

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use tether_core::{
    BridgeConfig, BridgeError, BridgeResult, FunctionRef, HandleStats, HandleTable, HostObject,
    HostValue, NativeObject, NativeValue, RawAddress,
};
use tracing::{debug, info, warn};

use crate::context::{NativeCall, PostCall};
use crate::exports::{EventLoopMode, ExportTable, NativeLibrary};
use crate::marshal::{decode, encode, encode_value};
use crate::relay::{
    CallbackRelay, EventSlot, EventSource, Prepared, PreparedCall, RegistrationState, RelaySender,
    RelayStats, SourceId,
};

/// Reserved export name of the event loop handle.
pub const GLOBAL_EVENT_LOOP: &str = "global_eventpump";

/// Snapshot of bridge activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Handle table counters.
    pub handles: HandleStats,
    /// Callback relay counters.
    pub relay: RelayStats,
    /// Export calls made.
    pub calls: u64,
}

fn reentered() -> BridgeError {
    BridgeError::Host("re-entrant call into bridge".to_string())
}

struct BridgeState {
    handles: HandleTable,
    relay: CallbackRelay,
    calls: u64,
    calls_since_collect: u32,
    exit_pending: bool,
}

impl BridgeState {
    /// Collect unreachable handles, then drop the registrations of any event
    /// source destroyed along with them.
    fn collect(&mut self) -> usize {
        let finalized = self.handles.collect().len();
        self.relay.prune_dead();
        finalized
    }

    fn after_call(&mut self, collect_interval: Option<u32>) {
        self.calls += 1;
        if let Some(interval) = collect_interval {
            self.calls_since_collect += 1;
            if self.calls_since_collect >= interval {
                self.calls_since_collect = 0;
                self.handles.collect();
            }
        }
        // The entry point itself may have destroyed native objects.
        self.relay.prune_dead();
    }
}

impl Drop for BridgeState {
    fn drop(&mut self) {
        let leaked = self.handles.teardown();
        if leaked > 0 {
            warn!(leaked, "Bridge dropped with live owning handles");
        }
    }
}

/// The bridge context of one host module.
///
/// Cloning is cheap; clones share the same context.
#[derive(Clone)]
pub struct Bridge {
    state: Rc<RefCell<BridgeState>>,
    exports: Rc<ExportTable>,
    config: Rc<BridgeConfig>,
    sender: RelaySender,
}

impl Bridge {
    /// Create a bridge over an export table.
    pub fn new(exports: ExportTable, config: BridgeConfig) -> BridgeResult<Self> {
        config.validate()?;
        let relay = CallbackRelay::new();
        let sender = relay.sender();
        Ok(Self {
            state: Rc::new(RefCell::new(BridgeState {
                handles: HandleTable::new(),
                relay,
                calls: 0,
                calls_since_collect: 0,
                exit_pending: false,
            })),
            exports: Rc::new(exports),
            config: Rc::new(config),
            sender,
        })
    }

    fn state(&self) -> BridgeResult<Ref<'_, BridgeState>> {
        self.state.try_borrow().map_err(|_| reentered())
    }

    fn state_mut(&self) -> BridgeResult<RefMut<'_, BridgeState>> {
        self.state.try_borrow_mut().map_err(|_| reentered())
    }

    /// The export table.
    pub fn exports(&self) -> &ExportTable {
        &self.exports
    }

    /// The configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Call an export by name.
    ///
    /// Arguments are decoded against the declared kinds, the native entry
    /// point runs, and its result is encoded against the declared shape.
    /// Post-call work requested by the entry point runs last.
    pub fn call(&self, name: &str, args: &[HostValue]) -> BridgeResult<HostValue> {
        let entry = self.exports.lookup(name)?;

        let (result, post) = {
            let mut guard = self.state_mut()?;
            let state = &mut *guard;

            let (value, post) = {
                let native_args = decode(entry.name(), &state.handles, args, entry.args())?;
                let mut call = NativeCall::new(&mut state.relay);
                let value = entry.invoke(&mut call, &native_args)?;
                (value, call.post_call())
            };

            let result = encode(entry.name(), &mut state.handles, entry.result(), value)?;
            state.after_call(self.config.collect_interval);
            (result, post)
        };

        match post {
            Some(PostCall::DispatchPending) => {
                self.dispatch_pending()?;
            }
            Some(PostCall::RunEventLoop) => {
                self.run_event_loop()?;
            }
            None => {}
        }

        Ok(result)
    }

    /// A host function that calls the named export.
    ///
    /// The function holds the bridge weakly; once the bridge is gone it fails
    /// with [`BridgeError::Host`].
    pub fn host_function(&self, name: &str) -> BridgeResult<FunctionRef> {
        let name = self.exports.lookup(name)?.name().to_string();
        let label = name.clone();
        let state = Rc::downgrade(&self.state);
        let exports = Rc::clone(&self.exports);
        let config = Rc::clone(&self.config);
        let sender = self.sender.clone();

        Ok(FunctionRef::named(&label, move |args: &[HostValue]| {
            let state = state
                .upgrade()
                .ok_or_else(|| BridgeError::Host("bridge has shut down".to_string()))?;
            let bridge = Bridge {
                state,
                exports: Rc::clone(&exports),
                config: Rc::clone(&config),
                sender: sender.clone(),
            };
            bridge.call(&name, args)
        }))
    }

    /// An object mapping every export name to its host function.
    pub fn raw_exports(&self) -> BridgeResult<HostObject> {
        let raw = HostObject::new();
        for name in self.exports.names() {
            raw.set(name, self.host_function(name)?);
        }
        Ok(raw)
    }

    /// Wrap a native object according to its ownership.
    pub fn wrap(&self, object: NativeObject) -> BridgeResult<HostValue> {
        let mut state = self.state_mut()?;
        Ok(encode_value(&mut state.handles, NativeValue::Object(object)))
    }

    /// Address behind a handle value.
    pub fn unwrap(&self, value: &HostValue) -> BridgeResult<RawAddress> {
        self.state()?.handles.unwrap(value)
    }

    /// Explicitly release a handle. Owned objects are destroyed immediately,
    /// along with any callbacks registered on them.
    pub fn release(&self, value: &HostValue) -> BridgeResult<()> {
        let HostValue::Handle(handle) = value else {
            return Err(BridgeError::type_mismatch("opaque handle", value.type_name()));
        };
        let mut state = self.state_mut()?;
        state.handles.release(handle)?;
        state.relay.prune_dead();
        Ok(())
    }

    /// Run the collector. Returns the number of entries finalized.
    ///
    /// Callbacks registered on objects destroyed here are dropped before this
    /// returns.
    pub fn collect_garbage(&self) -> BridgeResult<usize> {
        Ok(self.state_mut()?.collect())
    }

    /// A producer for native event sources.
    pub fn sender(&self) -> RelaySender {
        self.sender.clone()
    }

    /// Register a callback on a native event source, returning the callable
    /// it replaces.
    pub fn register_callback(
        &self,
        source: &EventSource,
        slot: EventSlot,
        callable: FunctionRef,
    ) -> BridgeResult<Option<FunctionRef>> {
        Ok(self.state_mut()?.relay.register(source, slot, callable))
    }

    /// Clear a callback. Returns whether one was registered.
    pub fn clear_callback(&self, source: SourceId, slot: EventSlot) -> BridgeResult<bool> {
        Ok(self.state_mut()?.relay.clear(source, slot))
    }

    /// Registration state of a slot.
    pub fn callback_state(&self, source: SourceId, slot: EventSlot) -> BridgeResult<RegistrationState> {
        Ok(self.state()?.relay.state(source, slot))
    }

    fn next_prepared(&self, block: bool) -> BridgeResult<Option<Prepared>> {
        let mut guard = self.state_mut()?;
        let state = &mut *guard;
        let message = if block {
            state.relay.wait_next()
        } else {
            state.relay.try_next()
        };
        let Some(message) = message else {
            return Ok(None);
        };
        Ok(Some(state.relay.prepare(&mut state.handles, message)))
    }

    fn invoke(&self, call: PreparedCall) {
        if let Err(e) = call.callable.call(&call.args) {
            warn!(callback = call.callable.name(), error = %e, "Callback raised an error");
        }
    }

    /// Deliver queued events without blocking.
    ///
    /// At most `max_events_per_dispatch` messages are processed. An exit
    /// request stops the dispatch and is remembered for the next
    /// [`Bridge::run_event_loop`]. Returns the number of callbacks invoked.
    pub fn dispatch_pending(&self) -> BridgeResult<usize> {
        let mut delivered = 0;

        for _ in 0..self.config.max_events_per_dispatch {
            match self.next_prepared(false)? {
                Some(Prepared::Call(call)) => {
                    self.invoke(call);
                    delivered += 1;
                }
                Some(Prepared::Skip(_)) => {}
                Some(Prepared::Exit) => {
                    self.state_mut()?.exit_pending = true;
                    break;
                }
                None => break,
            }
        }

        if delivered > 0 {
            debug!(delivered, "Dispatched pending events");
        }
        Ok(delivered)
    }

    /// Deliver events until an exit is posted, blocking between events.
    ///
    /// Returns immediately if an exit was posted while no loop was running.
    /// Returns the number of callbacks invoked.
    pub fn run_event_loop(&self) -> BridgeResult<usize> {
        if std::mem::take(&mut self.state_mut()?.exit_pending) {
            return Ok(0);
        }

        info!("Event loop started");
        let mut delivered = 0;
        loop {
            match self.next_prepared(true)? {
                Some(Prepared::Call(call)) => {
                    self.invoke(call);
                    delivered += 1;
                }
                Some(Prepared::Skip(_)) => {}
                Some(Prepared::Exit) | None => break,
            }
        }
        info!(delivered, "Event loop stopped");
        Ok(delivered)
    }

    /// Current counters.
    pub fn stats(&self) -> BridgeResult<BridgeStats> {
        let state = self.state()?;
        Ok(BridgeStats {
            handles: state.handles.stats(),
            relay: state.relay.stats(),
            calls: state.calls,
        })
    }

    /// Tear the bridge down.
    ///
    /// Callback registrations are dropped first, so handles kept alive only by
    /// a callback are collected normally. Every remaining handle is then
    /// finalized. Host functions created by this bridge fail afterwards. With
    /// `strict_leak_check`, owning handles that were still live are reported
    /// as [`BridgeError::LeakedHandles`].
    pub fn shutdown(self) -> BridgeResult<BridgeStats> {
        let relay = std::mem::take(&mut self.state_mut()?.relay);
        let relay_stats = relay.stats();
        drop(relay);

        let mut state = self.state_mut()?;
        state.handles.collect();
        let leaked = state.handles.teardown();
        let stats = BridgeStats {
            handles: state.handles.stats(),
            relay: relay_stats,
            calls: state.calls,
        };
        drop(state);

        info!(leaked, calls = stats.calls, "Bridge shut down");
        if self.config.strict_leak_check && leaked > 0 {
            return Err(BridgeError::LeakedHandles(leaked));
        }
        Ok(stats)
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Bridge");
        debug.field("exports", &self.exports.len());
        if let Ok(stats) = self.stats() {
            debug.field("stats", &stats);
        }
        debug.finish()
    }
}

/// A higher-level layer that builds ergonomic wrappers over the raw exports.
///
/// It receives the raw export object and the target namespace, and decides
/// what the target finally contains.
pub trait HelperLayer {
    /// Populate `target` from the raw `exports`.
    fn install(&self, exports: &HostObject, target: &HostObject) -> BridgeResult<()>;
}

/// Initialize a bridge for `library` and populate `target` with its exports.
///
/// With `existing_loop` set to `None` the library's event-loop exports are
/// included and a fresh loop is created; otherwise the loop exports are
/// omitted and the supplied loop is exposed instead. Either way the loop
/// handle sits under [`GLOBAL_EVENT_LOOP`].
///
/// If a helper layer is given (and enabled in `config`), it is run with the
/// raw exports and the target. Otherwise the raw exports are copied into the
/// target as-is.
pub fn initialize_bridge(
    library: &dyn NativeLibrary,
    target: &HostObject,
    existing_loop: Option<NativeObject>,
    config: BridgeConfig,
    helper: Option<&dyn HelperLayer>,
) -> BridgeResult<Bridge> {
    let mode = if existing_loop.is_some() {
        EventLoopMode::HostSupplied
    } else {
        EventLoopMode::Create
    };

    let table = ExportTable::for_library(library, mode)?;
    let bridge = Bridge::new(table, config)?;
    let raw = bridge.raw_exports()?;

    let event_loop = match existing_loop {
        Some(existing) => existing,
        None => library.create_event_loop(&bridge.sender())?,
    };
    raw.set(GLOBAL_EVENT_LOOP, bridge.wrap(event_loop)?);

    match helper {
        Some(helper) if bridge.config().run_helper_layer => helper.install(&raw, target)?,
        _ => {
            for name in raw.keys() {
                if let Some(value) = raw.get(&name) {
                    target.set(name, value);
                }
            }
        }
    }

    info!(
        library = library.name(),
        exports = bridge.exports().len(),
        ?mode,
        "Bridge initialized"
    );
    Ok(bridge)
}

/// Initialize a bridge into a fresh target and publish it on `global` under
/// the configured namespace.
pub fn initialize_global(
    library: &dyn NativeLibrary,
    global: &HostObject,
    existing_loop: Option<NativeObject>,
    config: BridgeConfig,
    helper: Option<&dyn HelperLayer>,
) -> BridgeResult<(Bridge, HostObject)> {
    let namespace = config.namespace.clone();
    let target = HostObject::new();
    let bridge = initialize_bridge(library, &target, existing_loop, config, helper)?;
    global.set(namespace, target.clone());
    Ok((bridge, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::exports::ExportTableBuilder;
    use crate::marshal::{ArgKind, ResultShape};

    #[derive(Clone, Default)]
    struct Counter(Arc<AtomicUsize>);

    impl Counter {
        fn bump(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn get(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct Loop;

    struct Emitter {
        events: EventSource,
    }

    struct TestLibrary {
        loops_created: Counter,
    }

    impl NativeLibrary for TestLibrary {
        fn name(&self) -> &str {
            "test"
        }

        fn version(&self) -> &str {
            "0.0.1"
        }

        fn register_event_loop(&self, builder: &mut ExportTableBuilder) -> BridgeResult<()> {
            builder
                .function("loop_tick", &[ArgKind::handle::<Loop>()], ResultShape::None, |call, _| {
                    call.defer(PostCall::DispatchPending);
                    Ok(NativeValue::Nothing)
                })?
                .function("loop_run", &[ArgKind::handle::<Loop>()], ResultShape::None, |call, _| {
                    call.defer(PostCall::RunEventLoop);
                    Ok(NativeValue::Nothing)
                })?
                .function("loop_exit", &[ArgKind::handle::<Loop>()], ResultShape::None, |call, _| {
                    call.sender().post_exit();
                    Ok(NativeValue::Nothing)
                })?;
            Ok(())
        }

        fn register(&self, builder: &mut ExportTableBuilder) -> BridgeResult<()> {
            builder
                .function("emitter_new", &[], ResultShape::owned::<Emitter>(), |call, _| {
                    let emitter = Emitter {
                        events: call.sender().source(),
                    };
                    Ok(NativeObject::owned(Box::new(emitter)).into())
                })?
                .function(
                    "emitter_on",
                    &[ArgKind::handle::<Emitter>(), ArgKind::Function],
                    ResultShape::None,
                    |call, args| {
                        let emitter = args.object::<Emitter>(0)?;
                        call.register_callback(&emitter.events, "message", args.function_ref(1)?);
                        Ok(NativeValue::Nothing)
                    },
                )?
                .function(
                    "emitter_fire",
                    &[ArgKind::handle::<Emitter>(), ArgKind::Int32, ArgKind::Str],
                    ResultShape::None,
                    |_, args| {
                        let emitter = args.object::<Emitter>(0)?;
                        let payload = vec![
                            NativeValue::Int32(args.int32(1)?),
                            NativeValue::from(args.str(2)?),
                        ];
                        emitter.events.emit("message", payload);
                        Ok(NativeValue::Nothing)
                    },
                )?
                .function("add", &[ArgKind::Int32, ArgKind::Int32], ResultShape::Int32, |_, args| {
                    Ok(NativeValue::Int32(args.int32(0)?.wrapping_add(args.int32(1)?)))
                })?
                .function("apply", &[ArgKind::Function], ResultShape::Int32, |_, args| {
                    let result = args.function_ref(0)?.call(&[HostValue::Int32(1)])?;
                    Ok(NativeValue::Int32(result.to_int32()))
                })?
                .function("liar", &[], ResultShape::Bool, |_, _| Ok(NativeValue::Int32(1)))?;
            Ok(())
        }

        fn create_event_loop(&self, _: &RelaySender) -> BridgeResult<NativeObject> {
            self.loops_created.bump();
            Ok(NativeObject::owned(Box::new(Loop)))
        }
    }

    fn library() -> TestLibrary {
        TestLibrary {
            loops_created: Counter::default(),
        }
    }

    fn init(library: &TestLibrary, target: &HostObject) -> Bridge {
        initialize_bridge(library, target, None, BridgeConfig::default(), None).unwrap()
    }

    #[test]
    fn test_call_primitive_export() {
        let target = HostObject::new();
        let bridge = init(&library(), &target);

        let sum = bridge
            .call("add", &[HostValue::Int32(40), HostValue::string("2")])
            .unwrap();
        assert_eq!(sum, HostValue::Int32(42));

        let via_target = target
            .call("add", &[HostValue::Number(1.9), HostValue::Bool(true)])
            .unwrap();
        assert_eq!(via_target, HostValue::Int32(2));
    }

    #[test]
    fn test_arity_mismatch_surfaces_as_error() {
        let target = HostObject::new();
        let bridge = init(&library(), &target);

        let err = bridge.call("add", &[HostValue::Int32(1)]).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::ArityMismatch {
                expected: 2,
                supplied: 1,
                ..
            }
        ));
        assert!(matches!(
            target.call("emitter_fire", &[]),
            Err(BridgeError::ArityMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_export_and_bad_shape() {
        let target = HostObject::new();
        let bridge = init(&library(), &target);
        assert!(matches!(bridge.call("nope", &[]), Err(BridgeError::UnknownExport(_))));
        assert!(matches!(bridge.call("liar", &[]), Err(BridgeError::ResultShape { .. })));
    }

    #[test]
    fn test_type_mismatch_on_wrong_handle() {
        let target = HostObject::new();
        let bridge = init(&library(), &target);
        let event_loop = target.get(GLOBAL_EVENT_LOOP).unwrap();

        let err = bridge
            .call("emitter_fire", &[event_loop, HostValue::Int32(1), HostValue::string("x")])
            .unwrap_err();
        assert!(matches!(err, BridgeError::TypeMismatch { .. }));
    }

    #[test]
    fn test_callback_scenario() {
        let target = HostObject::new();
        let bridge = init(&library(), &target);
        let emitter = bridge.call("emitter_new", &[]).unwrap();

        let seen: Rc<RefCell<Vec<Vec<HostValue>>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let callback = FunctionRef::named("on_message", move |args: &[HostValue]| {
            sink.borrow_mut().push(args.to_vec());
            Ok(HostValue::string("ignored"))
        });

        bridge
            .call("emitter_on", &[emitter.clone(), HostValue::Function(callback)])
            .unwrap();
        bridge
            .call("emitter_fire", &[emitter.clone(), HostValue::Int32(42), HostValue::string("ok")])
            .unwrap();
        assert!(seen.borrow().is_empty(), "events wait for the host loop");

        let event_loop = target.get(GLOBAL_EVENT_LOOP).unwrap();
        bridge.call("loop_tick", &[event_loop]).unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], vec![HostValue::Int32(42), HostValue::string("ok")]);
        assert_eq!(bridge.stats().unwrap().relay.delivered, 1);
    }

    #[test]
    fn test_callback_may_reenter_exports() {
        let target = HostObject::new();
        let bridge = init(&library(), &target);
        let emitter = bridge.call("emitter_new", &[]).unwrap();

        let result = Rc::new(Cell::new(0));
        let sink = Rc::clone(&result);
        let exports = target.clone();
        let callback = FunctionRef::new(move |args: &[HostValue]| {
            let sum = exports.call("add", &[args[0].clone(), HostValue::Int32(1)])?;
            sink.set(sum.to_int32());
            Ok(HostValue::Undefined)
        });

        target
            .call("emitter_on", &[emitter.clone(), HostValue::Function(callback)])
            .unwrap();
        target
            .call("emitter_fire", &[emitter, HostValue::Int32(9), HostValue::string("")])
            .unwrap();
        assert_eq!(bridge.dispatch_pending().unwrap(), 1);
        assert_eq!(result.get(), 10);
    }

    #[test]
    fn test_callback_errors_are_swallowed() {
        let target = HostObject::new();
        let bridge = init(&library(), &target);
        let emitter = bridge.call("emitter_new", &[]).unwrap();
        let failing = FunctionRef::new(|_: &[HostValue]| Err(BridgeError::Host("boom".into())));

        bridge
            .call("emitter_on", &[emitter.clone(), HostValue::Function(failing)])
            .unwrap();
        bridge
            .call("emitter_fire", &[emitter, HostValue::Int32(1), HostValue::string("")])
            .unwrap();
        assert_eq!(bridge.dispatch_pending().unwrap(), 1);
    }

    #[test]
    fn test_collected_emitter_releases_callback() {
        let target = HostObject::new();
        let bridge = init(&library(), &target);
        let emitter = bridge.call("emitter_new", &[]).unwrap();
        let calls = Rc::new(Cell::new(0));
        let sink = Rc::clone(&calls);
        let callback = FunctionRef::new(move |_: &[HostValue]| {
            sink.set(sink.get() + 1);
            Ok(HostValue::Undefined)
        });

        bridge
            .call("emitter_on", &[emitter.clone(), HostValue::Function(callback)])
            .unwrap();
        bridge
            .call("emitter_fire", &[emitter.clone(), HostValue::Int32(1), HostValue::string("")])
            .unwrap();
        assert_eq!(bridge.stats().unwrap().relay.registrations, 1);

        drop(emitter);
        assert_eq!(bridge.collect_garbage().unwrap(), 1);
        assert_eq!(bridge.dispatch_pending().unwrap(), 0);
        assert_eq!(calls.get(), 0);
        assert_eq!(bridge.stats().unwrap().relay.registrations, 0);
    }

    #[test]
    fn test_run_event_loop_until_exit() {
        let target = HostObject::new();
        let bridge = init(&library(), &target);
        let emitter = bridge.call("emitter_new", &[]).unwrap();
        let event_loop = target.get(GLOBAL_EVENT_LOOP).unwrap();

        let calls = Rc::new(Cell::new(0));
        let sink = Rc::clone(&calls);
        let exit_target = target.clone();
        let exit_loop = event_loop.clone();
        let callback = FunctionRef::new(move |_: &[HostValue]| {
            sink.set(sink.get() + 1);
            if sink.get() == 2 {
                exit_target.call("loop_exit", &[exit_loop.clone()])?;
            }
            Ok(HostValue::Undefined)
        });

        bridge
            .call("emitter_on", &[emitter.clone(), HostValue::Function(callback)])
            .unwrap();
        for i in 0..3 {
            bridge
                .call("emitter_fire", &[emitter.clone(), HostValue::Int32(i), HostValue::string("")])
                .unwrap();
        }

        // The exit is queued behind the third event.
        bridge.call("loop_run", &[event_loop]).unwrap();
        assert_eq!(calls.get(), 3);
        assert_eq!(bridge.dispatch_pending().unwrap(), 0);
    }

    #[test]
    fn test_exit_posted_before_loop_returns_immediately() {
        let target = HostObject::new();
        let bridge = init(&library(), &target);
        let event_loop = target.get(GLOBAL_EVENT_LOOP).unwrap();

        bridge.call("loop_exit", &[event_loop.clone()]).unwrap();
        bridge.call("loop_tick", &[event_loop.clone()]).unwrap();
        bridge.call("loop_run", &[event_loop]).unwrap();
    }

    #[test]
    fn test_event_loop_created_when_not_supplied() {
        let library = library();
        let target = HostObject::new();
        let bridge = init(&library, &target);

        assert_eq!(library.loops_created.get(), 1);
        assert!(target.contains("loop_tick"));
        assert!(bridge.exports().contains("loop_run"));
        assert_eq!(bridge.exports().mode(), EventLoopMode::Create);

        let handle = target.get(GLOBAL_EVENT_LOOP).unwrap();
        let handle = handle.as_handle().unwrap();
        assert_eq!(
            bridge.state.borrow().handles.ownership(handle),
            Some(tether_core::Ownership::Owning)
        );
    }

    #[test]
    fn test_supplied_event_loop_is_exposed_not_created() {
        let library = library();
        let target = HostObject::new();
        let host_loop = Loop;
        let bridge = initialize_bridge(
            &library,
            &target,
            // SAFETY: `host_loop` outlives the bridge.
            Some(unsafe { NativeObject::borrowed(&host_loop) }),
            BridgeConfig::default(),
            None,
        )
        .unwrap();

        assert_eq!(library.loops_created.get(), 0);
        assert!(!target.contains("loop_tick"));
        assert_eq!(bridge.exports().mode(), EventLoopMode::HostSupplied);

        let exposed = target.get(GLOBAL_EVENT_LOOP).unwrap();
        assert_eq!(
            bridge.unwrap(&exposed).unwrap(),
            RawAddress::from_ptr(&host_loop as *const Loop)
        );
        assert_eq!(bridge.shutdown().unwrap().handles.leaked, 0);
    }

    #[test]
    fn test_helper_layer_receives_raw_exports() {
        struct Renaming;

        impl HelperLayer for Renaming {
            fn install(&self, exports: &HostObject, target: &HostObject) -> BridgeResult<()> {
                let add = exports
                    .get("add")
                    .ok_or_else(|| BridgeError::Host("missing add".into()))?;
                target.set("plus", add);
                target.set("export_count", exports.len() as i32);
                Ok(())
            }
        }

        let target = HostObject::new();
        let _bridge =
            initialize_bridge(&library(), &target, None, BridgeConfig::default(), Some(&Renaming))
                .unwrap();

        assert!(!target.contains("add"));
        assert_eq!(
            target
                .call("plus", &[HostValue::Int32(2), HostValue::Int32(3)])
                .unwrap(),
            HostValue::Int32(5)
        );
        // six library exports, three loop exports and the loop handle
        assert_eq!(target.get("export_count"), Some(HostValue::Int32(10)));
    }

    #[test]
    fn test_initialize_global_publishes_namespace() {
        let global = HostObject::new();
        let config = BridgeConfig::default().with_namespace("Lacewing");
        let (_bridge, target) =
            initialize_global(&library(), &global, None, config, None).unwrap();

        let published = global.get("Lacewing").unwrap();
        assert!(published.as_object().unwrap().ptr_eq(&target));
    }

    #[test]
    fn test_collect_interval() {
        let config = BridgeConfig::default().with_collect_interval(Some(1));
        let target = HostObject::new();
        let bridge = initialize_bridge(&library(), &target, None, config, None).unwrap();

        let emitter = bridge.call("emitter_new", &[]).unwrap();
        drop(emitter);
        bridge.call("add", &[HostValue::Int32(1), HostValue::Int32(1)]).unwrap();
        assert_eq!(bridge.stats().unwrap().handles.finalized, 1);
    }

    #[test]
    fn test_release_makes_handle_stale() {
        let target = HostObject::new();
        let bridge = init(&library(), &target);
        let emitter = bridge.call("emitter_new", &[]).unwrap();

        bridge.release(&emitter).unwrap();
        let err = bridge
            .call("emitter_fire", &[emitter.clone(), HostValue::Int32(1), HostValue::string("")])
            .unwrap_err();
        assert!(matches!(err, BridgeError::StaleHandle(_)));
        assert!(matches!(bridge.release(&HostValue::Null), Err(BridgeError::TypeMismatch { .. })));
    }

    #[test]
    fn test_host_function_after_shutdown() {
        let target = HostObject::new();
        let bridge = init(&library(), &target);
        let stats = bridge.shutdown().unwrap();
        assert!(stats.handles.leaked >= 1, "the created loop was still referenced");

        let err = target
            .call("add", &[HostValue::Int32(1), HostValue::Int32(1)])
            .unwrap_err();
        assert!(matches!(err, BridgeError::Host(_)));
    }

    #[test]
    fn test_strict_shutdown_reports_leaks() {
        let config = BridgeConfig::default().with_strict_leak_check(true);
        let target = HostObject::new();
        let bridge = initialize_bridge(&library(), &target, None, config, None).unwrap();
        let _emitter = bridge.call("emitter_new", &[]).unwrap();

        match bridge.shutdown() {
            Err(BridgeError::LeakedHandles(n)) => assert_eq!(n, 2),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_native_entry_reentry_is_an_error() {
        let target = HostObject::new();
        let bridge = init(&library(), &target);

        let exports = target.clone();
        let nested = FunctionRef::new(move |_: &[HostValue]| {
            exports.call("add", &[HostValue::Int32(1), HostValue::Int32(2)])
        });
        let err = bridge
            .call("apply", &[HostValue::Function(nested)])
            .unwrap_err();
        assert!(matches!(err, BridgeError::Host(ref message) if message.contains("re-entrant")));

        let inner = bridge.clone();
        let collecting = FunctionRef::new(move |_: &[HostValue]| {
            assert!(inner.stats().is_err());
            inner.collect_garbage()?;
            Ok(HostValue::Int32(0))
        });
        assert!(matches!(
            bridge.call("apply", &[HostValue::Function(collecting)]),
            Err(BridgeError::Host(_))
        ));

        // A callable that stays out of the bridge is fine, and the bridge is
        // still usable afterwards.
        let plain = FunctionRef::new(|args: &[HostValue]| {
            Ok(HostValue::Int32(args[0].to_int32() + 1))
        });
        assert_eq!(
            bridge.call("apply", &[HostValue::Function(plain)]).unwrap(),
            HostValue::Int32(2)
        );
        assert_eq!(
            bridge.call("add", &[HostValue::Int32(1), HostValue::Int32(2)]).unwrap(),
            HostValue::Int32(3)
        );
    }

    #[test]
    fn test_destroyed_emitter_drops_callback_without_dispatch() {
        let library = library();
        let target = HostObject::new();
        let host_loop = Loop;
        let bridge = initialize_bridge(
            &library,
            &target,
            // SAFETY: `host_loop` outlives the bridge.
            Some(unsafe { NativeObject::borrowed(&host_loop) }),
            BridgeConfig::default(),
            None,
        )
        .unwrap();

        let token = Rc::new(());
        let captured = Rc::clone(&token);
        let callback = FunctionRef::new(move |_: &[HostValue]| {
            let _ = Rc::strong_count(&captured);
            Ok(HostValue::Undefined)
        });

        let emitter = bridge.call("emitter_new", &[]).unwrap();
        bridge
            .call("emitter_on", &[emitter.clone(), HostValue::Function(callback)])
            .unwrap();
        assert_eq!(Rc::strong_count(&token), 2);

        drop(emitter);
        assert_eq!(bridge.collect_garbage().unwrap(), 1);
        assert_eq!(bridge.stats().unwrap().relay.registrations, 0);
        assert_eq!(Rc::strong_count(&token), 1);
    }

    #[test]
    fn test_released_emitter_drops_callback() {
        let target = HostObject::new();
        let bridge = init(&library(), &target);
        let emitter = bridge.call("emitter_new", &[]).unwrap();
        let callback = FunctionRef::new(|_: &[HostValue]| Ok(HostValue::Undefined));

        bridge
            .call("emitter_on", &[emitter.clone(), HostValue::Function(callback)])
            .unwrap();
        bridge
            .call("emitter_fire", &[emitter.clone(), HostValue::Int32(1), HostValue::string("")])
            .unwrap();

        bridge.release(&emitter).unwrap();
        assert_eq!(bridge.stats().unwrap().relay.registrations, 0);

        // The event fired before the release is discarded, not delivered.
        assert_eq!(bridge.dispatch_pending().unwrap(), 0);
        assert_eq!(bridge.stats().unwrap().relay.released, 1);
    }
}
