//! Export registration for the net library.

use std::time::Duration;

use tether_core::{BridgeError, BridgeResult, NativeObject, NativeValue};
use tether_host::{
    ArgKind, ExportEntry, ExportTableBuilder, NativeLibrary, PostCall, RelaySender, ResultShape,
};
use tracing::debug;

use crate::address::{Address, port_from_int};
use crate::filter::Filter;
use crate::pump::EventPump;
use crate::report::ErrorReport;
use crate::timer::{TICK, Timer};

/// Library version string, also returned by `global_version`.
pub const VERSION: &str = concat!("tether-net ", env!("CARGO_PKG_VERSION"));

/// The net library: event pump, timers, addresses, error reports and filters.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetLibrary;

impl NetLibrary {
    /// Create the library.
    pub fn new() -> Self {
        Self
    }
}

fn count_to_i64(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn len_to_i32(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

impl NativeLibrary for NetLibrary {
    fn name(&self) -> &str {
        "tether-net"
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn register_event_loop(&self, builder: &mut ExportTableBuilder) -> BridgeResult<()> {
        let pump = ArgKind::handle::<EventPump>();

        builder
            .register(
                ExportEntry::new("eventpump_new", &[], ResultShape::owned::<EventPump>(), |_, _| {
                    Ok(NativeObject::owned(Box::new(EventPump::new())).into())
                })
                .with_description("Create an event pump"),
            )?
            .register(
                ExportEntry::new("eventpump_tick", &[pump], ResultShape::None, |call, args| {
                    args.object::<EventPump>(0)?.record_tick();
                    call.defer(PostCall::DispatchPending);
                    Ok(NativeValue::Nothing)
                })
                .with_description("Deliver pending events without blocking"),
            )?
            .register(
                ExportEntry::new(
                    "eventpump_start_eventloop",
                    &[pump],
                    ResultShape::None,
                    |call, args| {
                        args.object::<EventPump>(0)?.record_loop();
                        call.defer(PostCall::RunEventLoop);
                        Ok(NativeValue::Nothing)
                    },
                )
                .with_description("Deliver events until an exit is posted"),
            )?
            .register(
                ExportEntry::new(
                    "eventpump_post_eventloop_exit",
                    &[pump],
                    ResultShape::None,
                    |call, _| {
                        call.sender().post_exit();
                        Ok(NativeValue::Nothing)
                    },
                )
                .with_description("Make a running event loop return"),
            )?;
        Ok(())
    }

    fn register(&self, builder: &mut ExportTableBuilder) -> BridgeResult<()> {
        builder.function("global_version", &[], ResultShape::Str, |_, _| {
            Ok(VERSION.into())
        })?;

        register_timer(builder)?;
        register_address(builder)?;
        register_error(builder)?;
        register_filter(builder)?;

        debug!(exports = builder.len(), "Registered net exports");
        Ok(())
    }

    fn create_event_loop(&self, _sender: &RelaySender) -> BridgeResult<NativeObject> {
        Ok(NativeObject::owned(Box::new(EventPump::new())))
    }
}

fn register_timer(builder: &mut ExportTableBuilder) -> BridgeResult<()> {
    let timer = ArgKind::handle::<Timer>();

    builder
        .function(
            "timer_new",
            &[ArgKind::handle::<EventPump>()],
            ResultShape::owned::<Timer>(),
            |call, _| {
                let timer = Timer::new(call.sender().source());
                Ok(NativeObject::owned(Box::new(timer)).into())
            },
        )?
        .function("timer_start", &[timer, ArgKind::Int32], ResultShape::None, |_, args| {
            let ms = args.int32(1)?;
            let ms = u64::try_from(ms)
                .map_err(|_| BridgeError::Native(format!("invalid timer interval {ms}ms")))?;
            args.object::<Timer>(0)?.start(Duration::from_millis(ms))?;
            Ok(NativeValue::Nothing)
        })?
        .function("timer_stop", &[timer], ResultShape::None, |_, args| {
            args.object::<Timer>(0)?.stop();
            Ok(NativeValue::Nothing)
        })?
        .function("timer_started", &[timer], ResultShape::Bool, |_, args| {
            Ok(args.object::<Timer>(0)?.started().into())
        })?
        .function("timer_force_tick", &[timer], ResultShape::None, |_, args| {
            args.object::<Timer>(0)?.force_tick();
            Ok(NativeValue::Nothing)
        })?
        .function("timer_ticks", &[timer], ResultShape::Int64, |_, args| {
            Ok(count_to_i64(args.object::<Timer>(0)?.ticks()).into())
        })?
        .function(
            "timer_on_tick",
            &[timer, ArgKind::Function],
            ResultShape::None,
            |call, args| {
                let timer = args.object::<Timer>(0)?;
                if call
                    .register_callback(timer.events(), TICK, args.function_ref(1)?)
                    .is_some()
                {
                    debug!(source = %timer.events().id(), "Replaced tick callback");
                }
                Ok(NativeValue::Nothing)
            },
        )?;
    Ok(())
}

fn register_address(builder: &mut ExportTableBuilder) -> BridgeResult<()> {
    let address = ArgKind::handle::<Address>();

    builder
        .function(
            "address_new",
            &[ArgKind::Str, ArgKind::Int32],
            ResultShape::owned::<Address>(),
            |_, args| {
                let parsed = Address::parse(args.str(0)?, port_from_int(args.int32(1)?)?)?;
                Ok(NativeObject::owned(Box::new(parsed)).into())
            },
        )?
        .function("address_copy", &[address], ResultShape::owned::<Address>(), |_, args| {
            let copy = args.object::<Address>(0)?.copy();
            Ok(NativeObject::owned(Box::new(copy)).into())
        })?
        .function("address_port", &[address], ResultShape::Int32, |_, args| {
            Ok(i32::from(args.object::<Address>(0)?.port()).into())
        })?
        .function(
            "address_set_port",
            &[address, ArgKind::Int32],
            ResultShape::None,
            |_, args| {
                let port = port_from_int(args.int32(1)?)?;
                args.object::<Address>(0)?.set_port(port);
                Ok(NativeValue::Nothing)
            },
        )?
        .function("address_is_ipv6", &[address], ResultShape::Bool, |_, args| {
            Ok(args.object::<Address>(0)?.is_ipv6().into())
        })?
        .function("address_tostring", &[address], ResultShape::Str, |_, args| {
            Ok(args.object::<Address>(0)?.to_string().into())
        })?;
    Ok(())
}

fn register_error(builder: &mut ExportTableBuilder) -> BridgeResult<()> {
    let report = ArgKind::handle::<ErrorReport>();

    builder
        .function("error_new", &[], ResultShape::owned::<ErrorReport>(), |_, _| {
            Ok(NativeObject::owned(Box::new(ErrorReport::new())).into())
        })?
        .function("error_add", &[report, ArgKind::Str], ResultShape::None, |_, args| {
            args.object::<ErrorReport>(0)?.add(args.str(1)?);
            Ok(NativeValue::Nothing)
        })?
        .function("error_size", &[report], ResultShape::Int32, |_, args| {
            Ok(len_to_i32(args.object::<ErrorReport>(0)?.size()).into())
        })?
        .function("error_tostring", &[report], ResultShape::Str, |_, args| {
            Ok(args.object::<ErrorReport>(0)?.to_string().into())
        })?
        .function("error_clone", &[report], ResultShape::owned::<ErrorReport>(), |_, args| {
            let copy = args.object::<ErrorReport>(0)?.duplicate();
            Ok(NativeObject::owned(Box::new(copy)).into())
        })?;
    Ok(())
}

fn register_filter(builder: &mut ExportTableBuilder) -> BridgeResult<()> {
    let filter = ArgKind::handle::<Filter>();

    builder
        .function("filter_new", &[], ResultShape::owned::<Filter>(), |_, _| {
            Ok(NativeObject::owned(Box::new(Filter::new())).into())
        })?
        .function(
            "filter_set_local",
            &[filter, ArgKind::handle::<Address>()],
            ResultShape::None,
            |_, args| {
                let address = args.object::<Address>(1)?;
                args.object::<Filter>(0)?.set_local(address);
                Ok(NativeValue::Nothing)
            },
        )?
        .function("filter_local", &[filter], ResultShape::borrowed::<Address>(), |_, args| {
            let local = args.object::<Filter>(0)?.local();
            // SAFETY: the address is boxed inside the filter and never moves;
            // a borrowed handle is only usable while its filter is alive.
            Ok(unsafe { NativeObject::borrowed(local) }.into())
        })?
        .function(
            "filter_set_local_port",
            &[filter, ArgKind::Int32],
            ResultShape::None,
            |_, args| {
                let port = port_from_int(args.int32(1)?)?;
                args.object::<Filter>(0)?.set_local_port(port);
                Ok(NativeValue::Nothing)
            },
        )?
        .function("filter_local_port", &[filter], ResultShape::Int32, |_, args| {
            Ok(i32::from(args.object::<Filter>(0)?.local_port()).into())
        })?
        .function("filter_set_reuse", &[filter, ArgKind::Bool], ResultShape::None, |_, args| {
            args.object::<Filter>(0)?.set_reuse(args.bool(1)?);
            Ok(NativeValue::Nothing)
        })?
        .function("filter_reuse", &[filter], ResultShape::Bool, |_, args| {
            Ok(args.object::<Filter>(0)?.reuse().into())
        })?;
    Ok(())
}
