//! Demo command - Run a timer through the bridge.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use tether::prelude::*;
use tether_host::BridgeStats;

use crate::OutputFormat;

/// Arguments for the demo command.
#[derive(Args)]
pub struct DemoArgs {
    /// Number of ticks to wait for
    #[arg(long, default_value = "5")]
    pub ticks: u32,

    /// Timer interval in milliseconds
    #[arg(long, default_value = "100")]
    pub interval_ms: u32,
}

/// Demo report.
#[derive(Debug, Serialize)]
struct DemoReport {
    version: String,
    ticks_delivered: u32,
    ticks_fired: f64,
    elapsed_ms: u128,
    export_calls: u64,
    handles_created: u64,
    handles_finalized: u64,
    handles_leaked: u64,
    events_delivered: u64,
    events_discarded: u64,
}

impl DemoReport {
    fn new(version: String, delivered: u32, fired: f64, elapsed: Duration, stats: BridgeStats) -> Self {
        Self {
            version,
            ticks_delivered: delivered,
            ticks_fired: fired,
            elapsed_ms: elapsed.as_millis(),
            export_calls: stats.calls,
            handles_created: stats.handles.owning_created + stats.handles.borrowing_created,
            handles_finalized: stats.handles.finalized + stats.handles.released,
            handles_leaked: stats.handles.leaked,
            events_delivered: stats.relay.delivered,
            events_discarded: stats.relay.unregistered + stats.relay.released,
        }
    }
}

/// Execute the demo command.
pub fn execute(args: DemoArgs, config: BridgeConfig, format: OutputFormat, quiet: bool) -> Result<()> {
    if args.ticks == 0 || args.interval_ms == 0 {
        anyhow::bail!("--ticks and --interval-ms must be greater than zero");
    }
    let interval = i32::try_from(args.interval_ms).context("--interval-ms is too large")?;

    // Exports are addressed by namespace below, so helpers always run.
    let module = Tether::builder()
        .with_config(config)
        .with_helper(&NetHelpers)
        .build()
        .context("Failed to initialize bridge")?;

    let version = module
        .get("version")?
        .as_str()
        .map(String::from)
        .unwrap_or_default();
    let pump = module.event_loop()?;
    let timer = module.call("timer.new", &[pump.clone()])?;

    let delivered = Rc::new(Cell::new(0u32));
    let counter = Rc::clone(&delivered);
    let target = args.ticks;
    let exit = module
        .get("eventpump.post_eventloop_exit")?
        .as_function()
        .cloned()
        .context("eventpump.post_eventloop_exit is not a function")?;
    let exit_pump = pump.clone();
    let on_tick = FunctionRef::named("on_tick", move |_: &[HostValue]| {
        counter.set(counter.get() + 1);
        tracing::debug!(tick = counter.get(), "Tick delivered");
        if counter.get() == target {
            exit.call(&[exit_pump.clone()])?;
        }
        Ok(HostValue::Undefined)
    });

    module.call("timer.on_tick", &[timer.clone(), HostValue::Function(on_tick)])?;
    module.call("timer.start", &[timer.clone(), HostValue::Int32(interval)])?;

    if !quiet {
        tracing::info!(ticks = args.ticks, interval_ms = args.interval_ms, "Running event loop");
    }

    let start = Instant::now();
    module.call("eventpump.start_eventloop", &[pump])?;
    let elapsed = start.elapsed();

    module.call("timer.stop", &[timer.clone()])?;
    let fired = module.call("timer.ticks", &[timer])?.to_number();

    let stats = module.shutdown().context("Bridge shutdown failed")?;
    let report = DemoReport::new(version, delivered.get(), fired, elapsed, stats);

    // Output results
    if !format.print_json(&report)? {
        if !quiet {
            println!("{}", report.version);
            println!(
                "Delivered {} of {} ticks in {}ms",
                report.ticks_delivered, report.ticks_fired, report.elapsed_ms
            );
        }
        println!("  Export calls: {}", report.export_calls);
        println!(
            "  Handles: {} created, {} finalized, {} leaked",
            report.handles_created, report.handles_finalized, report.handles_leaked
        );
        println!(
            "  Events: {} delivered, {} discarded",
            report.events_delivered, report.events_discarded
        );
    }

    Ok(())
}
