//! Exports command - List the export table of the net library.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use tether_host::{EventLoopMode, ExportEntry, ExportTable, GLOBAL_EVENT_LOOP, NativeLibrary};
use tether_net::NetLibrary;

use crate::OutputFormat;

/// Arguments for the exports command.
#[derive(Args)]
pub struct ExportsArgs {
    /// List the table as built when the host supplies its own event loop
    #[arg(long)]
    pub host_loop: bool,

    /// Only list exports starting with this prefix
    #[arg(long)]
    pub prefix: Option<String>,
}

/// Export table listing.
#[derive(Debug, Serialize)]
struct ExportListing {
    library: String,
    version: String,
    mode: String,
    event_loop: String,
    exports: Vec<ExportDisplay>,
}

#[derive(Debug, Serialize)]
struct ExportDisplay {
    name: String,
    signature: String,
    result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl From<&ExportEntry> for ExportDisplay {
    fn from(entry: &ExportEntry) -> Self {
        Self {
            name: entry.name().to_string(),
            signature: entry.signature(),
            result: entry.result().to_string(),
            description: entry.description().map(String::from),
        }
    }
}

/// Execute the exports command.
pub fn execute(args: ExportsArgs, format: OutputFormat) -> Result<()> {
    let library = NetLibrary::new();
    let mode = if args.host_loop {
        EventLoopMode::HostSupplied
    } else {
        EventLoopMode::Create
    };

    let table =
        ExportTable::for_library(&library, mode).context("Failed to build export table")?;

    let listing = ExportListing {
        library: library.name().to_string(),
        version: library.version().to_string(),
        mode: format!("{mode:?}"),
        event_loop: match mode {
            EventLoopMode::Create => format!("{GLOBAL_EVENT_LOOP} (created)"),
            EventLoopMode::HostSupplied => format!("{GLOBAL_EVENT_LOOP} (host supplied)"),
        },
        exports: table
            .iter()
            .filter(|entry| {
                args.prefix
                    .as_deref()
                    .is_none_or(|prefix| entry.name().starts_with(prefix))
            })
            .map(ExportDisplay::from)
            .collect(),
    };

    // Output results
    if format.print_json(&listing)? {
        return Ok(());
    }

    println!("Library: {} ({})", listing.library, listing.version);
    println!("Event loop: {}", listing.event_loop);
    println!();
    println!("Exports ({}):", listing.exports.len());
    for export in &listing.exports {
        match &export.description {
            Some(description) => {
                println!("  {} {}  # {}", export.name, export.signature, description)
            }
            None => println!("  {} {}", export.name, export.signature),
        }
    }

    Ok(())
}
