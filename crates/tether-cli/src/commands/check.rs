//! Check command - Validate a configuration file.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::OutputFormat;
use crate::config::{BridgeSection, FileConfig};

/// Arguments for the check command.
#[derive(Args)]
pub struct CheckArgs {
    /// Path to the configuration file
    #[arg(required = true)]
    pub file: PathBuf,
}

/// Check result.
#[derive(Debug, Serialize)]
struct CheckResult {
    valid: bool,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    bridge: Option<BridgeSection>,
    warnings: Vec<String>,
    errors: Vec<String>,
}

fn warnings_for(section: &BridgeSection) -> Vec<String> {
    let mut warnings = Vec::new();

    if section.collect_interval.is_none() {
        warnings.push(
            "collect_interval is unset - handles are only collected on explicit request"
                .to_string(),
        );
    }
    if section.collect_interval == Some(1) && !section.strict_leak_check {
        warnings.push("collect_interval = 1 is meant for leak testing".to_string());
    }
    if !section.run_helper_layer {
        warnings.push("helper layer disabled - raw exports are copied as-is".to_string());
    }

    warnings
}

/// Execute the check command.
pub fn execute(args: CheckArgs, format: OutputFormat) -> Result<()> {
    let mut result = CheckResult {
        valid: true,
        path: args.file.display().to_string(),
        bridge: None,
        warnings: Vec::new(),
        errors: Vec::new(),
    };

    match FileConfig::read(&args.file).and_then(|file| {
        file.bridge_config()?;
        Ok(file)
    }) {
        Ok(file) => {
            result.warnings = warnings_for(&file.bridge);
            result.bridge = Some(file.bridge);
        }
        Err(e) => {
            result.valid = false;
            result.errors.push(format!("{e:#}"));
        }
    }

    // Output results
    if !format.print_json(&result)? {
        if result.valid {
            println!("Configuration is valid: {}", args.file.display());
            if let Some(bridge) = &result.bridge {
                println!("  Namespace: {}", bridge.namespace);
                println!("  Strict leak check: {}", bridge.strict_leak_check);
                match bridge.collect_interval {
                    Some(calls) => println!("  Collect interval: every {calls} calls"),
                    None => println!("  Collect interval: manual"),
                }
                println!("  Max events per dispatch: {}", bridge.max_events_per_dispatch);
            }

            if !result.warnings.is_empty() {
                println!("\nWarnings:");
                for warning in &result.warnings {
                    println!("  - {warning}");
                }
            }
        } else {
            println!("Configuration is INVALID: {}", args.file.display());
            for error in &result.errors {
                println!("  Error: {error}");
            }
        }
    }

    if result.valid {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Validation failed"))
    }
}
