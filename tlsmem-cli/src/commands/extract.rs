// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `tlsmem extract` command - Print heap samples from a trace.

use std::path::Path;

use tlsmem_core::render::chart::{format_bytes, format_count};
use tlsmem_core::{extract, TraceHandle};

use super::{load_config, CliError};

/// Peak allocation sites listed in the text output.
const TOP_SITES: usize = 10;

pub fn execute(config_path: Option<&str>, trace: &str, json: bool) -> Result<u8, CliError> {
    let config = load_config(config_path)?;
    let path = Path::new(trace);

    let handle = if path.is_dir() {
        TraceHandle::discover(path)?
    } else {
        TraceHandle::from_file(path)
    };
    tracing::debug!(files = handle.files().len(), "Extracting trace");

    let samples = extract(&handle, &config.extract)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&samples)?);
        return Ok(0);
    }

    if let Some(warning) = &samples.warning {
        eprintln!("⚠ {}", warning);
    }

    println!("{:>16}  {:>12}", samples.time_unit.label(), "heap");
    for sample in &samples.samples {
        println!("{:>16}  {:>12}", format_count(sample.elapsed), format_bytes(sample.heap_bytes));
    }
    println!();
    println!("Samples:  {}", samples.len());
    if let (Some(baseline), Some(peak), Some(last)) =
        (samples.baseline(), samples.peak(), samples.final_heap())
    {
        println!("Baseline: {}", format_bytes(baseline));
        println!("Peak:     {}", format_bytes(peak));
        println!("Final:    {}", format_bytes(last));
    }

    if !samples.peak_sites.is_empty() {
        let mut sites: Vec<_> = samples.peak_sites.iter().collect();
        sites.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        println!();
        println!("Peak allocation sites:");
        for (site, bytes) in sites.into_iter().take(TOP_SITES) {
            println!("  {:>12}  {}", format_bytes(*bytes), site);
        }
    }

    Ok(0)
}
