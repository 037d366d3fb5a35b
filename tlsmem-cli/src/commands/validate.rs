// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `tlsmem validate` command - Validate configuration file.

use tlsmem_core::config::DependencySource;
use tlsmem_core::tools::find_program;
use tlsmem_core::HarnessConfig;

use super::{load_config, CliError};

pub fn execute(file: Option<&str>) -> Result<u8, CliError> {
    tracing::info!(file = file.unwrap_or("<built-in>"), "Validating configuration");

    let config = match load_config(file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            return Ok(2);
        }
    };

    println!("✓ Configuration is valid");
    println!();
    print_config(&config);

    // Every collaborator a full session could need
    let (planned, _) = config.plan(&[], &[], None)?;
    let mut missing = 0;
    println!();
    println!("Collaborators:");
    for program in config.collaborators(&planned) {
        match find_program(&program) {
            Some(path) => println!("  ✓ {:<10} {}", program, path.display()),
            None => {
                missing += 1;
                println!("  ✗ {:<10} not found", program);
            }
        }
    }

    Ok(if missing == 0 { 0 } else { 2 })
}

fn describe_source(source: &DependencySource) -> String {
    match source {
        DependencySource::Version(version) => format!("crates.io {}", version),
        DependencySource::Path(path) => format!("path {}", path.display()),
        DependencySource::Git { url, rev, .. } => format!("git {}@{}", url, rev),
    }
}

fn print_config(config: &HarnessConfig) {
    println!("Workload:");
    println!("  Manifest:   {}", config.workload.manifest.display());
    println!("  Binary:     {}", config.workload.binary);
    println!("  Arguments:  {}", config.workload.args.join(" "));
    println!("  Snapshots:  {}", config.workload.snapshot_dir);
    println!("  Cache:      {}", config.cache_dir.display());
    println!();
    println!("Profiler:");
    println!("  Command:    {} {}", config.profiler.program, config.profiler.args.join(" "));
    match config.profiler.timeout {
        Some(timeout) => println!("  Timeout:    {}s", timeout.as_secs()),
        None => println!("  Timeout:    none"),
    }
    println!("  Ignoring:   {}", config.extract.ignore.join(", "));
    println!();
    println!("Render:");
    println!(
        "  Size:       {}x{} via {} at {} dpi",
        config.render.width, config.render.height, config.render.rasterizer, config.render.density
    );
    if let Some(crop) = config.render.crop {
        println!("  Crop:       {}", crop);
    }
    println!();
    println!("Candidates ({}):", config.candidates.len());
    for candidate in &config.candidates {
        let providers: Vec<String> = candidate
            .providers
            .keys()
            .map(|p| {
                if *p == candidate.default_provider {
                    format!("{}*", p)
                } else {
                    p.clone()
                }
            })
            .collect();
        println!(
            "  - {} ({}, {}; providers: {})",
            candidate.name,
            candidate.dependency,
            describe_source(&candidate.source),
            providers.join(", ")
        );
    }
    println!();
    println!("Modes ({}):", config.modes.len());
    for mode in &config.modes {
        let flags = mode.flags.join(" ");
        match &mode.snapshot_dir {
            Some(dir) => println!("  - {} [{}] snapshots in {}", mode.name, flags, dir),
            None => println!("  - {} [{}]", mode.name, flags),
        }
    }
}
