// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `tlsmem run` command - Run a benchmark session.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use tlsmem_core::render::chart::format_bytes;
use tlsmem_core::session::RunReport;
use tlsmem_core::tools;
use tlsmem_core::{
    Collaborators, RunFailure, RunStatus, Session, SessionId, SessionOptions, SessionReport,
};

use super::{load_config, CliError};

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Candidates to measure, comma separated (default: all)
    #[arg(long, value_delimiter = ',')]
    pub candidates: Vec<String>,

    /// Modes to run, comma separated (default: all)
    #[arg(long, value_delimiter = ',')]
    pub modes: Vec<String>,

    /// Directory holding session outputs
    #[arg(short, long, default_value = "tlsmem-results")]
    pub output_root: PathBuf,

    /// Session id (default: start time)
    #[arg(long)]
    pub session: Option<String>,

    /// Per-Run timeout in seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Crypto provider for every candidate
    #[arg(long)]
    pub provider: Option<String>,

    /// Keep raw traces after extraction
    #[arg(long)]
    pub keep_traces: bool,
}

pub async fn execute(config_path: Option<&str>, args: RunArgs) -> Result<u8, CliError> {
    let config = load_config(config_path)?;
    let collaborators = Collaborators::from_config(&config);

    let options = SessionOptions {
        candidates: args.candidates,
        modes: args.modes,
        output_root: args.output_root,
        session: args.session.map(SessionId::new).transpose()?,
        timeout: args.timeout.map(Duration::from_secs),
        provider: args.provider,
        keep_traces: args.keep_traces,
    };

    let session = Session::new(config, options)?;
    tools::require_programs(session.required_programs().iter().map(String::as_str))?;

    tracing::info!(
        candidates = session.candidates().len(),
        modes = session.modes().len(),
        "Starting session"
    );

    let report = session.run(collaborators).await?;

    for run in &report.runs {
        report_detail(run);
    }
    for comparison in &report.comparisons {
        if let Some(error) = &comparison.error {
            eprintln!("✗ comparison {}: {}", comparison.mode, error);
        }
    }

    print_summary(&report);
    Ok(report.exit_code())
}

/// Per-Run problems go to stderr.
fn report_detail(run: &RunReport) {
    let name = format!("{}/{}", run.run.candidate, run.run.mode);
    if let RunStatus::Failed { failure } = &run.run.status {
        eprintln!("✗ {}: {}", name, failure);
    }
    if let Some(warning) = &run.truncated {
        eprintln!("⚠ {}: {}", name, warning);
    }
    if let Some(error) = &run.extract_error {
        eprintln!("✗ {}: {}", name, error);
    }
    if let Some(error) = &run.chart_error {
        eprintln!("✗ {}: chart: {}", name, error);
    }
}

fn status_label(run: &RunReport) -> String {
    match &run.run.status {
        RunStatus::Failed { failure } => match failure {
            RunFailure::Build { .. } => "build failed".to_string(),
            RunFailure::Spawn { .. } => "spawn failed".to_string(),
            RunFailure::Exit { code } => format!("exit {}", code),
            RunFailure::Signal { signal } => format!("signal {}", signal),
            RunFailure::Timeout { .. } => "timeout".to_string(),
        },
        RunStatus::Completed if run.extract_error.is_some() => "no samples".to_string(),
        RunStatus::Completed if run.chart_error.is_some() => "chart failed".to_string(),
        RunStatus::Completed if run.truncated.is_some() => "ok (truncated)".to_string(),
        RunStatus::Completed => "ok".to_string(),
    }
}

fn bytes_cell(value: Option<u64>) -> String {
    value.map(format_bytes).unwrap_or_else(|| "-".to_string())
}

fn print_summary(report: &SessionReport) {
    println!("╔══════════════════════════════════════════════════════════════════════════════╗");
    println!("║ SESSION {:<68} ║", report.session.as_str());
    println!("╠════════════════╦════════════╦════════════════╦══════════════╦════════════════╣");
    println!("║ Candidate      ║ Mode       ║ Status         ║ Peak         ║ Final          ║");
    println!("╠════════════════╬════════════╬════════════════╬══════════════╬════════════════╣");

    for run in &report.runs {
        let stats = run.samples.as_ref();
        println!(
            "║ {:<14} ║ {:<10} ║ {:<14} ║ {:<12} ║ {:<14} ║",
            run.run.candidate.as_str(),
            run.run.mode.as_str(),
            status_label(run),
            bytes_cell(stats.and_then(|s| s.peak_bytes)),
            bytes_cell(stats.and_then(|s| s.final_bytes)),
        );
    }

    println!("╚════════════════╩════════════╩════════════════╩══════════════╩════════════════╝");
    println!();

    let ok = report.runs.iter().filter(|r| r.succeeded()).count();
    println!("Runs: {}/{} succeeded", ok, report.runs.len());
    for comparison in &report.comparisons {
        match &comparison.chart {
            Some(chart) => println!("Chart [{}]: {}", comparison.mode, chart.display()),
            None => println!("Chart [{}]: not rendered", comparison.mode),
        }
    }
    println!("Output: {}", report.output_dir.display());
}
