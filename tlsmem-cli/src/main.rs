// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! tlsmem CLI
//!
//! Command-line interface for the tlsmem TLS memory harness.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// tlsmem - Heap-memory comparison harness for TLS libraries
#[derive(Parser)]
#[command(name = "tlsmem")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (built-in defaults when omitted)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build, profile and chart every candidate in every mode
    Run(commands::run::RunArgs),

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file (defaults to --config)
        file: Option<String>,
    },

    /// Extract heap samples from a massif trace
    Extract {
        /// Trace file, or a Run directory holding traces
        trace: String,

        /// Print samples as JSON
        #[arg(long)]
        json: bool,
    },

    /// Restore a workload manifest left patched by an interrupted session
    Restore {
        /// Path to the workload Cargo.toml
        manifest: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over -v
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Dispatch to command handlers
    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(cli.config.as_deref(), args).await,
        Commands::Validate { file } => {
            commands::validate::execute(file.as_deref().or(cli.config.as_deref()))
        }
        Commands::Extract { trace, json } => {
            commands::extract::execute(cli.config.as_deref(), &trace, json)
        }
        Commands::Restore { manifest } => commands::restore::execute(&manifest),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("✗ {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
