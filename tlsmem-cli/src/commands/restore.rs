// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `tlsmem restore` command - Undo a manifest overlay left by a crash.

use tlsmem_core::overlay::{recover, Recovery};

use super::CliError;

pub fn execute(manifest: &str) -> Result<u8, CliError> {
    tracing::info!(manifest = %manifest, "Restoring manifest");

    match recover(manifest)? {
        Recovery::Restored => println!("✓ Restored {}", manifest),
        Recovery::Clean => println!("✓ {} is not patched, nothing to restore", manifest),
    }
    Ok(0)
}
