// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

pub mod extract;
pub mod restore;
pub mod run;
pub mod validate;

use thiserror::Error;
use tlsmem_core::error::{ConfigError, ManifestError, TraceError};
use tlsmem_core::{ConfigLoader, HarnessConfig, HarnessError};

/// Errors surfaced by a command.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Harness(#[from] HarnessError),

    #[error("Trace error: {0}")]
    Trace(#[from] TraceError),

    #[error("Failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::Harness(e.into())
    }
}

impl From<ManifestError> for CliError {
    fn from(e: ManifestError) -> Self {
        Self::Harness(e.into())
    }
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Harness(e) => e.exit_code(),
            _ => 1,
        }
    }
}

/// The file at `path`, or the built-in configuration.
pub fn load_config(path: Option<&str>) -> Result<HarnessConfig, ConfigError> {
    match path {
        Some(path) => ConfigLoader::load_file(path),
        None => ConfigLoader::builtin(),
    }
}
