// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for tlsmem.
//!
//! Every failure is an explicit enum variant. Errors scoped to a single
//! (candidate, mode) pair are recorded in the run report and never abort the
//! batch; only [`HarnessError`] aborts a session.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::CandidateName;

/// Session-level errors. Any of these aborts the whole session.
#[derive(Debug, Error)]
pub enum HarnessError {
    // =========================================================================
    // Configuration Errors - Fail-Fast Before Any Run Starts
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // =========================================================================
    // Shared State - Session Lock and Manifest Overlay
    // =========================================================================
    #[error("Session lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Output collision: {path} already holds results from an earlier run")]
    OutputCollision { path: PathBuf },

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} ({path}) - {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {context} - {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl HarnessError {
    /// Process exit code for this error: 2 for configuration problems,
    /// 1 for everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            _ => 1,
        }
    }
}

/// Configuration errors. Always fatal, raised before any Run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    Parse { message: String },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Duplicate {kind} name: {name}")]
    Duplicate { kind: &'static str, name: String },

    #[error("At least one {kind} must be defined")]
    Empty { kind: &'static str },

    #[error("Unknown candidate: {name}")]
    UnknownCandidate { name: String },

    #[error("Unknown mode: {name}")]
    UnknownMode { name: String },

    #[error("Candidate {candidate} has no crypto provider named {provider}")]
    UnknownProvider { candidate: String, provider: String },

    #[error("Required collaborator not found on PATH: {program}")]
    MissingCollaborator { program: String },
}

/// Session lock acquisition and release errors.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock {path} is held by running process {pid}")]
    Held { path: PathBuf, pid: i32 },

    #[error("Failed to create lock {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to release lock {path}: {source}")]
    Release {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Workload manifest overlay errors.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Workload manifest not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Failed to parse manifest {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Manifest {path} does not declare dependency '{dependency}'")]
    MissingDependency { path: PathBuf, dependency: String },

    #[error("Manifest {path}: '{key}' is not a table")]
    NotATable { path: PathBuf, key: String },

    #[error("Failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Manifest {path} is patched for {candidate}/{provider} but its pristine copy is gone")]
    NoPristine {
        path: PathBuf,
        candidate: String,
        provider: String,
    },

    #[error("Failed to restore original manifest {path}: {source}")]
    Restore {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Candidate preparation errors (fetch, overlay, compile).
///
/// Fatal for the candidate only: every mode of that candidate is marked
/// failed and the other candidates proceed.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Fetch of {url}@{rev} failed: {log}")]
    Fetch { url: String, rev: String, log: String },

    #[error("Build of {candidate} failed:\n{log}")]
    Compile { candidate: CandidateName, log: String },

    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("Overlay failed: {0}")]
    Overlay(#[from] ManifestError),

    #[error("IO error: {context} ({path}) - {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a single Run failed. Recorded in the report, never aborts the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunFailure {
    #[error("build failed: {reason}")]
    Build { reason: String },

    #[error("could not start profiler: {reason}")]
    Spawn { reason: String },

    #[error("exited with status {code}")]
    Exit { code: i32 },

    #[error("killed by signal {signal}")]
    Signal { signal: i32 },

    #[error("timed out after {after_secs}s")]
    Timeout { after_secs: u64 },
}

/// Trace extraction errors. The affected Run is left out of rendering.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("No trace files found in {dir}")]
    Missing { dir: PathBuf },

    #[error("Unparseable trace {path}: {reason}")]
    Unparseable { path: PathBuf, reason: String },

    #[error("Failed to read trace {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Chart rendering and rasterization errors.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("No drawable series for mode {mode}")]
    NoSeries { mode: String },

    #[error("Series for mode {found} cannot join a set for mode {expected}")]
    ModeMismatch { expected: String, found: String },

    #[error("Crop region {region} does not fit a {width}x{height} image")]
    CropOutOfBounds {
        region: String,
        width: u32,
        height: u32,
    },

    #[error("Malformed raster: {reason}")]
    MalformedRaster { reason: String },

    #[error("Rasterizer {program} failed: {reason}")]
    Rasterizer { program: String, reason: String },

    #[error("Failed to format chart: {0}")]
    Format(#[from] std::fmt::Error),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias using HarnessError.
pub type HarnessResult<T> = Result<T, HarnessError>;
