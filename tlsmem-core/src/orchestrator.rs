// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Profiling orchestration.
//!
//! Runs the (candidate, mode) matrix sequentially: candidates in input order,
//! modes in input order within each candidate. Each candidate is prepared
//! once. A failure of one Run is recorded in its status and the batch moves
//! on; only output collisions and I/O errors on the session tree abort.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::build::{BackendSelector, Builder, Fetcher, PreparedCandidate};
use crate::config::{ModeConfig, PlannedCandidate};
use crate::error::{HarnessResult, RunFailure};
use crate::layout::SessionLayout;
use crate::overlay::ManifestOverlay;
use crate::profiler::{
    ProfileExit, ProfileRequest, Profiler, ENV_CANDIDATE, ENV_MODE, ENV_OUTPUT_DIR,
    ENV_SNAPSHOT_DIR,
};
use crate::trace::TraceHandle;
use crate::types::{CandidateName, ModeName};

/// Trace file the profiler is pointed at inside a Run directory.
pub const TRACE_FILE: &str = "massif.out";

/// Outcome of a Run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed { failure: RunFailure },
}

impl RunStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// One (candidate, mode) execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub candidate: CandidateName,
    pub mode: ModeName,
    pub provider: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub output_dir: PathBuf,
    #[serde(flatten)]
    pub status: RunStatus,
    #[serde(skip)]
    pub trace: Option<TraceHandle>,
}

/// Drives the workload under the profiler for every (candidate, mode) pair.
pub struct Orchestrator<'a, B, F, P> {
    layout: &'a SessionLayout,
    overlay: &'a mut ManifestOverlay,
    selector: BackendSelector<B, F>,
    profiler: P,
    timeout: Option<Duration>,
}

impl<'a, B: Builder, F: Fetcher, P: Profiler> Orchestrator<'a, B, F, P> {
    pub fn new(
        layout: &'a SessionLayout,
        overlay: &'a mut ManifestOverlay,
        selector: BackendSelector<B, F>,
        profiler: P,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            layout,
            overlay,
            selector,
            profiler,
            timeout,
        }
    }

    /// Run the full matrix. Returns exactly one Run per (candidate, mode).
    pub async fn run_all(
        &mut self,
        candidates: &[PlannedCandidate],
        modes: &[ModeConfig],
    ) -> HarnessResult<Vec<Run>> {
        self.layout.check_collisions(candidates, modes)?;

        let mut runs = Vec::with_capacity(candidates.len() * modes.len());

        for candidate in candidates {
            match self.selector.prepare(&mut *self.overlay, candidate).await {
                Ok(prepared) => {
                    for mode in modes {
                        runs.push(self.run_one(&prepared, mode).await?);
                    }
                }
                Err(e) => {
                    tracing::error!(
                        candidate = %candidate.name(),
                        provider = %candidate.provider,
                        error = %e,
                        "Candidate preparation failed, skipping its modes"
                    );
                    let reason = e.to_string();
                    for mode in modes {
                        runs.push(Run {
                            candidate: candidate.name().clone(),
                            mode: mode.name.clone(),
                            provider: candidate.provider.clone(),
                            started_at: Utc::now(),
                            elapsed_ms: 0,
                            output_dir: self.layout.run_dir(candidate.name(), &mode.name),
                            status: RunStatus::Failed {
                                failure: RunFailure::Build {
                                    reason: reason.clone(),
                                },
                            },
                            trace: None,
                        });
                    }
                }
            }
        }

        Ok(runs)
    }

    async fn run_one(&self, prepared: &PreparedCandidate, mode: &ModeConfig) -> HarnessResult<Run> {
        let candidate = &prepared.candidate;
        let output_dir = self.layout.create_run_dir(candidate, &mode.name)?;
        let workload = self.selector.workload();
        let snapshot_dir = workload.snapshot_dir(candidate, mode);

        let request = ProfileRequest {
            driver: prepared.driver.clone(),
            args: workload.driver_args(candidate, mode),
            output_dir: output_dir.clone(),
            trace_path: output_dir.join(TRACE_FILE),
            env: vec![
                (ENV_OUTPUT_DIR.to_string(), output_dir.to_string_lossy().into_owned()),
                (
                    ENV_SNAPSHOT_DIR.to_string(),
                    output_dir.join(&snapshot_dir).to_string_lossy().into_owned(),
                ),
                (ENV_CANDIDATE.to_string(), candidate.to_string()),
                (ENV_MODE.to_string(), mode.name.to_string()),
            ],
            timeout: self.timeout,
        };

        tracing::info!(candidate = %candidate, mode = %mode.name, "Run started");

        let started_at = Utc::now();
        let start = Instant::now();
        let exit = self.profiler.profile(&request).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let status = match exit {
            Ok(exit) if exit.success() => RunStatus::Completed,
            Ok(ProfileExit::Exited { code }) => RunStatus::Failed {
                failure: RunFailure::Exit { code },
            },
            Ok(ProfileExit::Signaled { signal }) => RunStatus::Failed {
                failure: RunFailure::Signal { signal },
            },
            Ok(ProfileExit::TimedOut { after }) => {
                // Partial output would pass for a complete Run
                if let Err(e) = fs::remove_dir_all(&output_dir) {
                    tracing::warn!(
                        path = %output_dir.display(),
                        error = %e,
                        "Failed to remove timed-out run directory"
                    );
                }
                RunStatus::Failed {
                    failure: RunFailure::Timeout {
                        after_secs: after.as_secs(),
                    },
                }
            }
            Err(e) => RunStatus::Failed {
                failure: RunFailure::Spawn { reason: e.to_string() },
            },
        };

        let trace = match &status {
            RunStatus::Completed => match TraceHandle::discover_in(&output_dir, &snapshot_dir) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!(
                        candidate = %candidate,
                        mode = %mode.name,
                        error = %e,
                        "No trace"
                    );
                    None
                }
            },
            RunStatus::Failed { .. } => None,
        };

        match &status {
            RunStatus::Completed => tracing::info!(
                candidate = %candidate,
                mode = %mode.name,
                elapsed_ms,
                "Run completed"
            ),
            RunStatus::Failed { failure } => tracing::error!(
                candidate = %candidate,
                mode = %mode.name,
                elapsed_ms,
                failure = %failure,
                "Run failed"
            ),
        }

        Ok(Run {
            candidate: candidate.clone(),
            mode: mode.name.clone(),
            provider: prepared.provider.clone(),
            started_at,
            elapsed_ms,
            output_dir,
            status,
            trace,
        })
    }
}
