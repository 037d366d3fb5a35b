// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Benchmark sessions.
//!
//! A session takes the output-root lock, overlays the workload manifest,
//! runs the matrix, restores the manifest, then extracts samples and renders
//! per-Run and per-mode charts. The report it returns enumerates every Run's
//! outcome; only session-level failures surface as errors.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::build::{BackendSelector, Builder, CargoBuilder, Fetcher, GitFetcher};
use crate::config::{HarnessConfig, ModeConfig, PlannedCandidate};
use crate::error::{HarnessError, HarnessResult};
use crate::layout::{SessionLayout, SAMPLES_FILE};
use crate::lock::SessionLock;
use crate::orchestrator::{Orchestrator, Run, RunStatus};
use crate::overlay::ManifestOverlay;
use crate::profiler::{CommandProfiler, Profiler};
use crate::render::{MagickRasterizer, Rasterizer, Renderer, SeriesSet};
use crate::trace::{self, Samples, TruncatedTraceWarning};
use crate::types::{CandidateName, ModeName, SessionId, TimeUnit};

/// Per-invocation choices layered over the configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Candidate names; empty means all.
    pub candidates: Vec<String>,
    /// Mode names; empty means all.
    pub modes: Vec<String>,
    pub output_root: PathBuf,
    /// Defaults to the start time.
    pub session: Option<SessionId>,
    /// Overrides the configured per-Run timeout.
    pub timeout: Option<Duration>,
    /// Overrides every candidate's default crypto provider.
    pub provider: Option<String>,
    /// Keep raw traces after extraction.
    pub keep_traces: bool,
}

/// The external programs a session drives.
#[derive(Debug, Clone)]
pub struct Collaborators<B, F, P, R> {
    pub builder: B,
    pub fetcher: F,
    pub profiler: P,
    pub rasterizer: R,
}

impl Collaborators<CargoBuilder, GitFetcher, CommandProfiler, MagickRasterizer> {
    /// `cargo`, `git`, the configured profiler and `magick`.
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            builder: CargoBuilder::new(config.tools.cargo.clone(), config.cache_dir.clone()),
            fetcher: GitFetcher::new(config.tools.git.clone(), config.cache_dir.clone()),
            profiler: CommandProfiler::from_config(&config.profiler),
            rasterizer: MagickRasterizer::new(
                config.render.rasterizer.clone(),
                config.render.density,
            ),
        }
    }
}

/// Heap statistics of one Run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSummary {
    pub count: usize,
    pub time_unit: TimeUnit,
    pub baseline_bytes: Option<u64>,
    pub peak_bytes: Option<u64>,
    pub final_bytes: Option<u64>,
    pub mean_growth_bytes: Option<f64>,
}

impl From<&Samples> for SampleSummary {
    fn from(samples: &Samples) -> Self {
        Self {
            count: samples.len(),
            time_unit: samples.time_unit,
            baseline_bytes: samples.baseline(),
            peak_bytes: samples.peak(),
            final_bytes: samples.final_heap(),
            mean_growth_bytes: samples.mean_growth(),
        }
    }
}

/// A Run with what was extracted and rendered from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(flatten)]
    pub run: Run,
    pub samples: Option<SampleSummary>,
    pub truncated: Option<TruncatedTraceWarning>,
    pub extract_error: Option<String>,
    pub chart: Option<PathBuf>,
    pub chart_error: Option<String>,
}

impl RunReport {
    /// Completed, extracted and charted.
    pub fn succeeded(&self) -> bool {
        self.run.status.is_completed() && self.extract_error.is_none() && self.chart_error.is_none()
    }
}

/// The cross-candidate chart for one mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub mode: ModeName,
    pub candidates: Vec<CandidateName>,
    pub chart: Option<PathBuf>,
    pub error: Option<String>,
}

/// Everything a session produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session: SessionId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub output_dir: PathBuf,
    pub runs: Vec<RunReport>,
    pub comparisons: Vec<ComparisonReport>,
}

impl SessionReport {
    pub fn success(&self) -> bool {
        self.runs.iter().all(RunReport::succeeded)
            && self.comparisons.iter().all(|c| c.error.is_none())
    }

    /// 0 when every Run succeeded and every chart rendered, else 1.
    pub fn exit_code(&self) -> u8 {
        if self.success() {
            0
        } else {
            1
        }
    }
}

/// A planned benchmark session.
#[derive(Debug)]
pub struct Session {
    config: HarnessConfig,
    options: SessionOptions,
    candidates: Vec<PlannedCandidate>,
    modes: Vec<ModeConfig>,
}

impl Session {
    /// Resolve the selection against the configuration.
    pub fn new(config: HarnessConfig, options: SessionOptions) -> HarnessResult<Self> {
        let (candidates, modes) = config.plan(
            &options.candidates,
            &options.modes,
            options.provider.as_deref(),
        )?;
        Ok(Self {
            config,
            options,
            candidates,
            modes,
        })
    }

    pub fn candidates(&self) -> &[PlannedCandidate] {
        &self.candidates
    }

    pub fn modes(&self) -> &[ModeConfig] {
        &self.modes
    }

    /// External programs this session will run.
    pub fn required_programs(&self) -> Vec<String> {
        self.config.collaborators(&self.candidates)
    }

    /// Run the session to completion.
    pub async fn run<B, F, P, R>(
        self,
        tools: Collaborators<B, F, P, R>,
    ) -> HarnessResult<SessionReport>
    where
        B: Builder,
        F: Fetcher,
        P: Profiler,
        R: Rasterizer,
    {
        let started_at = Utc::now();
        let session = self
            .options
            .session
            .clone()
            .unwrap_or_else(|| SessionId::from_time(started_at));
        let layout = SessionLayout::new(&self.options.output_root, &session);

        // Taken before the overlay: a concurrent session must fail before
        // it touches the manifest
        let lock = SessionLock::acquire(layout.lock_path())?;
        layout.check_collisions(&self.candidates, &self.modes)?;

        tracing::info!(
            session = %session,
            output = %layout.session_dir().display(),
            candidates = self.candidates.len(),
            modes = self.modes.len(),
            "Session started"
        );

        let mut overlay = ManifestOverlay::acquire(&self.config.workload.manifest)?;
        let runs = {
            let mut orchestrator = Orchestrator::new(
                &layout,
                &mut overlay,
                BackendSelector::new(self.config.workload.clone(), tools.builder, tools.fetcher),
                tools.profiler,
                self.options.timeout.or(self.config.profiler.timeout),
            );
            orchestrator.run_all(&self.candidates, &self.modes).await?
        };

        // A manifest left patched would poison the next build
        overlay.release()?;

        let renderer = Renderer::new(tools.rasterizer, &self.config.render);
        let mut reports = Vec::with_capacity(runs.len());
        let mut extracted: Vec<(ModeName, CandidateName, Samples)> = Vec::new();

        for run in runs {
            let (report, samples) = self.report_run(run, &renderer).await?;
            if let Some(samples) = samples {
                extracted.push((report.run.mode.clone(), report.run.candidate.clone(), samples));
            }
            reports.push(report);
        }

        let mut comparisons = Vec::with_capacity(self.modes.len());
        for mode in &self.modes {
            comparisons.push(self.compare_mode(&mode.name, &extracted, &layout, &renderer).await?);
        }

        let report = SessionReport {
            session,
            started_at,
            finished_at: Utc::now(),
            output_dir: layout.session_dir().to_path_buf(),
            runs: reports,
            comparisons,
        };

        write_json(&layout.summary_path(), &report, "write session summary")?;
        lock.release()?;

        tracing::info!(
            session = %report.session,
            success = report.success(),
            "Session finished"
        );

        Ok(report)
    }

    /// Extract the Run's samples and chart them on their own.
    async fn report_run<R: Rasterizer>(
        &self,
        run: Run,
        renderer: &Renderer<R>,
    ) -> HarnessResult<(RunReport, Option<Samples>)> {
        let mut report = RunReport {
            run,
            samples: None,
            truncated: None,
            extract_error: None,
            chart: None,
            chart_error: None,
        };

        if !report.run.status.is_completed() {
            return Ok((report, None));
        }

        let Some(handle) = report.run.trace.clone() else {
            let dir = report.run.output_dir.display();
            report.extract_error = Some(format!("no trace files in {}", dir));
            return Ok((report, None));
        };

        let samples = match trace::extract(&handle, &self.config.extract) {
            Ok(samples) => samples,
            Err(e) => {
                tracing::error!(
                    candidate = %report.run.candidate,
                    mode = %report.run.mode,
                    error = %e,
                    "Trace extraction failed"
                );
                report.extract_error = Some(e.to_string());
                return Ok((report, None));
            }
        };

        write_json(
            &report.run.output_dir.join(SAMPLES_FILE),
            &samples,
            "write samples",
        )?;

        if !self.options.keep_traces {
            if let Err(e) = handle.remove() {
                tracing::warn!(error = %e, "Failed to discard raw trace");
            }
        }

        report.samples = Some(SampleSummary::from(&samples));
        report.truncated = samples.warning.clone();

        let mut single = SeriesSet::new(report.run.mode.clone());
        let title = format!("{} / {}", report.run.candidate, report.run.mode);
        let inserted = single.insert(
            &report.run.mode,
            report.run.candidate.clone(),
            samples.clone(),
        );
        let written = match inserted {
            Ok(()) => {
                renderer
                    .write_chart(&single, &title, &report.run.output_dir, "chart")
                    .await
            }
            Err(e) => Err(e),
        };
        match written {
            Ok(files) => report.chart = Some(files.png),
            Err(e) => {
                tracing::error!(chart = %title, error = %e, "Chart failed");
                report.chart_error = Some(e.to_string());
            }
        }

        Ok((report, Some(samples)))
    }

    async fn compare_mode<R: Rasterizer>(
        &self,
        mode: &ModeName,
        extracted: &[(ModeName, CandidateName, Samples)],
        layout: &SessionLayout,
        renderer: &Renderer<R>,
    ) -> HarnessResult<ComparisonReport> {
        let mut set = SeriesSet::new(mode.clone());
        for (run_mode, candidate, samples) in extracted.iter().filter(|(m, _, _)| m == mode) {
            if let Err(e) = set.insert(run_mode, candidate.clone(), samples.clone()) {
                tracing::error!(mode = %mode, error = %e, "Series rejected");
            }
        }

        let candidates = set.candidates();
        let result = renderer
            .write_chart(&set, mode.as_str(), &layout.comparison_dir(), mode.as_str())
            .await;

        Ok(match result {
            Ok(files) => ComparisonReport {
                mode: mode.clone(),
                candidates,
                chart: Some(files.png),
                error: None,
            },
            Err(e) => {
                tracing::error!(mode = %mode, error = %e, "Comparison chart failed");
                ComparisonReport {
                    mode: mode.clone(),
                    candidates,
                    chart: None,
                    error: Some(e.to_string()),
                }
            }
        })
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T, context: &'static str) -> HarnessResult<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| HarnessError::Json { context, source: e })?;
    fs::write(path, json).map_err(|e| HarnessError::Io {
        context,
        path: path.to_path_buf(),
        source: e,
    })
}
