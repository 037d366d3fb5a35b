// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! On-disk layout of a session.
//!
//! ```text
//! <output root>/
//!   .tlsmem.lock
//!   <session id>/
//!     runs/<candidate>/<mode>/   trace, samples.json, chart.svg, chart.png
//!     comparison/<mode>.svg
//!     comparison/<mode>.png
//!     summary.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{ModeConfig, PlannedCandidate};
use crate::error::{HarnessError, HarnessResult};
use crate::types::{CandidateName, ModeName, SessionId};

/// Session lock file name, one per output root.
pub const LOCK_FILE: &str = ".tlsmem.lock";

/// Extracted samples of a Run.
pub const SAMPLES_FILE: &str = "samples.json";

/// Serialized session report.
pub const SUMMARY_FILE: &str = "summary.json";

/// Paths of one session under an output root.
#[derive(Debug, Clone)]
pub struct SessionLayout {
    output_root: PathBuf,
    session_dir: PathBuf,
}

impl SessionLayout {
    pub fn new(output_root: impl Into<PathBuf>, session: &SessionId) -> Self {
        let output_root = output_root.into();
        let session_dir = output_root.join(session.as_str());
        Self {
            output_root,
            session_dir,
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn lock_path(&self) -> PathBuf {
        self.output_root.join(LOCK_FILE)
    }

    pub fn run_dir(&self, candidate: &CandidateName, mode: &ModeName) -> PathBuf {
        self.session_dir
            .join("runs")
            .join(candidate.as_str())
            .join(mode.as_str())
    }

    pub fn comparison_dir(&self) -> PathBuf {
        self.session_dir.join("comparison")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.session_dir.join(SUMMARY_FILE)
    }

    /// Fail if any Run of the matrix, or the summary, would overwrite
    /// earlier results.
    pub fn check_collisions(
        &self,
        candidates: &[PlannedCandidate],
        modes: &[ModeConfig],
    ) -> HarnessResult<()> {
        let summary = self.summary_path();
        if summary.exists() {
            return Err(HarnessError::OutputCollision { path: summary });
        }

        for candidate in candidates {
            for mode in modes {
                let dir = self.run_dir(candidate.name(), &mode.name);
                if is_occupied(&dir) {
                    return Err(HarnessError::OutputCollision { path: dir });
                }
            }
        }
        Ok(())
    }

    /// Create the Run directory, refusing one that already holds output.
    pub fn create_run_dir(
        &self,
        candidate: &CandidateName,
        mode: &ModeName,
    ) -> HarnessResult<PathBuf> {
        let dir = self.run_dir(candidate, mode);
        if is_occupied(&dir) {
            return Err(HarnessError::OutputCollision { path: dir });
        }

        fs::create_dir_all(&dir).map_err(|e| HarnessError::Io {
            context: "create run directory",
            path: dir.clone(),
            source: e,
        })?;
        Ok(dir)
    }
}

fn is_occupied(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;
    use tempfile::TempDir;

    fn layout(root: &Path) -> SessionLayout {
        SessionLayout::new(root, &SessionId::new("s1").unwrap())
    }

    #[test]
    fn test_paths() {
        let layout = layout(Path::new("/out"));
        let candidate = CandidateName::new("rustls").unwrap();
        let mode = ModeName::new("pair").unwrap();

        assert_eq!(layout.lock_path(), PathBuf::from("/out/.tlsmem.lock"));
        assert_eq!(
            layout.run_dir(&candidate, &mode),
            PathBuf::from("/out/s1/runs/rustls/pair")
        );
        assert_eq!(layout.comparison_dir(), PathBuf::from("/out/s1/comparison"));
        assert_eq!(layout.summary_path(), PathBuf::from("/out/s1/summary.json"));
    }

    #[test]
    fn test_create_run_dir_rejects_non_empty() {
        let dir = TempDir::new().unwrap();
        let layout = layout(dir.path());
        let candidate = CandidateName::new("rustls").unwrap();
        let mode = ModeName::new("pair").unwrap();

        let run_dir = layout.create_run_dir(&candidate, &mode).unwrap();
        // An empty directory is not a collision
        assert!(layout.create_run_dir(&candidate, &mode).is_ok());

        fs::write(run_dir.join("massif.out"), "desc: x\n").unwrap();
        assert!(matches!(
            layout.create_run_dir(&candidate, &mode),
            Err(HarnessError::OutputCollision { .. })
        ));
    }

    #[test]
    fn test_check_collisions_over_matrix() {
        let dir = TempDir::new().unwrap();
        let layout = layout(dir.path());
        let config = ConfigLoader::builtin().unwrap();
        let (candidates, modes) = config.plan(&[], &[], None).unwrap();

        assert!(layout.check_collisions(&candidates, &modes).is_ok());

        let last = layout.run_dir(candidates[2].name(), &modes[2].name);
        fs::create_dir_all(&last).unwrap();
        fs::write(last.join("samples.json"), "{}").unwrap();

        match layout.check_collisions(&candidates, &modes) {
            Err(HarnessError::OutputCollision { path }) => assert_eq!(path, last),
            other => panic!("expected collision, got {:?}", other),
        }
    }
}
