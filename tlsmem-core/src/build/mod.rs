// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Backend selection.
//!
//! Points the workload manifest at one candidate and its crypto provider,
//! then builds the driver. Git sources are fetched first so the manifest
//! only ever refers to versions and local paths.

mod cargo;
mod git;

use std::path::PathBuf;

pub use cargo::{BuildRequest, Builder, CargoBuilder};
pub use git::{Fetcher, GitFetcher};

use crate::config::{DependencySource, PlannedCandidate, WorkloadConfig};
use crate::error::BuildError;
use crate::overlay::{DependencyPatch, ManifestOverlay, ResolvedSource};
use crate::types::CandidateName;

/// A candidate whose driver is built and ready to profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCandidate {
    pub candidate: CandidateName,
    pub provider: String,
    pub fingerprint: u32,
    pub driver: PathBuf,
}

/// Configures the dependency graph for each candidate in turn.
#[derive(Debug)]
pub struct BackendSelector<B, F> {
    workload: WorkloadConfig,
    builder: B,
    fetcher: F,
}

impl<B: Builder, F: Fetcher> BackendSelector<B, F> {
    pub fn new(workload: WorkloadConfig, builder: B, fetcher: F) -> Self {
        Self {
            workload,
            builder,
            fetcher,
        }
    }

    pub fn workload(&self) -> &WorkloadConfig {
        &self.workload
    }

    /// Fetch, patch and build `candidate` with its planned provider.
    pub async fn prepare(
        &self,
        overlay: &mut ManifestOverlay,
        candidate: &PlannedCandidate,
    ) -> Result<PreparedCandidate, BuildError> {
        let patch = self.dependency_patch(candidate).await?;
        let applied = overlay.apply(&patch)?;

        let driver = self
            .builder
            .build(&BuildRequest {
                candidate: candidate.name(),
                provider: &candidate.provider,
                fingerprint: applied.fingerprint,
                manifest: overlay.manifest(),
                binary: &self.workload.binary,
            })
            .await?;

        tracing::info!(
            candidate = %candidate.name(),
            provider = %candidate.provider,
            driver = %driver.display(),
            "Candidate prepared"
        );

        Ok(PreparedCandidate {
            candidate: candidate.name().clone(),
            provider: candidate.provider.clone(),
            fingerprint: applied.fingerprint,
            driver,
        })
    }

    /// Resolve sources and merge candidate and provider features.
    pub async fn dependency_patch(
        &self,
        candidate: &PlannedCandidate,
    ) -> Result<DependencyPatch, BuildError> {
        let config = &candidate.config;

        let source = self.resolve(&config.source).await?;

        let mut patches = Vec::with_capacity(candidate.binding.patches.len());
        for (krate, source) in &candidate.binding.patches {
            patches.push((krate.clone(), self.resolve(source).await?));
        }

        let mut features = config.features.clone();
        for feature in &candidate.binding.features {
            if !features.contains(feature) {
                features.push(feature.clone());
            }
        }

        Ok(DependencyPatch {
            candidate: config.name.clone(),
            provider: candidate.provider.clone(),
            dependency: config.dependency.clone(),
            source,
            default_features: config.default_features,
            features,
            patches,
        })
    }

    async fn resolve(&self, source: &DependencySource) -> Result<ResolvedSource, BuildError> {
        let path = match source {
            DependencySource::Version(version) => {
                return Ok(ResolvedSource::Version(version.clone()))
            }
            DependencySource::Path(path) => path.clone(),
            DependencySource::Git { url, rev, subdir } => {
                let checkout = self.fetcher.fetch(url, rev).await?;
                match subdir {
                    Some(subdir) => checkout.join(subdir),
                    None => checkout,
                }
            }
        };

        // Cargo resolves manifest paths against the manifest's directory
        std::path::absolute(&path)
            .map(ResolvedSource::Path)
            .map_err(|e| BuildError::Io {
                context: "resolve dependency path",
                path,
                source: e,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;
    use std::cell::RefCell;
    use std::path::Path;
    use tempfile::TempDir;

    struct RecordingBuilder {
        requests: RefCell<Vec<(String, u32)>>,
    }

    impl Builder for RecordingBuilder {
        async fn build(&self, request: &BuildRequest<'_>) -> Result<PathBuf, BuildError> {
            self.requests
                .borrow_mut()
                .push((request.candidate.to_string(), request.fingerprint));
            Ok(PathBuf::from("/bin/true"))
        }
    }

    struct FixedFetcher;

    impl Fetcher for FixedFetcher {
        async fn fetch(&self, _url: &str, rev: &str) -> Result<PathBuf, BuildError> {
            Ok(Path::new("/checkouts").join(rev))
        }
    }

    const CONFIG: &str = r#"
workload: { manifest: Cargo.toml, binary: memory }
candidates:
  - name: rustls
    dependency: rustls
    source: { git: "https://github.com/rustls/rustls", rev: v1, subdir: rustls }
    default_features: false
    features: [std]
    crypto:
      default: aws-lc
      providers:
        aws-lc:
          features: [aws_lc_rs, std]
          patches:
            aws-lc-rs: { path: /src/aws-lc-rs }
  - name: openssl
    dependency: openssl
    source: { version: "0.10" }
    crypto: { default: vendored, providers: { vendored: { features: [vendored] } } }
modes:
  - { name: pair }
"#;

    #[tokio::test]
    async fn test_dependency_patch_resolves_git_and_merges_features() {
        let config = ConfigLoader::load_string(CONFIG).unwrap();
        let (planned, _) = config.plan(&[], &[], None).unwrap();
        let selector = BackendSelector::new(
            config.workload.clone(),
            RecordingBuilder {
                requests: RefCell::new(Vec::new()),
            },
            FixedFetcher,
        );

        let patch = selector.dependency_patch(&planned[0]).await.unwrap();
        assert_eq!(
            patch.source,
            ResolvedSource::Path(PathBuf::from("/checkouts/v1/rustls"))
        );
        assert_eq!(patch.features, vec!["std".to_string(), "aws_lc_rs".to_string()]);
        assert!(!patch.default_features);
        assert_eq!(
            patch.patches,
            vec![(
                "aws-lc-rs".to_string(),
                ResolvedSource::Path(PathBuf::from("/src/aws-lc-rs"))
            )]
        );
    }

    #[tokio::test]
    async fn test_prepare_applies_overlay_and_builds() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("Cargo.toml");
        std::fs::write(
            &manifest,
            "[package]\nname = \"bench\"\n\n\
             [dependencies]\nrustls = \"0.23\"\nopenssl = \"0.10\"\n",
        )
        .unwrap();

        let config = ConfigLoader::load_string(CONFIG).unwrap();
        let (planned, _) = config.plan(&[], &[], None).unwrap();
        let selector = BackendSelector::new(
            config.workload.clone(),
            RecordingBuilder {
                requests: RefCell::new(Vec::new()),
            },
            FixedFetcher,
        );

        let mut overlay = ManifestOverlay::acquire(&manifest).unwrap();
        let rustls = selector.prepare(&mut overlay, &planned[0]).await.unwrap();
        let openssl = selector.prepare(&mut overlay, &planned[1]).await.unwrap();
        overlay.release().unwrap();

        assert_eq!(rustls.provider, "aws-lc");
        assert_eq!(openssl.provider, "vendored");
        assert_ne!(rustls.fingerprint, openssl.fingerprint);

        let requests = selector.builder.requests.borrow();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], ("rustls".to_string(), rustls.fingerprint));
    }
}
