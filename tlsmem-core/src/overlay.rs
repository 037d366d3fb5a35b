// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Scoped overlay over the workload's `Cargo.toml`.
//!
//! The same driver source is linked against each candidate by rewriting its
//! manifest. Every patch starts from the pristine text saved at acquisition,
//! so applying the same candidate twice yields the same bytes, and releasing
//! the overlay puts the original bytes back. An overlay that is dropped
//! without [`ManifestOverlay::release`] restores on a best-effort basis.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use toml_edit::{Array, DocumentMut, InlineTable, Item, Table, Value};

use crate::error::ManifestError;
use crate::lock::SessionLock;
use crate::types::CandidateName;

/// Suffix of the saved pristine manifest.
const PRISTINE_SUFFIX: &str = ".tlsmem-orig";

/// Suffix of the manifest lock file.
const LOCK_SUFFIX: &str = ".tlsmem.lock";

/// Metadata table recording which overlay is applied.
const SENTINEL_TABLE: &str = "tlsmem";

/// A dependency source after any git fetch has been resolved to a checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
    Version(String),
    Path(PathBuf),
}

/// Everything needed to point the manifest at one candidate and provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyPatch {
    pub candidate: CandidateName,
    pub provider: String,
    /// Key of the TLS dependency in `[dependencies]`.
    pub dependency: String,
    pub source: ResolvedSource,
    pub default_features: bool,
    pub features: Vec<String>,
    /// `[patch.crates-io]` entries for the crypto crates.
    pub patches: Vec<(String, ResolvedSource)>,
}

/// Result of applying a patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedOverlay {
    pub candidate: CandidateName,
    pub provider: String,
    /// CRC32 of the patched manifest text; keys the build cache.
    pub fingerprint: u32,
    /// False when the manifest already held the patched text.
    pub written: bool,
}

/// Exclusive, restorable overlay over one manifest.
#[derive(Debug)]
pub struct ManifestOverlay {
    manifest: PathBuf,
    pristine_path: PathBuf,
    original: Vec<u8>,
    lock: Option<SessionLock>,
    released: bool,
}

impl ManifestOverlay {
    /// Lock the manifest and save its pristine content.
    ///
    /// If a pristine copy from an interrupted session is still on disk, it
    /// is taken as the original and the manifest will be restored from it.
    pub fn acquire(manifest: impl Into<PathBuf>) -> Result<Self, ManifestError> {
        let manifest = manifest.into();

        if !manifest.is_file() {
            return Err(ManifestError::NotFound { path: manifest });
        }

        let lock = SessionLock::acquire(with_suffix(&manifest, LOCK_SUFFIX))?;
        let pristine_path = with_suffix(&manifest, PRISTINE_SUFFIX);

        let original = if pristine_path.exists() {
            tracing::warn!(
                manifest = %manifest.display(),
                pristine = %pristine_path.display(),
                "Recovering manifest left patched by an earlier session"
            );
            fs::read(&pristine_path).map_err(|e| ManifestError::Io {
                action: "read pristine copy",
                path: pristine_path.clone(),
                source: e,
            })?
        } else {
            let original = fs::read(&manifest).map_err(|e| ManifestError::Io {
                action: "read",
                path: manifest.clone(),
                source: e,
            })?;
            fs::write(&pristine_path, &original).map_err(|e| ManifestError::Io {
                action: "save pristine copy",
                path: pristine_path.clone(),
                source: e,
            })?;
            original
        };

        tracing::info!(manifest = %manifest.display(), "Manifest overlay acquired");

        Ok(Self {
            manifest,
            pristine_path,
            original,
            lock: Some(lock),
            released: false,
        })
    }

    /// Path of the manifest under overlay.
    pub fn manifest(&self) -> &Path {
        &self.manifest
    }

    /// Pristine manifest bytes.
    pub fn original(&self) -> &[u8] {
        &self.original
    }

    /// Point the manifest at `patch`'s candidate and provider.
    pub fn apply(&mut self, patch: &DependencyPatch) -> Result<AppliedOverlay, ManifestError> {
        let original = std::str::from_utf8(&self.original).map_err(|e| ManifestError::Parse {
            path: self.manifest.clone(),
            message: format!("manifest is not UTF-8: {}", e),
        })?;

        let patched = patch_manifest(&self.manifest, original, patch)?;
        let fingerprint = crc32fast::hash(patched.as_bytes());

        let current = fs::read(&self.manifest).map_err(|e| ManifestError::Io {
            action: "read",
            path: self.manifest.clone(),
            source: e,
        })?;

        // Leave mtime alone when nothing changed so cargo skips the rebuild
        let written = current != patched.as_bytes();
        if written {
            fs::write(&self.manifest, &patched).map_err(|e| ManifestError::Io {
                action: "write",
                path: self.manifest.clone(),
                source: e,
            })?;
        }

        tracing::info!(
            candidate = %patch.candidate,
            provider = %patch.provider,
            fingerprint = format_args!("{:08x}", fingerprint),
            written,
            "Manifest overlay applied"
        );

        Ok(AppliedOverlay {
            candidate: patch.candidate.clone(),
            provider: patch.provider.clone(),
            fingerprint,
            written,
        })
    }

    /// Restore the original bytes, drop the pristine copy and unlock.
    pub fn release(mut self) -> Result<(), ManifestError> {
        self.released = true;
        self.restore()?;
        if let Some(lock) = self.lock.take() {
            lock.release()?;
        }
        tracing::info!(manifest = %self.manifest.display(), "Manifest restored");
        Ok(())
    }

    fn restore(&self) -> Result<(), ManifestError> {
        fs::write(&self.manifest, &self.original).map_err(|e| ManifestError::Restore {
            path: self.manifest.clone(),
            source: e,
        })?;
        fs::remove_file(&self.pristine_path).map_err(|e| ManifestError::Io {
            action: "remove pristine copy",
            path: self.pristine_path.clone(),
            source: e,
        })
    }
}

impl Drop for ManifestOverlay {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.restore() {
                tracing::error!(
                    manifest = %self.manifest.display(),
                    error = %e,
                    "Failed to restore manifest on drop"
                );
            }
        }
    }
}

/// Outcome of [`recover`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The manifest was not under overlay.
    Clean,
    /// The pristine copy was put back.
    Restored,
}

/// Restore a manifest left patched by a session that died before release.
pub fn recover(manifest: impl Into<PathBuf>) -> Result<Recovery, ManifestError> {
    let manifest = manifest.into();

    if with_suffix(&manifest, PRISTINE_SUFFIX).exists() {
        ManifestOverlay::acquire(&manifest)?.release()?;
        return Ok(Recovery::Restored);
    }

    let text = fs::read_to_string(&manifest).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ManifestError::NotFound {
            path: manifest.clone(),
        },
        _ => ManifestError::Io {
            action: "read",
            path: manifest.clone(),
            source: e,
        },
    })?;

    match applied_sentinel(&text) {
        Some((candidate, provider)) => Err(ManifestError::NoPristine {
            path: manifest,
            candidate,
            provider,
        }),
        None => Ok(Recovery::Clean),
    }
}

/// Candidate and provider recorded in a patched manifest, if any.
pub fn applied_sentinel(manifest_text: &str) -> Option<(String, String)> {
    let doc = manifest_text.parse::<DocumentMut>().ok()?;
    let sentinel = doc
        .get("package")?
        .get("metadata")?
        .get(SENTINEL_TABLE)?;
    let candidate = sentinel.get("candidate")?.as_str()?.to_string();
    let provider = sentinel.get("provider")?.as_str()?.to_string();
    Some((candidate, provider))
}

/// Rewrite `original` so the TLS dependency and crypto crates resolve to
/// `patch`. Pure: the same inputs always produce the same text.
pub fn patch_manifest(
    path: &Path,
    original: &str,
    patch: &DependencyPatch,
) -> Result<String, ManifestError> {
    let mut doc = original
        .parse::<DocumentMut>()
        .map_err(|e| ManifestError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let deps = doc
        .get_mut("dependencies")
        .and_then(Item::as_table_like_mut)
        .ok_or_else(|| ManifestError::MissingDependency {
            path: path.to_path_buf(),
            dependency: patch.dependency.clone(),
        })?;
    if !deps.contains_key(&patch.dependency) {
        return Err(ManifestError::MissingDependency {
            path: path.to_path_buf(),
            dependency: patch.dependency.clone(),
        });
    }

    let mut entry = source_table(&patch.source);
    if !patch.default_features {
        entry.insert("default-features", Value::from(false));
    }
    if !patch.features.is_empty() {
        let features: Array = patch.features.iter().map(String::as_str).collect();
        entry.insert("features", Value::Array(features));
    }
    deps.insert(&patch.dependency, Item::Value(Value::InlineTable(entry)));

    if !patch.patches.is_empty() {
        let root = doc.as_table_mut();
        let patch_table = child_table(path, root, "patch")?;
        let crates_io = child_table(path, patch_table, "crates-io")?;
        for (krate, source) in &patch.patches {
            crates_io.insert(krate, Item::Value(Value::InlineTable(source_table(source))));
        }
    }

    let package = child_table(path, doc.as_table_mut(), "package")?;
    let metadata = child_table(path, package, "metadata")?;
    let sentinel = child_table(path, metadata, SENTINEL_TABLE)?;
    sentinel.insert("candidate", toml_edit::value(patch.candidate.as_str()));
    sentinel.insert("provider", toml_edit::value(patch.provider.as_str()));

    Ok(doc.to_string())
}

fn source_table(source: &ResolvedSource) -> InlineTable {
    let mut table = InlineTable::new();
    match source {
        ResolvedSource::Version(version) => {
            table.insert("version", Value::from(version.as_str()));
        }
        ResolvedSource::Path(path) => {
            table.insert("path", Value::from(path.to_string_lossy().as_ref()));
        }
    }
    table
}

/// Get or create `parent[key]` as a table.
fn child_table<'a>(
    path: &Path,
    parent: &'a mut Table,
    key: &str,
) -> Result<&'a mut Table, ManifestError> {
    parent
        .entry(key)
        .or_insert_with(|| {
            let mut table = Table::new();
            table.set_implicit(true);
            Item::Table(table)
        })
        .as_table_mut()
        .ok_or_else(|| ManifestError::NotATable {
            path: path.to_path_buf(),
            key: key.to_string(),
        })
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
