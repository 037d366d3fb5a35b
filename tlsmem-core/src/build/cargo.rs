// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Cargo build collaborator.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::UNIX_EPOCH;

use tokio::process::Command;
use walkdir::WalkDir;

use crate::error::BuildError;
use crate::types::CandidateName;

/// Stamp file recording the manifest fingerprint and source digest of the
/// last good build.
const STAMP_FILE: &str = "tlsmem.stamp";

/// Number of stderr lines kept in a build failure.
const LOG_TAIL_LINES: usize = 40;

/// One workload build for a (candidate, provider) pair.
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    pub candidate: &'a CandidateName,
    pub provider: &'a str,
    /// Fingerprint of the patched manifest.
    pub fingerprint: u32,
    pub manifest: &'a Path,
    pub binary: &'a str,
}

/// Builds the workload driver against the currently applied overlay.
#[allow(async_fn_in_trait)]
pub trait Builder {
    /// Build and return the driver executable.
    async fn build(&self, request: &BuildRequest<'_>) -> Result<PathBuf, BuildError>;
}

/// [`Builder`] shelling out to `cargo build --release`.
///
/// Each (candidate, provider) gets its own target directory so switching
/// candidates does not invalidate the others' incremental state. A build is
/// skipped when the stamp matches both the manifest fingerprint and the
/// driver's sources, and the artifact exists.
#[derive(Debug, Clone)]
pub struct CargoBuilder {
    cargo: String,
    cache_dir: PathBuf,
}

impl CargoBuilder {
    pub fn new(cargo: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cargo: cargo.into(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Target directory for a (candidate, provider) pair.
    pub fn target_dir(&self, candidate: &CandidateName, provider: &str) -> PathBuf {
        self.cache_dir
            .join("target")
            .join(format!("{}-{}", candidate, provider))
    }

    fn cached(target_dir: &Path, artifact: &Path, stamp: &str) -> bool {
        let recorded = fs::read_to_string(target_dir.join(STAMP_FILE)).ok();
        recorded.as_deref().map(str::trim) == Some(stamp) && artifact.is_file()
    }
}

impl Builder for CargoBuilder {
    async fn build(&self, request: &BuildRequest<'_>) -> Result<PathBuf, BuildError> {
        let target_dir = self.target_dir(request.candidate, request.provider);
        let artifact = target_dir.join("release").join(request.binary);
        let stamp = build_stamp(request.fingerprint, source_digest(request.manifest));

        if Self::cached(&target_dir, &artifact, &stamp) {
            tracing::info!(
                candidate = %request.candidate,
                provider = request.provider,
                artifact = %artifact.display(),
                "Reusing cached build"
            );
            return Ok(artifact);
        }

        tracing::info!(
            candidate = %request.candidate,
            provider = request.provider,
            target_dir = %target_dir.display(),
            "Building workload driver"
        );

        let output = Command::new(&self.cargo)
            .arg("build")
            .arg("--release")
            .arg("--manifest-path")
            .arg(request.manifest)
            .arg("--target-dir")
            .arg(&target_dir)
            .arg("--bin")
            .arg(request.binary)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| BuildError::Spawn {
                program: self.cargo.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(BuildError::Compile {
                candidate: request.candidate.clone(),
                log: log_tail(&output.stderr),
            });
        }

        if !artifact.is_file() {
            return Err(BuildError::Compile {
                candidate: request.candidate.clone(),
                log: format!("build succeeded but {} is missing", artifact.display()),
            });
        }

        let stamp_path = target_dir.join(STAMP_FILE);
        fs::write(&stamp_path, stamp).map_err(|e| BuildError::Io {
            context: "write build stamp",
            path: stamp_path,
            source: e,
        })?;

        Ok(artifact)
    }
}

fn build_stamp(fingerprint: u32, sources: u32) -> String {
    format!("{:08x}-{:08x}", fingerprint, sources)
}

/// Digest of the driver's sources: path, size and mtime of every file below
/// the manifest's directory. Build output, hidden entries, the lockfile and
/// the manifest with its overlay siblings are left out.
fn source_digest(manifest: &Path) -> u32 {
    let root = manifest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let manifest_name = manifest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let skipped = |name: &str| {
        name.starts_with('.')
            || name == "target"
            || name == "Cargo.lock"
            || (!manifest_name.is_empty() && name.starts_with(manifest_name.as_str()))
    };

    let mut hasher = crc32fast::Hasher::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !skipped(&entry.file_name().to_string_lossy()));

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos());
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());

        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update(&metadata.len().to_le_bytes());
        hasher.update(&mtime.to_le_bytes());
    }
    hasher.finalize()
}

/// Last lines of a subprocess's stderr.
pub(crate) fn log_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(LOG_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// A fake `cargo` that creates the requested binary and counts calls.
    fn fake_cargo(dir: &Path, fail: bool) -> PathBuf {
        let script = dir.join("cargo");
        let body = if fail {
            "#!/bin/sh\necho 'error[E0432]: unresolved import' >&2\nexit 101\n".to_string()
        } else {
            format!(
                r#"#!/bin/sh
echo call >> {calls}
while [ $# -gt 0 ]; do
  case "$1" in
    --target-dir) shift; target="$1" ;;
    --bin) shift; bin="$1" ;;
  esac
  shift
done
mkdir -p "$target/release"
printf '#!/bin/sh\n' > "$target/release/$bin"
chmod +x "$target/release/$bin"
"#,
                calls = dir.join("calls").display()
            )
        };
        fs::write(&script, body).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    fn calls(dir: &Path) -> usize {
        fs::read_to_string(dir.join("calls"))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_build_then_reuse() {
        let dir = TempDir::new().unwrap();
        let cargo = fake_cargo(dir.path(), false);
        let builder = CargoBuilder::new(cargo.to_string_lossy(), dir.path().join("cache"));
        let candidate = CandidateName::new("rustls").unwrap();
        let manifest = dir.path().join("bench/Cargo.toml");
        fs::create_dir_all(dir.path().join("bench/src")).unwrap();
        fs::write(&manifest, "[package]\nname = \"bench\"\n").unwrap();
        fs::write(dir.path().join("bench/src/main.rs"), "fn main() {}\n").unwrap();

        let request = BuildRequest {
            candidate: &candidate,
            provider: "aws-lc",
            fingerprint: 0xdead_beef,
            manifest: &manifest,
            binary: "memory",
        };

        let artifact = builder.build(&request).await.unwrap();
        assert!(artifact.ends_with("target/rustls-aws-lc/release/memory"));
        assert_eq!(calls(dir.path()), 1);

        builder.build(&request).await.unwrap();
        assert_eq!(calls(dir.path()), 1);

        let changed = BuildRequest {
            fingerprint: 0x1234_5678,
            ..request
        };
        builder.build(&changed).await.unwrap();
        assert_eq!(calls(dir.path()), 2);
    }

    #[tokio::test]
    async fn test_source_edit_triggers_rebuild() {
        let dir = TempDir::new().unwrap();
        let cargo = fake_cargo(dir.path(), false);
        let builder = CargoBuilder::new(cargo.to_string_lossy(), dir.path().join("cache"));
        let candidate = CandidateName::new("s2n-tls").unwrap();
        let manifest = dir.path().join("bench/Cargo.toml");
        let main = dir.path().join("bench/src/main.rs");
        fs::create_dir_all(dir.path().join("bench/src")).unwrap();
        fs::write(&manifest, "[package]\nname = \"bench\"\n").unwrap();
        fs::write(&main, "fn main() {}\n").unwrap();

        let request = BuildRequest {
            candidate: &candidate,
            provider: "aws-lc",
            fingerprint: 7,
            manifest: &manifest,
            binary: "memory",
        };
        builder.build(&request).await.unwrap();
        assert_eq!(calls(dir.path()), 1);

        // Overlay siblings, the lockfile and build output do not count
        fs::write(dir.path().join("bench/Cargo.toml.tlsmem-orig"), "x").unwrap();
        fs::write(dir.path().join("bench/Cargo.lock"), "# lock").unwrap();
        fs::create_dir_all(dir.path().join("bench/target/debug")).unwrap();
        fs::write(dir.path().join("bench/target/debug/memory"), "bin").unwrap();
        builder.build(&request).await.unwrap();
        assert_eq!(calls(dir.path()), 1);

        fs::write(&main, "fn main() { println!(\"edited\"); }\n").unwrap();
        builder.build(&request).await.unwrap();
        assert_eq!(calls(dir.path()), 2);
    }

    #[test]
    fn test_source_digest_tracks_new_files() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("Cargo.toml");
        fs::write(&manifest, "[package]\n").unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();

        let before = source_digest(&manifest);
        assert_eq!(source_digest(&manifest), before);

        fs::write(dir.path().join("src/conn.rs"), "pub fn open() {}\n").unwrap();
        assert_ne!(source_digest(&manifest), before);
    }

    #[tokio::test]
    async fn test_build_failure_carries_log() {
        let dir = TempDir::new().unwrap();
        let cargo = fake_cargo(dir.path(), true);
        let builder = CargoBuilder::new(cargo.to_string_lossy(), dir.path().join("cache"));
        let candidate = CandidateName::new("rustls").unwrap();
        let manifest = dir.path().join("Cargo.toml");

        let result = builder
            .build(&BuildRequest {
                candidate: &candidate,
                provider: "ring",
                fingerprint: 1,
                manifest: &manifest,
                binary: "memory",
            })
            .await;

        match result {
            Err(BuildError::Compile { candidate, log }) => {
                assert_eq!(candidate.as_str(), "rustls");
                assert!(log.contains("E0432"));
            }
            other => panic!("expected compile error, got {:?}", other),
        }
    }

    #[test]
    fn test_log_tail_keeps_last_lines() {
        let stderr: String = (0..100).map(|i| format!("line {}\n", i)).collect();
        let tail = log_tail(stderr.as_bytes());
        assert_eq!(tail.lines().count(), LOG_TAIL_LINES);
        assert!(tail.ends_with("line 99"));
    }
}
