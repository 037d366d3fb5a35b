// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! The candidate and mode sets are fixed for an invocation: they are read
//! once here, validated, and never mutated afterwards. Any invalid field is a
//! [`ConfigError`] and stops the session before the first Run.

use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::render::chart::{MIN_HEIGHT, MIN_WIDTH};
use crate::render::raster::CropRegion;
use crate::trace::ExtractOptions;
use crate::types::{CandidateName, ModeName};

/// Configuration used when no file is given on the command line.
const BUILTIN_CONFIG: &str = include_str!("../tlsmem.default.yaml");

/// Placeholder in driver args replaced by the candidate name.
pub const CANDIDATE_PLACEHOLDER: &str = "{candidate}";

/// Placeholder in snapshot directories replaced by the mode name.
pub const MODE_PLACEHOLDER: &str = "{mode}";

/// Placeholder in profiler args replaced by the trace output path.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

// =============================================================================
// Raw configuration as parsed from YAML (before validation)
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    workload: RawWorkloadConfig,
    #[serde(default = "default_cache_dir")]
    cache_dir: String,
    #[serde(default)]
    tools: RawToolsConfig,
    #[serde(default)]
    profiler: RawProfilerConfig,
    #[serde(default)]
    extract: RawExtractConfig,
    #[serde(default)]
    render: RawRenderConfig,
    candidates: Vec<RawCandidateConfig>,
    modes: Vec<RawModeConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWorkloadConfig {
    manifest: String,
    binary: String,
    #[serde(default = "default_driver_args")]
    args: Vec<String>,
    #[serde(default = "default_snapshot_dir")]
    snapshot_dir: String,
}

fn default_cache_dir() -> String {
    "target/tlsmem-cache".to_string()
}

fn default_driver_args() -> Vec<String> {
    vec![CANDIDATE_PLACEHOLDER.to_string()]
}

fn default_snapshot_dir() -> String {
    ".".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawToolsConfig {
    #[serde(default = "default_cargo")]
    cargo: String,
    #[serde(default = "default_git")]
    git: String,
}

fn default_cargo() -> String {
    "cargo".to_string()
}

fn default_git() -> String {
    "git".to_string()
}

impl Default for RawToolsConfig {
    fn default() -> Self {
        Self {
            cargo: default_cargo(),
            git: default_git(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProfilerConfig {
    #[serde(default = "default_profiler_program")]
    program: String,
    #[serde(default = "default_profiler_args")]
    args: Vec<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default = "default_grace_ms")]
    grace_ms: u64,
}

fn default_profiler_program() -> String {
    "valgrind".to_string()
}

fn default_profiler_args() -> Vec<String> {
    vec![
        "--tool=massif".to_string(),
        format!("--massif-out-file={}", OUTPUT_PLACEHOLDER),
    ]
}

fn default_grace_ms() -> u64 {
    2000
}

impl Default for RawProfilerConfig {
    fn default() -> Self {
        Self {
            program: default_profiler_program(),
            args: default_profiler_args(),
            timeout_secs: None,
            grace_ms: default_grace_ms(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExtractConfig {
    #[serde(default)]
    ignore: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRenderConfig {
    #[serde(default = "default_width")]
    width: u32,
    #[serde(default = "default_height")]
    height: u32,
    #[serde(default = "default_rasterizer")]
    rasterizer: String,
    #[serde(default = "default_density")]
    density: u32,
    #[serde(default)]
    crop: Option<CropRegion>,
}

fn default_width() -> u32 {
    1200
}

fn default_height() -> u32 {
    700
}

fn default_rasterizer() -> String {
    "magick".to_string()
}

fn default_density() -> u32 {
    96
}

impl Default for RawRenderConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            rasterizer: default_rasterizer(),
            density: default_density(),
            crop: None,
        }
    }
}

/// Dependency source as written in YAML. Exactly one of `git`, `path` or
/// `version` identifies the variant.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawSource {
    Git {
        git: String,
        rev: String,
        #[serde(default)]
        subdir: Option<String>,
    },
    Path {
        path: String,
    },
    Version {
        version: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCandidateConfig {
    name: String,
    dependency: String,
    source: RawSource,
    #[serde(default = "default_true")]
    default_features: bool,
    #[serde(default)]
    features: Vec<String>,
    crypto: RawCryptoConfig,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCryptoConfig {
    default: String,
    providers: BTreeMap<String, RawProviderBinding>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProviderBinding {
    #[serde(default)]
    features: Vec<String>,
    #[serde(default)]
    patches: BTreeMap<String, RawSource>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawModeConfig {
    name: String,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    snapshot_dir: Option<String>,
}

// =============================================================================
// Validated configuration
// =============================================================================

/// Where a dependency comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySource {
    /// A crates.io version requirement.
    Version(String),
    /// A local path.
    Path(PathBuf),
    /// A pinned git ref, fetched shallowly before patching.
    Git {
        url: String,
        rev: String,
        subdir: Option<PathBuf>,
    },
}

/// Workload driver location and invocation.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// The driver's `Cargo.toml`, patched per candidate.
    pub manifest: PathBuf,
    /// Binary target built from the manifest.
    pub binary: String,
    /// Arguments passed before the mode flags; `{candidate}` is substituted.
    pub args: Vec<String>,
    /// Where the driver writes its snapshots, relative to the Run directory.
    pub snapshot_dir: String,
}

impl WorkloadConfig {
    /// Driver arguments for one (candidate, mode) pair.
    pub fn driver_args(&self, candidate: &CandidateName, mode: &ModeConfig) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(CANDIDATE_PLACEHOLDER, candidate.as_str()))
            .chain(mode.flags.iter().cloned())
            .collect()
    }

    /// Snapshot directory for one (candidate, mode) pair, relative to the
    /// Run directory. A mode's own template overrides the workload's.
    pub fn snapshot_dir(&self, candidate: &CandidateName, mode: &ModeConfig) -> PathBuf {
        let template = mode.snapshot_dir.as_deref().unwrap_or(&self.snapshot_dir);
        PathBuf::from(
            template
                .replace(CANDIDATE_PLACEHOLDER, candidate.as_str())
                .replace(MODE_PLACEHOLDER, mode.name.as_str()),
        )
    }
}

/// External build and fetch programs.
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    pub cargo: String,
    pub git: String,
}

/// External heap profiler invocation.
#[derive(Debug, Clone)]
pub struct ProfilerConfig {
    pub program: String,
    /// Arguments before the driver command; `{output}` is substituted.
    pub args: Vec<String>,
    /// Default per-Run timeout, overridable from the command line.
    pub timeout: Option<Duration>,
    /// Time between SIGTERM and SIGKILL when a Run times out.
    pub grace: Duration,
}

/// Chart rendering and rasterization settings.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub rasterizer: String,
    pub density: u32,
    /// Fixed border removed before trimming. Pixel offsets depend on the
    /// rendering resolution and must be calibrated per `density`.
    pub crop: Option<CropRegion>,
}

/// How one crypto provider is bound for a candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderBinding {
    /// Extra features enabled on the TLS dependency.
    pub features: Vec<String>,
    /// `[patch.crates-io]` entries redirecting the crypto crates.
    pub patches: BTreeMap<String, DependencySource>,
}

/// Validated candidate configuration.
#[derive(Debug, Clone)]
pub struct CandidateConfig {
    pub name: CandidateName,
    /// Key of the TLS dependency in the workload's `[dependencies]`.
    pub dependency: String,
    pub source: DependencySource,
    pub default_features: bool,
    pub features: Vec<String>,
    pub default_provider: String,
    pub providers: BTreeMap<String, ProviderBinding>,
}

/// Validated mode configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeConfig {
    pub name: ModeName,
    /// Passed to the driver unmodified.
    pub flags: Vec<String>,
    pub snapshot_dir: Option<String>,
}

/// A candidate with its crypto provider resolved for this session.
#[derive(Debug, Clone)]
pub struct PlannedCandidate {
    pub config: CandidateConfig,
    pub provider: String,
    pub binding: ProviderBinding,
}

impl PlannedCandidate {
    pub fn name(&self) -> &CandidateName {
        &self.config.name
    }
}

/// Complete validated configuration.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub workload: WorkloadConfig,
    pub cache_dir: PathBuf,
    pub tools: ToolsConfig,
    pub profiler: ProfilerConfig,
    pub extract: ExtractOptions,
    pub render: RenderConfig,
    pub candidates: Vec<CandidateConfig>,
    pub modes: Vec<ModeConfig>,
}

impl HarnessConfig {
    /// Resolve the requested candidate and mode names into a run plan.
    ///
    /// Empty selections mean "all, in configuration order". Selected names
    /// keep the caller's order. `provider` overrides every candidate's
    /// default crypto provider.
    pub fn plan(
        &self,
        candidates: &[String],
        modes: &[String],
        provider: Option<&str>,
    ) -> Result<(Vec<PlannedCandidate>, Vec<ModeConfig>), ConfigError> {
        let selected: Vec<&CandidateConfig> = if candidates.is_empty() {
            self.candidates.iter().collect()
        } else {
            candidates
                .iter()
                .map(|name| {
                    self.candidates
                        .iter()
                        .find(|c| c.name.as_str() == name)
                        .ok_or_else(|| ConfigError::UnknownCandidate { name: name.clone() })
                })
                .collect::<Result<_, _>>()?
        };

        let modes: Vec<ModeConfig> = if modes.is_empty() {
            self.modes.clone()
        } else {
            modes
                .iter()
                .map(|name| {
                    self.modes
                        .iter()
                        .find(|m| m.name.as_str() == name)
                        .cloned()
                        .ok_or_else(|| ConfigError::UnknownMode { name: name.clone() })
                })
                .collect::<Result<_, _>>()?
        };

        reject_duplicates("candidate", selected.iter().map(|c| c.name.as_str()))?;
        reject_duplicates("mode", modes.iter().map(|m| m.name.as_str()))?;

        let planned = selected
            .into_iter()
            .map(|candidate| {
                let provider = provider.unwrap_or(&candidate.default_provider);
                let binding = candidate.providers.get(provider).cloned().ok_or_else(|| {
                    ConfigError::UnknownProvider {
                        candidate: candidate.name.to_string(),
                        provider: provider.to_string(),
                    }
                })?;
                Ok(PlannedCandidate {
                    config: candidate.clone(),
                    provider: provider.to_string(),
                    binding,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok((planned, modes))
    }

    /// External programs a session with these candidates will invoke.
    pub fn collaborators(&self, candidates: &[PlannedCandidate]) -> Vec<String> {
        let needs_git = candidates.iter().any(|c| {
            matches!(c.config.source, DependencySource::Git { .. })
                || c.binding
                    .patches
                    .values()
                    .any(|s| matches!(s, DependencySource::Git { .. }))
        });

        let mut programs = vec![
            self.tools.cargo.clone(),
            self.profiler.program.clone(),
            self.render.rasterizer.clone(),
        ];
        if needs_git {
            programs.push(self.tools.git.clone());
        }
        programs
    }
}

fn reject_duplicates<'a>(
    kind: &'static str,
    names: impl Iterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ConfigError::Duplicate {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    ///
    /// Relative paths in the file are resolved against the file's directory.
    pub fn load_file(path: impl AsRef<Path>) -> Result<HarnessConfig, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            message: format!("reading {}: {}", path.display(), e),
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::load_string_in(&content, base)
    }

    /// Load and validate configuration from a YAML string. Relative paths
    /// are kept relative to the working directory.
    pub fn load_string(content: &str) -> Result<HarnessConfig, ConfigError> {
        Self::load_string_in(content, Path::new(""))
    }

    /// The built-in configuration: `s2n-tls`, `rustls` and `openssl` against
    /// a driver in `bench/`, with the `pair`, `client` and `server` modes.
    pub fn builtin() -> Result<HarnessConfig, ConfigError> {
        Self::load_string(BUILTIN_CONFIG)
    }

    fn load_string_in(content: &str, base: &Path) -> Result<HarnessConfig, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            message: format!("YAML parse error: {}", e),
        })?;

        Self::validate(raw, base)
    }

    /// Validate raw configuration and convert to validated types.
    fn validate(raw: RawConfig, base: &Path) -> Result<HarnessConfig, ConfigError> {
        let workload = Self::validate_workload(raw.workload, base)?;

        if raw.cache_dir.is_empty() {
            return Err(ConfigError::InvalidFieldValue {
                field: "cache_dir",
                value: raw.cache_dir,
                reason: "Cache directory cannot be empty".to_string(),
            });
        }

        let tools = ToolsConfig {
            cargo: non_empty("tools.cargo", raw.tools.cargo)?,
            git: non_empty("tools.git", raw.tools.git)?,
        };
        let profiler = Self::validate_profiler(raw.profiler)?;
        let extract = Self::validate_extract(raw.extract)?;
        let render = Self::validate_render(raw.render)?;

        let mut candidates = Vec::with_capacity(raw.candidates.len());
        for raw_candidate in raw.candidates {
            candidates.push(Self::validate_candidate(raw_candidate, base)?);
        }
        if candidates.is_empty() {
            return Err(ConfigError::Empty { kind: "candidate" });
        }
        reject_duplicates("candidate", candidates.iter().map(|c| c.name.as_str()))?;

        let modes = raw
            .modes
            .into_iter()
            .map(|m| {
                Ok(ModeConfig {
                    name: ModeName::new(m.name)?,
                    flags: m.flags,
                    snapshot_dir: m
                        .snapshot_dir
                        .map(|dir| relative_dir("modes.snapshot_dir", dir))
                        .transpose()?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        if modes.is_empty() {
            return Err(ConfigError::Empty { kind: "mode" });
        }
        reject_duplicates("mode", modes.iter().map(|m| m.name.as_str()))?;

        Ok(HarnessConfig {
            workload,
            cache_dir: base.join(raw.cache_dir),
            tools,
            profiler,
            extract,
            render,
            candidates,
            modes,
        })
    }

    fn validate_workload(
        raw: RawWorkloadConfig,
        base: &Path,
    ) -> Result<WorkloadConfig, ConfigError> {
        let manifest = non_empty("workload.manifest", raw.manifest)?;
        let binary = non_empty("workload.binary", raw.binary)?;

        Ok(WorkloadConfig {
            manifest: base.join(manifest),
            binary,
            args: raw.args,
            snapshot_dir: relative_dir("workload.snapshot_dir", raw.snapshot_dir)?,
        })
    }

    fn validate_profiler(raw: RawProfilerConfig) -> Result<ProfilerConfig, ConfigError> {
        let program = non_empty("profiler.program", raw.program)?;

        if !raw.args.iter().any(|a| a.contains(OUTPUT_PLACEHOLDER)) {
            return Err(ConfigError::InvalidFieldValue {
                field: "profiler.args",
                value: raw.args.join(" "),
                reason: format!(
                    "Profiler args must route the trace to {} so runs cannot clobber each other",
                    OUTPUT_PLACEHOLDER
                ),
            });
        }

        if raw.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidFieldValue {
                field: "profiler.timeout_secs",
                value: "0".to_string(),
                reason: "Timeout must be greater than 0".to_string(),
            });
        }

        Ok(ProfilerConfig {
            program,
            args: raw.args,
            timeout: raw.timeout_secs.map(Duration::from_secs),
            grace: Duration::from_millis(raw.grace_ms),
        })
    }

    fn validate_extract(raw: RawExtractConfig) -> Result<ExtractOptions, ConfigError> {
        let Some(ignore) = raw.ignore else {
            return Ok(ExtractOptions::default());
        };

        if ignore.iter().any(String::is_empty) {
            return Err(ConfigError::InvalidFieldValue {
                field: "extract.ignore",
                value: format!("{:?}", ignore),
                reason: "Empty patterns would discard every allocation".to_string(),
            });
        }

        Ok(ExtractOptions { ignore })
    }

    fn validate_render(raw: RawRenderConfig) -> Result<RenderConfig, ConfigError> {
        const MAX_DIM: u32 = 10_000;

        for (field, value, min) in [
            ("render.width", raw.width, MIN_WIDTH),
            ("render.height", raw.height, MIN_HEIGHT),
        ] {
            if !(min..=MAX_DIM).contains(&value) {
                return Err(ConfigError::InvalidFieldValue {
                    field,
                    value: value.to_string(),
                    reason: format!("Must be between {} and {} pixels", min, MAX_DIM),
                });
            }
        }

        if raw.density == 0 {
            return Err(ConfigError::InvalidFieldValue {
                field: "render.density",
                value: "0".to_string(),
                reason: "Density must be greater than 0".to_string(),
            });
        }

        Ok(RenderConfig {
            width: raw.width,
            height: raw.height,
            rasterizer: non_empty("render.rasterizer", raw.rasterizer)?,
            density: raw.density,
            crop: raw.crop,
        })
    }

    fn validate_candidate(
        raw: RawCandidateConfig,
        base: &Path,
    ) -> Result<CandidateConfig, ConfigError> {
        let name = CandidateName::new(raw.name)?;
        let dependency = non_empty("candidate.dependency", raw.dependency)?;
        let source = validate_source(raw.source, base)?;

        let default_provider = raw.crypto.default;
        if !raw.crypto.providers.contains_key(&default_provider) {
            return Err(ConfigError::UnknownProvider {
                candidate: name.to_string(),
                provider: default_provider,
            });
        }

        let providers = raw
            .crypto
            .providers
            .into_iter()
            .map(|(provider, binding)| {
                let patches = binding
                    .patches
                    .into_iter()
                    .map(|(krate, source)| Ok((krate, validate_source(source, base)?)))
                    .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;
                Ok((
                    provider,
                    ProviderBinding {
                        features: binding.features,
                        patches,
                    },
                ))
            })
            .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;

        Ok(CandidateConfig {
            name,
            dependency,
            source,
            default_features: raw.default_features,
            features: raw.features,
            default_provider,
            providers,
        })
    }
}

fn validate_source(raw: RawSource, base: &Path) -> Result<DependencySource, ConfigError> {
    Ok(match raw {
        RawSource::Git { git, rev, subdir } => DependencySource::Git {
            url: non_empty("source.git", git)?,
            rev: non_empty("source.rev", rev)?,
            subdir: subdir.map(PathBuf::from),
        },
        RawSource::Path { path } => {
            DependencySource::Path(base.join(non_empty("source.path", path)?))
        }
        RawSource::Version { version } => {
            DependencySource::Version(non_empty("source.version", version)?)
        }
    })
}

/// A directory template that stays inside the Run directory.
fn relative_dir(field: &'static str, value: String) -> Result<String, ConfigError> {
    let value = non_empty(field, value)?;
    let inside = Path::new(&value)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !inside {
        return Err(ConfigError::InvalidFieldValue {
            field,
            value,
            reason: "Must be a relative path without '..'".to_string(),
        });
    }
    Ok(value)
}

fn non_empty(field: &'static str, value: String) -> Result<String, ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidFieldValue {
            field,
            value,
            reason: "Value cannot be empty".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_CONFIG: &str = r#"
workload:
  manifest: bench/Cargo.toml
  binary: memory

profiler:
  timeout_secs: 600

render:
  crop: { left: 0, top: 40, right: 0, bottom: 0 }

candidates:
  - name: s2n-tls
    dependency: s2n-tls
    source: { version: "0.3" }
    crypto:
      default: aws-lc
      providers:
        aws-lc: {}
  - name: rustls
    dependency: rustls
    source: { git: "https://github.com/rustls/rustls", rev: v/0.23.15, subdir: rustls }
    default_features: false
    features: [std, tls12]
    crypto:
      default: aws-lc
      providers:
        aws-lc: { features: [aws_lc_rs] }
        ring: { features: [ring] }

modes:
  - name: pair
    flags: [pair]
  - name: client
    flags: [client]
"#;

    #[test]
    fn test_valid_config() {
        let config = ConfigLoader::load_string(VALID_CONFIG).unwrap();
        assert_eq!(config.candidates.len(), 2);
        assert_eq!(config.candidates[0].name.as_str(), "s2n-tls");
        assert_eq!(config.modes[1].flags, vec!["client".to_string()]);
        assert_eq!(config.profiler.timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.render.crop.unwrap().top, 40);
        assert!(matches!(
            config.candidates[1].source,
            DependencySource::Git { ref rev, .. } if rev == "v/0.23.15"
        ));
        assert!(!config.candidates[1].default_features);
    }

    #[test]
    fn test_defaults_applied() {
        let config = ConfigLoader::load_string(VALID_CONFIG).unwrap();
        assert_eq!(config.profiler.program, "valgrind");
        assert_eq!(config.profiler.grace, Duration::from_millis(2000));
        assert_eq!(config.workload.args, vec!["{candidate}".to_string()]);
        assert_eq!(config.render.rasterizer, "magick");
        assert_eq!(config.extract, ExtractOptions::default());
        assert_eq!(config.tools.cargo, "cargo");
    }

    #[test]
    fn test_builtin_config_is_valid() {
        let config = ConfigLoader::builtin().unwrap();
        let names: Vec<_> = config.candidates.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["s2n-tls", "rustls", "openssl"]);
        let modes: Vec<_> = config.modes.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(modes, vec!["pair", "client", "server"]);
        assert_eq!(
            config.workload.snapshot_dir(&config.candidates[1].name, &config.modes[2]),
            PathBuf::from("target/memory/rustls_server")
        );
    }

    #[test]
    fn test_duplicate_candidates_rejected() {
        let yaml = r#"
workload: { manifest: Cargo.toml, binary: memory }
candidates:
  - { name: a, dependency: a, source: { version: "1" }, crypto: { default: x, providers: { x: {} } } }
  - { name: a, dependency: b, source: { version: "1" }, crypto: { default: x, providers: { x: {} } } }
modes:
  - { name: pair }
"#;
        let result = ConfigLoader::load_string(yaml);
        assert!(matches!(result, Err(ConfigError::Duplicate { kind: "candidate", .. })));
    }

    #[test]
    fn test_default_provider_must_exist() {
        let yaml = r#"
workload: { manifest: Cargo.toml, binary: memory }
candidates:
  - { name: a, dependency: a, source: { version: "1" }, crypto: { default: y, providers: { x: {} } } }
modes:
  - { name: pair }
"#;
        let result = ConfigLoader::load_string(yaml);
        assert!(matches!(result, Err(ConfigError::UnknownProvider { .. })));
    }

    #[test]
    fn test_profiler_args_need_output_placeholder() {
        let yaml = r#"
workload: { manifest: Cargo.toml, binary: memory }
profiler: { args: ["--tool=massif"] }
candidates:
  - { name: a, dependency: a, source: { version: "1" }, crypto: { default: x, providers: { x: {} } } }
modes:
  - { name: pair }
"#;
        let result = ConfigLoader::load_string(yaml);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidFieldValue { field: "profiler.args", .. })
        ));
    }

    #[test]
    fn test_empty_modes_rejected() {
        let yaml = r#"
workload: { manifest: Cargo.toml, binary: memory }
candidates:
  - { name: a, dependency: a, source: { version: "1" }, crypto: { default: x, providers: { x: {} } } }
modes: []
"#;
        assert!(matches!(
            ConfigLoader::load_string(yaml),
            Err(ConfigError::Empty { kind: "mode" })
        ));
    }

    #[test]
    fn test_invalid_render_dimensions() {
        let yaml = r#"
workload: { manifest: Cargo.toml, binary: memory }
render: { width: 10 }
candidates:
  - { name: a, dependency: a, source: { version: "1" }, crypto: { default: x, providers: { x: {} } } }
modes:
  - { name: pair }
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_render_dimensions_fit_chart_margins() {
        let yaml = |width: u32| {
            format!(
                r#"
workload: {{ manifest: Cargo.toml, binary: memory }}
render: {{ width: {} }}
candidates:
  - {{ name: a, dependency: a, source: {{ version: "1" }}, crypto: {{ default: x, providers: {{ x: {{}} }} }} }}
modes:
  - {{ name: pair }}
"#,
                width
            )
        };

        assert!(matches!(
            ConfigLoader::load_string(&yaml(MIN_WIDTH - 1)),
            Err(ConfigError::InvalidFieldValue { field: "render.width", .. })
        ));
        let config = ConfigLoader::load_string(&yaml(MIN_WIDTH)).unwrap();
        assert_eq!(config.render.width, MIN_WIDTH);
    }

    #[test]
    fn test_snapshot_dir_templates() {
        let yaml = r#"
workload: { manifest: Cargo.toml, binary: memory, snapshot_dir: "target/memory/{candidate}" }
candidates:
  - { name: rustls, dependency: a, source: { version: "1" }, crypto: { default: x, providers: { x: {} } } }
modes:
  - { name: pair }
  - { name: client, snapshot_dir: "target/memory/{candidate}_{mode}" }
"#;
        let config = ConfigLoader::load_string(yaml).unwrap();
        let rustls = &config.candidates[0].name;
        assert_eq!(
            config.workload.snapshot_dir(rustls, &config.modes[0]),
            PathBuf::from("target/memory/rustls")
        );
        assert_eq!(
            config.workload.snapshot_dir(rustls, &config.modes[1]),
            PathBuf::from("target/memory/rustls_client")
        );

        let defaults = ConfigLoader::load_string(VALID_CONFIG).unwrap();
        assert_eq!(
            defaults.workload.snapshot_dir(&defaults.candidates[0].name, &defaults.modes[0]),
            PathBuf::from(".")
        );
    }

    #[test]
    fn test_snapshot_dir_must_stay_in_run_dir() {
        for dir in ["/tmp/memory", "../memory", "target/../../memory"] {
            let yaml = format!(
                r#"
workload: {{ manifest: Cargo.toml, binary: memory, snapshot_dir: "{}" }}
candidates:
  - {{ name: a, dependency: a, source: {{ version: "1" }}, crypto: {{ default: x, providers: {{ x: {{}} }} }} }}
modes:
  - {{ name: pair }}
"#,
                dir
            );
            assert!(matches!(
                ConfigLoader::load_string(&yaml),
                Err(ConfigError::InvalidFieldValue { field: "workload.snapshot_dir", .. })
            ));
        }
    }

    #[test]
    fn test_plan_preserves_requested_order() {
        let config = ConfigLoader::load_string(VALID_CONFIG).unwrap();
        let (candidates, modes) = config
            .plan(&["rustls".to_string(), "s2n-tls".to_string()], &[], None)
            .unwrap();
        assert_eq!(candidates[0].name().as_str(), "rustls");
        assert_eq!(candidates[0].provider, "aws-lc");
        assert_eq!(candidates[0].binding.features, vec!["aws_lc_rs".to_string()]);
        assert_eq!(candidates[1].name().as_str(), "s2n-tls");
        assert_eq!(modes.len(), 2);
    }

    #[test]
    fn test_plan_unknown_names() {
        let config = ConfigLoader::load_string(VALID_CONFIG).unwrap();
        assert!(matches!(
            config.plan(&["boringssl".to_string()], &[], None),
            Err(ConfigError::UnknownCandidate { .. })
        ));
        assert!(matches!(
            config.plan(&[], &["resumption".to_string()], None),
            Err(ConfigError::UnknownMode { .. })
        ));
    }

    #[test]
    fn test_plan_provider_override() {
        let config = ConfigLoader::load_string(VALID_CONFIG).unwrap();
        let (candidates, _) = config
            .plan(&["rustls".to_string()], &[], Some("ring"))
            .unwrap();
        assert_eq!(candidates[0].provider, "ring");

        // s2n-tls has no ring binding
        assert!(matches!(
            config.plan(&[], &[], Some("ring")),
            Err(ConfigError::UnknownProvider { .. })
        ));
    }

    #[test]
    fn test_driver_args_substitute_candidate() {
        let config = ConfigLoader::load_string(VALID_CONFIG).unwrap();
        let args = config
            .workload
            .driver_args(&config.candidates[0].name, &config.modes[0]);
        assert_eq!(args, vec!["s2n-tls".to_string(), "pair".to_string()]);
    }

    #[test]
    fn test_collaborators_include_git_only_when_needed() {
        let config = ConfigLoader::load_string(VALID_CONFIG).unwrap();
        let (only_s2n, _) = config.plan(&["s2n-tls".to_string()], &[], None).unwrap();
        assert!(!config.collaborators(&only_s2n).contains(&"git".to_string()));

        let (all, _) = config.plan(&[], &[], None).unwrap();
        let programs = config.collaborators(&all);
        assert!(programs.contains(&"git".to_string()));
        assert!(programs.contains(&"valgrind".to_string()));
    }

    #[test]
    fn test_load_file_resolves_relative_paths() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tlsmem.yaml");
        std::fs::write(&path, VALID_CONFIG).unwrap();

        let config = ConfigLoader::load_file(&path).unwrap();
        assert_eq!(config.workload.manifest, dir.path().join("bench/Cargo.toml"));
        assert_eq!(config.cache_dir, dir.path().join("target/tlsmem-cache"));
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigLoader::load_file("/nonexistent/tlsmem.yaml");
        assert!(matches!(result, Err(ConfigError::NotFound { .. })));
    }
}
