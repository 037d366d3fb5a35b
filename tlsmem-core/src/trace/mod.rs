// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Trace extraction.
//!
//! Turns the profiler's raw output for one Run into an ordered series of
//! heap samples. The heap figure excludes allocations made by the profiler's
//! own client machinery, which would otherwise show up as candidate memory.

mod massif;
mod normalize;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::TraceError;
use crate::types::TimeUnit;

pub use massif::{HeapNode, Snapshot, TreeKind};
pub use normalize::normalize_label;

/// Extension of the per-connection snapshot files written by the driver.
const SNAPSHOT_EXT: &str = "snapshot";

/// Prefix of the profiler's own end-of-run output.
const MASSIF_PREFIX: &str = "massif.out";

/// Extraction settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Substrings of normalized labels whose bytes are profiler bookkeeping.
    pub ignore: Vec<String>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            ignore: vec![
                "crabgrind".to_string(),
                "valgrind".to_string(),
                "vgpreload".to_string(),
            ],
        }
    }
}

impl ExtractOptions {
    fn is_ignored(&self, normalized: &str) -> bool {
        self.ignore.iter().any(|pattern| normalized.contains(pattern.as_str()))
    }

    /// Bytes of the outermost ignored nodes below `root`.
    fn ignored_bytes(&self, root: &HeapNode) -> u64 {
        root.children
            .iter()
            .map(|node| {
                if self.is_ignored(&normalize_label(&node.label)) {
                    node.bytes
                } else {
                    self.ignored_bytes(node)
                }
            })
            .sum()
    }
}

/// One heap measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Position on the time axis, in the trace's [`TimeUnit`].
    pub elapsed: u64,
    pub heap_bytes: u64,
}

/// A trace that ended in a malformed record. The samples before it are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncatedTraceWarning {
    pub path: PathBuf,
    /// Samples extracted before the malformed record.
    pub valid: usize,
    /// Records dropped, including the malformed one.
    pub discarded: usize,
    pub reason: String,
}

impl fmt::Display for TruncatedTraceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trace {} truncated: kept {} samples, discarded {} records ({})",
            self.path.display(),
            self.valid,
            self.discarded,
            self.reason
        )
    }
}

/// Extracted samples of one Run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Samples {
    pub time_unit: TimeUnit,
    /// Non-decreasing in `elapsed`.
    pub samples: Vec<Sample>,
    /// Bytes per normalized allocation site at the peak snapshot.
    pub peak_sites: BTreeMap<String, u64>,
    pub warning: Option<TruncatedTraceWarning>,
}

impl Samples {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Heap at the first sample.
    pub fn baseline(&self) -> Option<u64> {
        self.samples.first().map(|s| s.heap_bytes)
    }

    pub fn peak(&self) -> Option<u64> {
        self.samples.iter().map(|s| s.heap_bytes).max()
    }

    /// Heap at the last sample.
    pub fn final_heap(&self) -> Option<u64> {
        self.samples.last().map(|s| s.heap_bytes)
    }

    pub fn max_elapsed(&self) -> u64 {
        self.samples.last().map_or(0, |s| s.elapsed)
    }

    /// Average heap growth between consecutive samples. With one snapshot per
    /// connection this is the per-connection cost.
    pub fn mean_growth(&self) -> Option<f64> {
        let (first, last) = (self.samples.first()?, self.samples.last()?);
        if self.samples.len() < 2 {
            return None;
        }
        let delta = last.heap_bytes as f64 - first.heap_bytes as f64;
        Some(delta / (self.samples.len() - 1) as f64)
    }
}

/// The raw trace files of one Run, in extraction order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceHandle {
    files: Vec<PathBuf>,
    /// Raw output found next to `files` but not extracted.
    extras: Vec<PathBuf>,
    /// Directories between the Run directory and the snapshots, innermost first.
    nested: Vec<PathBuf>,
}

impl TraceHandle {
    /// Find the trace files in a Run directory.
    ///
    /// Driver snapshots (`<i>.snapshot`) win, ordered by index; otherwise
    /// the profiler's `massif.out*` files are used.
    pub fn discover(dir: &Path) -> Result<Self, TraceError> {
        Self::discover_in(dir, Path::new("."))
    }

    /// Find the trace files of a Run whose driver writes its snapshots to
    /// `snapshot_dir`, relative to the Run directory. The profiler's own
    /// output is looked up in both places.
    pub fn discover_in(run_dir: &Path, snapshot_dir: &Path) -> Result<Self, TraceError> {
        let mut nested = Vec::new();
        let mut dir = run_dir.to_path_buf();
        for component in snapshot_dir.components() {
            if let Component::Normal(part) = component {
                dir.push(part);
                nested.push(dir.clone());
            }
        }
        nested.reverse();

        let (mut snapshots, mut massif) = scan(&dir)?;
        if !nested.is_empty() {
            massif.extend(scan(run_dir)?.1);
        }
        massif.sort();

        let (files, extras) = if snapshots.is_empty() {
            (massif, Vec::new())
        } else {
            snapshots.sort_by_key(|(index, _)| *index);
            (snapshots.into_iter().map(|(_, path)| path).collect(), massif)
        };

        if files.is_empty() {
            return Err(TraceError::Missing { dir });
        }

        Ok(Self {
            files,
            extras,
            nested,
        })
    }

    /// A single trace file.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            files: vec![path.into()],
            extras: Vec::new(),
            nested: Vec::new(),
        }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Delete the raw trace files, including output that was not extracted,
    /// and the snapshot directories they leave empty.
    pub fn remove(&self) -> Result<(), TraceError> {
        for file in self.files.iter().chain(&self.extras) {
            fs::remove_file(file).map_err(|e| TraceError::Io {
                path: file.clone(),
                source: e,
            })?;
        }
        for dir in &self.nested {
            // Stops at the first directory still holding driver output
            if fs::remove_dir(dir).is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Snapshot files (with their index) and profiler outputs directly in `dir`.
/// A directory that does not exist holds neither.
#[allow(clippy::type_complexity)]
fn scan(dir: &Path) -> Result<(Vec<(u64, PathBuf)>, Vec<PathBuf>), TraceError> {
    let io = |e: std::io::Error| TraceError::Io {
        path: dir.to_path_buf(),
        source: e,
    };
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok((Vec::new(), Vec::new()));
        }
        Err(e) => return Err(io(e)),
    };

    let mut snapshots = Vec::new();
    let mut massif = Vec::new();
    for entry in entries {
        let path = entry.map_err(io)?.path();
        if !path.is_file() {
            continue;
        }

        let is_snapshot = path.extension().is_some_and(|ext| ext == SNAPSHOT_EXT);
        let index = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<u64>().ok());
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();

        match index {
            Some(index) if is_snapshot => snapshots.push((index, path)),
            _ if name.starts_with(MASSIF_PREFIX) => massif.push(path),
            _ => {}
        }
    }
    Ok((snapshots, massif))
}

/// Extract heap samples from the trace files of one Run.
///
/// Extraction stops at the first malformed record; the valid prefix is
/// returned with a [`TruncatedTraceWarning`]. A trace with no valid record
/// at all is [`TraceError::Unparseable`].
pub fn extract(handle: &TraceHandle, options: &ExtractOptions) -> Result<Samples, TraceError> {
    let mut time_unit = None;
    let mut samples = Vec::new();
    let mut peak: Option<Snapshot> = None;
    let mut warning = None;

    for (i, path) in handle.files.iter().enumerate() {
        let text = read(path)?;
        let trace = massif::parse(&text);
        time_unit.get_or_insert(trace.time_unit);

        for snapshot in trace.snapshots {
            let ignored = snapshot.tree.as_ref().map_or(0, |t| options.ignored_bytes(t));
            samples.push(Sample {
                elapsed: snapshot.time,
                heap_bytes: (snapshot.heap + snapshot.heap_extra).saturating_sub(ignored),
            });

            if is_better_peak(&snapshot, peak.as_ref()) {
                peak = Some(snapshot);
            }
        }

        if let Some(truncation) = trace.truncation {
            let later: usize = handle.files[i + 1..]
                .iter()
                .filter_map(|p| fs::read_to_string(p).ok())
                .map(|t| massif::count_records(&t))
                .sum();

            warning = Some(TruncatedTraceWarning {
                path: path.clone(),
                valid: samples.len(),
                discarded: truncation.discarded + later,
                reason: truncation.reason,
            });
            break;
        }
    }

    if samples.is_empty() {
        let path = warning
            .as_ref()
            .map(|w| w.path.clone())
            .or_else(|| handle.files.first().cloned())
            .unwrap_or_default();
        let reason = warning
            .map(|w| w.reason)
            .unwrap_or_else(|| "no snapshot records".to_string());
        return Err(TraceError::Unparseable { path, reason });
    }

    if let Some(warning) = &warning {
        tracing::warn!(
            path = %warning.path.display(),
            valid = warning.valid,
            discarded = warning.discarded,
            reason = %warning.reason,
            "Truncated trace"
        );
    }

    samples.sort_by_key(|s| s.elapsed);

    Ok(Samples {
        time_unit: time_unit.unwrap_or_default(),
        samples,
        peak_sites: peak
            .and_then(|s| s.tree)
            .map(|tree| peak_sites(&tree, options))
            .unwrap_or_default(),
        warning,
    })
}

/// The profiler's own peak wins; otherwise the largest detailed snapshot.
fn is_better_peak(snapshot: &Snapshot, current: Option<&Snapshot>) -> bool {
    if snapshot.tree.is_none() {
        return false;
    }
    match current {
        None => true,
        Some(current) if current.kind == TreeKind::Peak => snapshot.kind == TreeKind::Peak,
        Some(current) => snapshot.kind == TreeKind::Peak || snapshot.heap > current.heap,
    }
}

fn peak_sites(root: &HeapNode, options: &ExtractOptions) -> BTreeMap<String, u64> {
    let mut sites = BTreeMap::new();
    for node in &root.children {
        let label = normalize_label(&node.label);
        if !options.is_ignored(&label) {
            *sites.entry(label).or_insert(0) += node.bytes;
        }
    }
    sites
}

fn read(path: &Path) -> Result<String, TraceError> {
    let bytes = fs::read(path).map_err(|e| TraceError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(index: u64, time: u64, heap: u64, tree: Option<&str>) -> String {
        let kind = if tree.is_some() { "detailed" } else { "empty" };
        format!(
            "#-----------\nsnapshot={}\n#-----------\ntime={}\nmem_heap_B={}\nmem_heap_extra_B=0\nmem_stacks_B=0\nheap_tree={}\n{}",
            index,
            time,
            heap,
            kind,
            tree.unwrap_or("")
        )
    }

    fn trace(records: &[String]) -> String {
        let mut text = "desc: (none)\ncmd: ./memory rustls\ntime_unit: i\n".to_string();
        for r in records {
            text.push_str(r);
        }
        text
    }

    #[test]
    fn test_extract_subtracts_bookkeeping() {
        let dir = TempDir::new().unwrap();
        let tree = "\
n2: 5000 (heap allocation functions) malloc/new/new[], --alloc-fns, etc.
 n1: 4000 0x1: main (memory.rs:10)
  n0: 1000 0x2: crabgrind::monitor_command (/root/.cargo/registry/src/index/crabgrind-0.1.9/src/lib.rs:5)
 n0: 1000 0x3: _dl_init (in /usr/libexec/valgrind/vgpreload_massif-amd64-linux.so)
";
        let path = dir.path().join("massif.out");
        fs::write(
            &path,
            trace(&[record(0, 0, 100, None), record(1, 10, 5000, Some(tree))]),
        )
        .unwrap();

        let samples = extract(&TraceHandle::from_file(&path), &ExtractOptions::default()).unwrap();
        assert_eq!(
            samples.samples,
            vec![
                Sample { elapsed: 0, heap_bytes: 100 },
                Sample { elapsed: 10, heap_bytes: 3000 },
            ]
        );
        assert!(samples.warning.is_none());
        assert_eq!(samples.peak_sites.get("main (memory.rs:10)"), Some(&4000));
        assert_eq!(samples.peak_sites.len(), 1);
    }

    #[test]
    fn test_snapshot_files_ordered_numerically() {
        let dir = TempDir::new().unwrap();
        for (index, heap) in [(0u64, 100u64), (2, 300), (10, 1100), (1, 200)] {
            fs::write(
                dir.path().join(format!("{}.snapshot", index)),
                trace(&[record(0, index * 100, heap, None)]),
            )
            .unwrap();
        }
        // The profiler's final output is ignored when snapshots exist
        fs::write(dir.path().join("massif.out"), trace(&[record(0, 0, 1, None)])).unwrap();

        let handle = TraceHandle::discover(dir.path()).unwrap();
        let names: Vec<_> = handle
            .files()
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["0.snapshot", "1.snapshot", "2.snapshot", "10.snapshot"]);

        let samples = extract(&handle, &ExtractOptions::default()).unwrap();
        let heaps: Vec<_> = samples.samples.iter().map(|s| s.heap_bytes).collect();
        assert_eq!(heaps, vec![100, 200, 300, 1100]);
        assert_eq!(samples.mean_growth(), Some(1000.0 / 3.0));
    }

    #[test]
    fn test_truncated_file_stops_extraction() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("0.snapshot"), trace(&[record(0, 0, 100, None)])).unwrap();
        fs::write(
            dir.path().join("1.snapshot"),
            "desc: x\ntime_unit: i\nsnapshot=1\ntime=5\n",
        )
        .unwrap();
        fs::write(dir.path().join("2.snapshot"), trace(&[record(2, 10, 300, None)])).unwrap();

        let handle = TraceHandle::discover(dir.path()).unwrap();
        let samples = extract(&handle, &ExtractOptions::default()).unwrap();

        assert_eq!(samples.len(), 1);
        let warning = samples.warning.unwrap();
        assert_eq!(warning.valid, 1);
        assert_eq!(warning.discarded, 2);
        assert!(warning.path.ends_with("1.snapshot"));
    }

    #[test]
    fn test_output_sorted_by_elapsed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("massif.out");
        fs::write(
            &path,
            trace(&[record(0, 50, 1, None), record(1, 10, 2, None), record(2, 50, 3, None)]),
        )
        .unwrap();

        let samples = extract(&TraceHandle::from_file(&path), &ExtractOptions::default()).unwrap();
        let order: Vec<_> = samples.samples.iter().map(|s| (s.elapsed, s.heap_bytes)).collect();
        // Stable: equal elapsed keeps file order
        assert_eq!(order, vec![(10, 2), (50, 1), (50, 3)]);
    }

    #[test]
    fn test_empty_and_garbage_unparseable() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("massif.out.1");
        fs::write(&empty, "").unwrap();
        let garbage = dir.path().join("massif.out.2");
        fs::write(&garbage, "\u{0}\u{1}binary junk").unwrap();

        for path in [empty, garbage] {
            let result = extract(&TraceHandle::from_file(&path), &ExtractOptions::default());
            assert!(matches!(result, Err(TraceError::Unparseable { .. })));
        }
    }

    #[test]
    fn test_discover_missing() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("driver.log"), "hello").unwrap();
        assert!(matches!(
            TraceHandle::discover(dir.path()),
            Err(TraceError::Missing { .. })
        ));
    }

    #[test]
    fn test_remove_deletes_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("massif.out");
        fs::write(&path, trace(&[record(0, 0, 1, None)])).unwrap();

        let handle = TraceHandle::discover(dir.path()).unwrap();
        handle.remove().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_clears_unused_profiler_output() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("0.snapshot"), trace(&[record(0, 0, 1, None)])).unwrap();
        fs::write(dir.path().join("massif.out"), trace(&[record(0, 0, 1, None)])).unwrap();
        fs::write(dir.path().join("driver.log"), "done").unwrap();

        let handle = TraceHandle::discover(dir.path()).unwrap();
        assert_eq!(handle.files().len(), 1);
        handle.remove().unwrap();

        let left: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(left, vec!["driver.log".to_string()]);
    }

    #[test]
    fn test_discover_nested_snapshot_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("target/memory/rustls_client");
        fs::create_dir_all(&nested).unwrap();
        for index in [1u64, 0] {
            fs::write(
                nested.join(format!("{}.snapshot", index)),
                trace(&[record(0, index, 100 + index, None)]),
            )
            .unwrap();
        }
        fs::write(dir.path().join("massif.out"), trace(&[record(0, 0, 1, None)])).unwrap();

        let snapshot_dir = Path::new("target/memory/rustls_client");
        let handle = TraceHandle::discover_in(dir.path(), snapshot_dir).unwrap();
        assert_eq!(handle.files(), &[nested.join("0.snapshot"), nested.join("1.snapshot")]);

        handle.remove().unwrap();
        assert!(!dir.path().join("target").exists());
        assert!(!dir.path().join("massif.out").exists());
        assert!(dir.path().exists());
    }

    #[test]
    fn test_nested_snapshot_dir_falls_back_to_profiler_output() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("massif.out"), trace(&[record(0, 0, 1, None)])).unwrap();

        let snapshot_dir = Path::new("target/memory/openssl");
        let handle = TraceHandle::discover_in(dir.path(), snapshot_dir).unwrap();
        assert_eq!(handle.files(), &[dir.path().join("massif.out")]);

        let empty = TempDir::new().unwrap();
        assert!(matches!(
            TraceHandle::discover_in(empty.path(), snapshot_dir),
            Err(TraceError::Missing { dir }) if dir.ends_with("target/memory/openssl")
        ));
    }

    #[test]
    fn test_statistics() {
        let samples = Samples {
            time_unit: TimeUnit::Instructions,
            samples: vec![
                Sample { elapsed: 0, heap_bytes: 10 },
                Sample { elapsed: 1, heap_bytes: 50 },
                Sample { elapsed: 2, heap_bytes: 30 },
            ],
            peak_sites: BTreeMap::new(),
            warning: None,
        };
        assert_eq!(samples.baseline(), Some(10));
        assert_eq!(samples.peak(), Some(50));
        assert_eq!(samples.final_heap(), Some(30));
        assert_eq!(samples.max_elapsed(), 2);
        assert_eq!(samples.mean_growth(), Some(10.0));
    }
}
