// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Massif text format parser.
//!
//! ```text
//! desc: --massif-out-file=massif.out
//! cmd: ./memory s2n-tls pair
//! time_unit: i
//! #-----------
//! snapshot=0
//! #-----------
//! time=0
//! mem_heap_B=0
//! mem_heap_extra_B=0
//! mem_stacks_B=0
//! heap_tree=detailed
//! n1: 1024 (heap allocation functions) malloc/new/new[], --alloc-fns, etc.
//!  n0: 1024 0x4C2DB8F: s2n_init (s2n_init.c:40)
//! ```
//!
//! Parsing stops at the first malformed record. Everything before it is
//! kept, so a profiler killed mid-write still yields its complete records.

use crate::types::TimeUnit;

/// Shape of a snapshot's heap tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeKind {
    Empty,
    Detailed,
    Peak,
}

/// One heap-tree node: bytes attributed to an allocation site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapNode {
    pub bytes: u64,
    pub label: String,
    pub children: Vec<HeapNode>,
}

/// One massif record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub index: u64,
    pub time: u64,
    pub heap: u64,
    pub heap_extra: u64,
    pub stacks: u64,
    pub kind: TreeKind,
    /// Root of the tree for detailed and peak snapshots.
    pub tree: Option<HeapNode>,
}

/// Where and why parsing stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncation {
    /// Records dropped, counting the malformed one.
    pub discarded: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTrace {
    pub cmd: Option<String>,
    pub time_unit: TimeUnit,
    pub snapshots: Vec<Snapshot>,
    pub truncation: Option<Truncation>,
}

/// Parse massif output. Never fails: garbage yields zero snapshots.
pub fn parse(text: &str) -> ParsedTrace {
    let mut cursor = Cursor::new(text);
    let mut cmd = None;
    let mut time_unit = TimeUnit::default();

    while let Some(line) = cursor.peek() {
        if line.starts_with("snapshot=") {
            break;
        }
        cursor.advance();
        if let Some(value) = line.strip_prefix("cmd:") {
            cmd = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("time_unit:") {
            time_unit = TimeUnit::from_massif(value).unwrap_or_default();
        }
    }

    let mut snapshots = Vec::new();
    let mut truncation = None;

    while let Some(line) = cursor.next_line() {
        match parse_record(line, &mut cursor) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(reason) => {
                truncation = Some(Truncation {
                    discarded: 1 + cursor.remaining_records(),
                    reason,
                });
                break;
            }
        }
    }

    ParsedTrace {
        cmd,
        time_unit,
        snapshots,
        truncation,
    }
}

/// Count records in `text` without parsing them.
pub fn count_records(text: &str) -> usize {
    text.lines().filter(|l| l.starts_with("snapshot=")).count()
}

fn parse_record(header: &str, cursor: &mut Cursor<'_>) -> Result<Snapshot, String> {
    let index = header
        .strip_prefix("snapshot=")
        .ok_or_else(|| format!("expected snapshot=N, found {:?}", header))?;
    let index: u64 = index
        .trim()
        .parse()
        .map_err(|_| format!("bad snapshot index {:?}", index))?;

    let time = number_field(cursor, "time", index)?;
    let heap = number_field(cursor, "mem_heap_B", index)?;
    let heap_extra = number_field(cursor, "mem_heap_extra_B", index)?;
    let stacks = number_field(cursor, "mem_stacks_B", index)?;

    let kind = match field(cursor, "heap_tree", index)? {
        "empty" => TreeKind::Empty,
        "detailed" => TreeKind::Detailed,
        "peak" => TreeKind::Peak,
        other => return Err(format!("snapshot {}: unknown heap_tree {:?}", index, other)),
    };

    let tree = match kind {
        TreeKind::Empty => None,
        TreeKind::Detailed | TreeKind::Peak => Some(
            parse_node(cursor, 0).map_err(|reason| format!("snapshot {}: {}", index, reason))?,
        ),
    };

    Ok(Snapshot {
        index,
        time,
        heap,
        heap_extra,
        stacks,
        kind,
        tree,
    })
}

fn field<'a>(cursor: &mut Cursor<'a>, key: &str, index: u64) -> Result<&'a str, String> {
    let line = cursor
        .next_line()
        .ok_or_else(|| format!("snapshot {}: ends before {}=", index, key))?;
    line.strip_prefix(key)
        .and_then(|rest| rest.strip_prefix('='))
        .map(str::trim)
        .ok_or_else(|| format!("snapshot {}: expected {}=, found {:?}", index, key, line))
}

fn number_field(cursor: &mut Cursor<'_>, key: &str, index: u64) -> Result<u64, String> {
    let value = field(cursor, key, index)?;
    value
        .parse()
        .map_err(|_| format!("snapshot {}: {}={:?} is not a byte count", index, key, value))
}

/// `<depth spaces>nK: BYTES LABEL` followed by K children at depth + 1.
fn parse_node(cursor: &mut Cursor<'_>, depth: usize) -> Result<HeapNode, String> {
    let line = cursor
        .next_line()
        .ok_or_else(|| "heap tree ends early".to_string())?;

    let body = line.trim_start_matches(' ');
    if line.len() - body.len() != depth {
        return Err(format!("heap tree node at wrong depth: {:?}", line));
    }

    let (count, rest) = body
        .strip_prefix('n')
        .and_then(|b| b.split_once(": "))
        .ok_or_else(|| format!("malformed heap tree node: {:?}", line))?;
    let count: usize = count
        .parse()
        .map_err(|_| format!("bad child count in {:?}", line))?;

    let (bytes, label) = rest.split_once(' ').unwrap_or((rest, ""));
    let bytes: u64 = bytes
        .parse()
        .map_err(|_| format!("bad byte count in {:?}", line))?;

    let children = (0..count)
        .map(|_| parse_node(cursor, depth + 1))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HeapNode {
        bytes,
        label: label.to_string(),
        children,
    })
}

/// Line cursor that skips separator comments and blank lines.
struct Cursor<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            lines: text
                .lines()
                .map(|l| l.trim_end_matches('\r'))
                .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
                .collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.pos).copied()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn next_line(&mut self) -> Option<&'a str> {
        let line = self.peek()?;
        self.advance();
        Some(line)
    }

    fn remaining_records(&self) -> usize {
        self.lines[self.pos.min(self.lines.len())..]
            .iter()
            .filter(|l| l.starts_with("snapshot="))
            .count()
    }
}
