//! Event log parsing: turn one raw Spark event log into a `MetricsRecord`.
//!
//! Malformed entries are skipped and counted, unknown event kinds are
//! ignored, and resource properties fall back to documented defaults.
//! The result depends only on the input bytes.
use crate::event::{self, SparkEvent};
use crate::record::{Completeness, MetricsRecord};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

pub const DEFAULT_EXECUTOR_CORES: u32 = 1;
pub const DEFAULT_MAX_EXECUTORS: u32 = 1;

const PROP_EXECUTOR_CORES: &str = "spark.executor.cores";
const PROP_EXECUTOR_MEMORY: &str = "spark.executor.memory";
const PROP_MEMORY_OVERHEAD: &[&str] = &[
    "spark.executor.memoryOverhead",
    "spark.yarn.executor.memoryOverhead",
];
const PROP_EXECUTOR_INSTANCES: &str = "spark.executor.instances";
const PROP_DYNAMIC_ENABLED: &str = "spark.dynamicAllocation.enabled";
const PROP_DYNAMIC_MAX: &str = "spark.dynamicAllocation.maxExecutors";

static MEMORY_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(\d+)\s*([kmgt])?b?\s*$").unwrap());

/// A non-fatal problem found while parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseIssue {
    /// An entry that is not valid JSON or not a tagged event. `entry` is 1-based.
    MalformedLogEntry { entry: usize, reason: String },
    /// A known property whose value could not be interpreted; the default applied.
    UnrecognizedProperty { key: String, value: String },
    /// The executor memory value could not be parsed; scored as zero.
    UnparseableMemory { key: String, value: String },
}

/// Everything the parser learned from one log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
    pub record: MetricsRecord,
    pub malformed_entries: usize,
    pub unrecognized_events: usize,
    pub issues: Vec<ParseIssue>,
}

/// Parse a whole log.
///
/// Accepts JSON lines (Spark's native format) or a single JSON array of events.
pub fn parse_log(content: &str) -> ParseOutcome {
    let mut acc = Accumulator::default();
    let mut issues = Vec::new();
    let mut malformed = 0usize;
    let mut unrecognized = 0usize;

    let mut handle = |entry: usize, parsed: Result<Value, String>| {
        let decoded = parsed.and_then(|v| event::decode(&v).map_err(|e| e.to_string()));
        match decoded {
            Ok(SparkEvent::Unrecognized { kind }) => {
                tracing::debug!(entry, kind = %kind, "ignoring unrecognized event");
                unrecognized += 1;
            }
            Ok(ev) => acc.apply(ev),
            Err(reason) => {
                malformed += 1;
                issues.push(ParseIssue::MalformedLogEntry { entry, reason });
            }
        }
    };

    match array_elements(content) {
        Some(items) => {
            for (i, item) in items.into_iter().enumerate() {
                handle(i + 1, serde_json::from_str(item).map_err(|e| e.to_string()));
            }
        }
        None => {
            for (i, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                handle(i + 1, serde_json::from_str(line).map_err(|e| e.to_string()));
            }
        }
    }

    let record = acc.finish(&mut issues);
    ParseOutcome {
        record,
        malformed_entries: malformed,
        unrecognized_events: unrecognized,
        issues,
    }
}

/// Split a log written as one JSON array into its raw top-level elements.
///
/// Elements are cut at top-level commas without parsing them, so one bad
/// element does not hide its neighbours. A missing closing bracket (a
/// truncated log) is tolerated. Returns `None` for line-oriented logs.
fn array_elements(content: &str) -> Option<Vec<&str>> {
    let body = content.trim().strip_prefix('[')?;
    let body = body.strip_suffix(']').unwrap_or(body);

    let mut elements = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, b) in body.bytes().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                elements.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    elements.push(&body[start..]);

    // Trailing commas and an empty array leave blank pieces.
    Some(
        elements
            .into_iter()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .collect(),
    )
}

/// Parse a memory size such as `4g`, `512m` or `1024`.
///
/// Suffixes `k`, `m`, `g`, `t` are case-insensitive powers of 1024 and may be
/// followed by `b`. A bare number is bytes.
pub fn parse_memory(value: &str) -> Option<u64> {
    parse_memory_with_unit(value, 1)
}

/// Like `parse_memory`, but a bare number is multiplied by `bare_unit`.
fn parse_memory_with_unit(value: &str, bare_unit: u64) -> Option<u64> {
    let caps = MEMORY_SIZE.captures(value)?;
    let amount: u64 = caps.get(1)?.as_str().parse().ok()?;
    let multiplier = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        None => bare_unit,
        Some(unit) => match unit.as_str() {
            "k" => 1 << 10,
            "m" => 1 << 20,
            "g" => 1 << 30,
            "t" => 1 << 40,
            _ => return None,
        },
    };
    amount.checked_mul(multiplier)
}

#[derive(Debug, Default)]
struct Accumulator {
    app_id: Option<String>,
    app_name: Option<String>,
    start_ts: Option<i64>,
    end_ts: Option<i64>,
    last_event_ts: Option<i64>,
    props: BTreeMap<String, String>,
    first_executor_cores: Option<u32>,
    live_executors: BTreeSet<String>,
    peak_executors: u32,
}

impl Accumulator {
    fn apply(&mut self, ev: SparkEvent) {
        if let Some(ts) = ev.timestamp() {
            self.last_event_ts = Some(self.last_event_ts.map_or(ts, |cur| cur.max(ts)));
        }

        match ev {
            SparkEvent::ApplicationStart {
                app_id,
                app_name,
                timestamp,
            } => {
                // First start event wins; reruns write a fresh log.
                if self.start_ts.is_none() && self.app_id.is_none() {
                    self.app_id = app_id;
                    self.app_name = app_name;
                    self.start_ts = timestamp;
                }
            }
            SparkEvent::ApplicationEnd { timestamp } => {
                if let Some(ts) = timestamp {
                    self.end_ts = Some(self.end_ts.map_or(ts, |cur| cur.max(ts)));
                }
            }
            SparkEvent::Config { properties } => {
                self.props.extend(properties);
            }
            SparkEvent::ExecutorAdded {
                executor_id,
                total_cores,
                ..
            } => {
                if self.first_executor_cores.is_none() {
                    self.first_executor_cores = total_cores;
                }
                self.live_executors.insert(executor_id);
                self.peak_executors = self.peak_executors.max(self.live_executors.len() as u32);
            }
            SparkEvent::ExecutorRemoved { executor_id, .. } => {
                self.live_executors.remove(&executor_id);
            }
            SparkEvent::Unrecognized { .. } => {}
        }
    }

    fn finish(self, issues: &mut Vec<ParseIssue>) -> MetricsRecord {
        let executor_cores = self
            .prop_u32(PROP_EXECUTOR_CORES, issues)
            .or(self.first_executor_cores)
            .filter(|&c| c > 0)
            .unwrap_or(DEFAULT_EXECUTOR_CORES);

        let mut memory_unparsed = false;
        let executor_memory_bytes = match self.props.get(PROP_EXECUTOR_MEMORY) {
            None => 0,
            Some(raw) => parse_memory(raw).unwrap_or_else(|| {
                memory_unparsed = true;
                issues.push(ParseIssue::UnparseableMemory {
                    key: PROP_EXECUTOR_MEMORY.to_string(),
                    value: raw.clone(),
                });
                0
            }),
        };

        // Spark reads a bare overhead value as MiB.
        let executor_memory_overhead_bytes = PROP_MEMORY_OVERHEAD
            .iter()
            .find_map(|key| self.props.get(*key).map(|raw| (*key, raw)))
            .map(|(key, raw)| {
                parse_memory_with_unit(raw, 1 << 20).unwrap_or_else(|| {
                    issues.push(ParseIssue::UnrecognizedProperty {
                        key: key.to_string(),
                        value: raw.clone(),
                    });
                    0
                })
            })
            .unwrap_or(0);

        let dynamic_allocation_enabled = match self.props.get(PROP_DYNAMIC_ENABLED) {
            None => false,
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" => true,
                "false" => false,
                _ => {
                    issues.push(ParseIssue::UnrecognizedProperty {
                        key: PROP_DYNAMIC_ENABLED.to_string(),
                        value: raw.clone(),
                    });
                    false
                }
            },
        };

        let configured_executors = if dynamic_allocation_enabled {
            self.prop_u32(PROP_DYNAMIC_MAX, issues)
        } else {
            self.prop_u32(PROP_EXECUTOR_INSTANCES, issues)
        };
        let max_executors = configured_executors
            .or((self.peak_executors > 0).then_some(self.peak_executors))
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_MAX_EXECUTORS);

        let completeness = match (self.start_ts, self.end_ts) {
            (Some(start), Some(end)) if end >= start => Completeness::Complete,
            _ => Completeness::Incomplete,
        };

        MetricsRecord {
            app_id: self.app_id.unwrap_or_default(),
            app_name: self.app_name.unwrap_or_default(),
            start_ts: self.start_ts.unwrap_or(0),
            end_ts: self.end_ts,
            executor_cores,
            executor_memory_bytes,
            executor_memory_overhead_bytes,
            max_executors,
            dynamic_allocation_enabled,
            completeness,
            last_event_ts: self.last_event_ts,
            memory_unparsed,
        }
    }

    fn prop_u32(&self, key: &str, issues: &mut Vec<ParseIssue>) -> Option<u32> {
        let raw = self.props.get(key)?;
        match raw.trim().parse::<u32>() {
            Ok(n) => Some(n),
            Err(_) => {
                issues.push(ParseIssue::UnrecognizedProperty {
                    key: key.to_string(),
                    value: raw.clone(),
                });
                None
            }
        }
    }
}
