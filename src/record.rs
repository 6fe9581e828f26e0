//! Per-run data model shared by the parser, reconciler, estimator and report.
//!
//! Every value here is derived freshly from source logs on each invocation
//! and is immutable once built.
use serde::Serialize;

/// Whether a run's log carried both session boundaries in a sane order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    Complete,
    Incomplete,
}

/// Structured metrics reconstructed from one event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsRecord {
    pub app_id: String,
    pub app_name: String,
    /// Epoch milliseconds of the application start event (0 when absent).
    pub start_ts: i64,
    /// Epoch milliseconds of the application end event.
    pub end_ts: Option<i64>,
    pub executor_cores: u32,
    pub executor_memory_bytes: u64,
    /// Off-heap overhead per executor; only scored when configured.
    pub executor_memory_overhead_bytes: u64,
    pub max_executors: u32,
    pub dynamic_allocation_enabled: bool,
    pub completeness: Completeness,
    /// Latest timestamp carried by any event in the log.
    pub last_event_ts: Option<i64>,
    /// The executor memory property was present but could not be parsed.
    pub memory_unparsed: bool,
}

impl MetricsRecord {
    /// Wall-clock session length in milliseconds, for complete runs only.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.completeness, self.end_ts) {
            (Completeness::Complete, Some(end)) => Some(end - self.start_ts),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completeness == Completeness::Complete
    }
}

/// Where the rates used for a score came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    /// The embedded table.
    Static,
    /// Rates read from the pricing collaborator for this invocation.
    Live,
    /// Live rates were requested but unavailable; the embedded table was used.
    StaleFallback,
}

/// Upper-bound resource cost estimate for one run.
///
/// Assumes the run held `max_executors` dedicated executors for its whole
/// session; sharing with other tenants is not modelled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceEstimateScore {
    pub score: f64,
    pub vcpu_hours: f64,
    pub memory_gb_hours: f64,
    pub rate_source: RateSource,
    /// Matched resource class, `None` when the flat default rate applied.
    pub resource_class: Option<String>,
    pub vcpu_rate: f64,
    pub memory_rate: f64,
    pub approximate: bool,
}

/// Why a run carries no score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotComputable {
    /// No usable end event.
    IncompleteRun,
    /// Start and end are too far apart to measure.
    DurationOutOfRange,
}

/// Outcome of scoring one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Score {
    Computed(ResourceEstimateScore),
    NotComputable { reason: NotComputable },
}

impl Score {
    pub fn value(&self) -> Option<f64> {
        match self {
            Score::Computed(s) => Some(s.score),
            Score::NotComputable { .. } => None,
        }
    }
}

/// One reconciled, scored run headed for the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineRunEntry {
    pub record: MetricsRecord,
    pub score: Score,
    pub source_log_id: String,
}

/// A parsed log before scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedRun {
    pub record: MetricsRecord,
    pub source_log_id: String,
    /// Malformed or unrecognised entries skipped while parsing.
    pub skipped_entries: usize,
}

#[cfg(test)]
pub(crate) fn sample_record(app_id: &str, app_name: &str, start: i64, end: Option<i64>) -> MetricsRecord {
    MetricsRecord {
        app_id: app_id.to_string(),
        app_name: app_name.to_string(),
        start_ts: start,
        end_ts: end,
        executor_cores: 4,
        executor_memory_bytes: 8 << 30,
        executor_memory_overhead_bytes: 0,
        max_executors: 2,
        dynamic_allocation_enabled: false,
        completeness: match end {
            Some(e) if e >= start => Completeness::Complete,
            _ => Completeness::Incomplete,
        },
        last_event_ts: end,
        memory_unparsed: false,
    }
}
