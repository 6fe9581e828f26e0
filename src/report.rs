//! Report building: project scored runs into rows and calendar aggregates.
//!
//! The output is handed to an external renderer as JSON; a plain-text
//! summary is provided for the command line.
use crate::record::{Completeness, PipelineRunEntry};
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;

/// One run in the row table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    /// Run start, epoch milliseconds.
    pub timestamp: i64,
    pub pipeline_name: String,
    pub resource_estimate_score: Option<f64>,
    pub status: Completeness,
    pub app_id: String,
    pub source_log_id: String,
}

/// Calendar window kinds, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PeriodKind {
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl PeriodKind {
    pub const ALL: [PeriodKind; 4] = [
        PeriodKind::Weekly,
        PeriodKind::Monthly,
        PeriodKind::Quarterly,
        PeriodKind::Yearly,
    ];

    /// Label of the window of this kind containing `at`, e.g. `2025-W07`,
    /// `2025-02`, `2025-Q1`, `2025`.
    pub fn label(self, at: DateTime<Utc>) -> String {
        match self {
            PeriodKind::Weekly => {
                let week = at.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            PeriodKind::Monthly => format!("{}-{:02}", at.year(), at.month()),
            PeriodKind::Quarterly => format!("{}-Q{}", at.year(), (at.month() - 1) / 3 + 1),
            PeriodKind::Yearly => at.year().to_string(),
        }
    }
}

/// Summed score for one calendar window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportAggregate {
    pub period_kind: PeriodKind,
    pub period_label: String,
    pub total_score: f64,
    pub runs: usize,
}

/// A log that contributed nothing to the report, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedLog {
    pub source_log_id: String,
    pub reason: SkipReason,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The object could not be read from storage.
    StorageUnavailable,
    /// The parse task failed before producing a record.
    Undecodable,
}

/// The finished report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub rows: Vec<ReportRow>,
    pub aggregates: Vec<ReportAggregate>,
    pub skipped: Vec<SkippedLog>,
}

impl Report {
    /// True when no run made it into the report.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Builds a `Report` from reconciled, scored runs.
#[derive(Debug, Default)]
pub struct ReportBuilder {
    skipped: Vec<SkippedLog>,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Carry per-file skips into the report.
    pub fn with_skipped(mut self, skipped: Vec<SkippedLog>) -> Self {
        self.skipped = skipped;
        self
    }

    /// Build rows (ascending by start time) and non-empty window totals.
    ///
    /// Unscored runs appear as rows with a null score and never count
    /// towards an aggregate. Empty input gives an empty report.
    pub fn build(self, entries: &[PipelineRunEntry]) -> Report {
        let mut ordered: Vec<&PipelineRunEntry> = entries.iter().collect();
        ordered.sort_by(|a, b| {
            a.record
                .start_ts
                .cmp(&b.record.start_ts)
                .then_with(|| a.record.app_id.cmp(&b.record.app_id))
        });

        let rows = ordered
            .iter()
            .map(|e| ReportRow {
                timestamp: e.record.start_ts,
                pipeline_name: e.record.app_name.clone(),
                resource_estimate_score: e.score.value(),
                status: e.record.completeness,
                app_id: e.record.app_id.clone(),
                source_log_id: e.source_log_id.clone(),
            })
            .collect();

        let scored: Vec<(DateTime<Utc>, f64)> = ordered
            .iter()
            .filter_map(|e| {
                let score = e.score.value()?;
                match DateTime::from_timestamp_millis(e.record.start_ts) {
                    Some(at) => Some((at, score)),
                    None => {
                        tracing::warn!(
                            app_id = %e.record.app_id,
                            start_ts = e.record.start_ts,
                            "start time out of range, omitted from aggregates"
                        );
                        None
                    }
                }
            })
            .collect();

        let aggregates = PeriodKind::ALL
            .iter()
            .flat_map(|&kind| aggregate(kind, &scored))
            .collect();

        Report {
            rows,
            aggregates,
            skipped: self.skipped,
        }
    }
}

/// Fold time-ordered scores into consecutive windows of one kind.
fn aggregate(kind: PeriodKind, scored: &[(DateTime<Utc>, f64)]) -> Vec<ReportAggregate> {
    scored.iter().fold(Vec::new(), |mut acc: Vec<ReportAggregate>, (at, score)| {
        let label = kind.label(*at);
        match acc.last_mut() {
            Some(last) if last.period_label == label => {
                last.total_score += score;
                last.runs += 1;
            }
            _ => acc.push(ReportAggregate {
                period_kind: kind,
                period_label: label,
                total_score: *score,
                runs: 1,
            }),
        }
        acc
    })
}

/// Render a report as plain text.
pub fn format_report(report: &Report) -> String {
    let mut lines = Vec::new();

    if report.is_empty() {
        lines.push("No data: no pipeline runs matched.".to_string());
    } else {
        lines.push(format!("Runs: {}", report.rows.len()));
        for row in &report.rows {
            let when = DateTime::from_timestamp_millis(row.timestamp)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| row.timestamp.to_string());
            let score = match row.resource_estimate_score {
                Some(s) => format!("{s:.4}"),
                None => "incomplete".to_string(),
            };
            lines.push(format!("  {when}  {}  {}  {score}", row.pipeline_name, row.app_id));
        }

        let mut current = None;
        for agg in &report.aggregates {
            if current != Some(agg.period_kind) {
                lines.push(format!("{:?} totals:", agg.period_kind));
                current = Some(agg.period_kind);
            }
            lines.push(format!(
                "  {}  {:.4}  ({} run{})",
                agg.period_label,
                agg.total_score,
                agg.runs,
                if agg.runs == 1 { "" } else { "s" }
            ));
        }
    }

    if !report.skipped.is_empty() {
        lines.push(format!(
            "Skipped {} log{}:",
            report.skipped.len(),
            if report.skipped.len() == 1 { "" } else { "s" }
        ));
        for s in &report.skipped {
            lines.push(format!("  {} ({:?}): {}", s.source_log_id, s.reason, s.detail));
        }
    }

    lines.join("\n")
}
