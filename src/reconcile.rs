//! Run reconciliation: filter runs by application name, collapse reruns that
//! share an application id, and impose a deterministic chronological order.
use crate::record::{MetricsRecord, ParsedRun, PipelineRunEntry};
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Anything that carries a run's metrics and the log it came from.
pub trait RunLike {
    fn record(&self) -> &MetricsRecord;
    fn source_log_id(&self) -> &str;
}

impl RunLike for ParsedRun {
    fn record(&self) -> &MetricsRecord {
        &self.record
    }

    fn source_log_id(&self) -> &str {
        &self.source_log_id
    }
}

impl RunLike for PipelineRunEntry {
    fn record(&self) -> &MetricsRecord {
        &self.record
    }

    fn source_log_id(&self) -> &str {
        &self.source_log_id
    }
}

/// How the target application name is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameMatch {
    #[default]
    Exact,
    IgnoreCase,
}

impl NameMatch {
    /// The form two names share exactly when this mode treats them as equal.
    pub fn key(self, name: &str) -> String {
        match self {
            NameMatch::Exact => name.to_string(),
            NameMatch::IgnoreCase => name.to_lowercase(),
        }
    }
}

/// Filters, deduplicates and orders runs of one named pipeline.
#[derive(Debug, Clone)]
pub struct RunReconciler {
    app_name: String,
    name_match: NameMatch,
}

impl RunReconciler {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            name_match: NameMatch::Exact,
        }
    }

    pub fn with_name_match(mut self, name_match: NameMatch) -> Self {
        self.name_match = name_match;
        self
    }

    fn matches(&self, name: &str) -> bool {
        self.name_match.key(name) == self.name_match.key(&self.app_name)
    }

    /// Reconcile `runs` into a deduplicated sequence ascending by start time,
    /// ties broken by application id.
    ///
    /// The result does not depend on the order of `runs`.
    pub fn reconcile<T: RunLike>(&self, runs: impl IntoIterator<Item = T>) -> Vec<T> {
        let mut by_app: BTreeMap<String, T> = BTreeMap::new();
        let mut total = 0usize;
        let mut duplicates = 0usize;

        for run in runs {
            total += 1;
            if !self.matches(&run.record().app_name) {
                continue;
            }
            match by_app.entry(run.record().app_id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(run);
                }
                Entry::Occupied(mut slot) => {
                    duplicates += 1;
                    if supersedes(&run, slot.get()) {
                        tracing::debug!(
                            app_id = %slot.key(),
                            dropped = slot.get().source_log_id(),
                            kept = run.source_log_id(),
                            "rerun supersedes earlier log"
                        );
                        slot.insert(run);
                    }
                }
            }
        }

        let mut ordered: Vec<T> = by_app.into_values().collect();
        ordered.sort_by(|a, b| {
            let (ra, rb) = (a.record(), b.record());
            ra.start_ts
                .cmp(&rb.start_ts)
                .then_with(|| ra.app_id.cmp(&rb.app_id))
        });

        tracing::debug!(
            app_name = %self.app_name,
            total,
            kept = ordered.len(),
            duplicates,
            "reconciled runs"
        );
        ordered
    }
}

/// Whether `candidate` should replace `kept` for the same application id.
///
/// Complete beats incomplete, then the later end time wins. Remaining ties
/// go to the greater source log id so the choice is order independent.
fn supersedes<T: RunLike>(candidate: &T, kept: &T) -> bool {
    let (c, k) = (candidate.record(), kept.record());
    let ordering = c
        .is_complete()
        .cmp(&k.is_complete())
        .then_with(|| c.end_ts.cmp(&k.end_ts))
        .then_with(|| candidate.source_log_id().cmp(kept.source_log_id()));
    ordering == Ordering::Greater
}
