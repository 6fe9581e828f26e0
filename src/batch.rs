//! One analysis batch: locate logs, parse them concurrently, reconcile,
//! score and build the report.
//!
//! Failures on individual logs become `SkippedLog` entries. Only a failure to
//! list the storage location aborts the batch.
use crate::config::AnalyzerConfig;
use crate::estimator::CostEstimator;
use crate::locator::LogLocator;
use crate::parser::{self, ParseOutcome};
use crate::pricing::{self, PricingMode, PricingSource, RateTable};
use crate::reconcile::RunReconciler;
use crate::record::{ParsedRun, PipelineRunEntry, RateSource};
use crate::report::{Report, ReportBuilder, SkipReason, SkippedLog};
use crate::storage::{LogStore, StorageError};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Errors that abort a whole batch.
#[derive(Debug)]
pub enum BatchError {
    InvalidPattern {
        pattern: String,
        source: glob::PatternError,
    },
    Locate(StorageError),
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchError::InvalidPattern { pattern, source } => {
                write!(f, "invalid log pattern {pattern:?}: {source}")
            }
            BatchError::Locate(e) => write!(f, "failed to list logs: {e}"),
        }
    }
}

impl std::error::Error for BatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BatchError::InvalidPattern { source, .. } => Some(source),
            BatchError::Locate(e) => Some(e),
        }
    }
}

/// Everything a batch produced.
#[derive(Debug)]
pub struct BatchOutcome {
    pub report: Report,
    pub entries: Vec<PipelineRunEntry>,
    pub rate_source: RateSource,
    /// Logs found by the locator.
    pub located: usize,
    /// Malformed entries skipped across all parsed logs.
    pub malformed_entries: usize,
}

/// Run one batch against `store`.
///
/// With no `logs.app_name` configured, every application name found is
/// reconciled separately and all of them are reported.
pub async fn run_batch(
    store: Arc<dyn LogStore>,
    config: &AnalyzerConfig,
    pricing: Option<Arc<dyn PricingSource>>,
) -> Result<BatchOutcome, BatchError> {
    let locator =
        LogLocator::with_patterns(&config.logs.patterns).map_err(|e| BatchError::InvalidPattern {
            pattern: config.logs.patterns.join(", "),
            source: e,
        })?;
    let object_filter = config
        .logs
        .object_filter
        .as_deref()
        .map(|f| {
            glob::Pattern::new(f).map_err(|e| BatchError::InvalidPattern {
                pattern: f.to_string(),
                source: e,
            })
        })
        .transpose()?;

    let ids: Vec<String> = locator
        .locate(store.as_ref(), &config.logs.location, object_filter.as_ref())
        .map_err(BatchError::Locate)?
        .collect();
    let located = ids.len();
    tracing::info!(located, location = %config.logs.location, "located event logs");

    let (parsed, mut skipped) =
        parse_all(Arc::clone(&store), ids, config.batch.max_concurrent_reads).await;
    let malformed_entries = parsed.iter().map(|p| p.skipped_entries).sum();

    let reconciled = reconcile(parsed, config);

    let (rates, rate_source) = load_rates(config, pricing).await;
    let estimator = CostEstimator::new(&rates, rate_source)
        .with_incomplete_policy(config.scoring.incomplete)
        .with_memory_overhead(config.pricing.include_memory_overhead);

    let entries: Vec<PipelineRunEntry> = reconciled
        .into_iter()
        .map(|run| PipelineRunEntry {
            score: estimator.estimate(&run.record),
            record: run.record,
            source_log_id: run.source_log_id,
        })
        .collect();

    skipped.sort_by(|a, b| a.source_log_id.cmp(&b.source_log_id));
    let report = ReportBuilder::new().with_skipped(skipped).build(&entries);

    tracing::info!(
        runs = report.rows.len(),
        skipped = report.skipped.len(),
        malformed_entries,
        ?rate_source,
        "batch complete"
    );

    Ok(BatchOutcome {
        report,
        entries,
        rate_source,
        located,
        malformed_entries,
    })
}

/// Read and parse every log with at most `limit` in flight.
async fn parse_all(
    store: Arc<dyn LogStore>,
    ids: Vec<String>,
    limit: usize,
) -> (Vec<ParsedRun>, Vec<SkippedLog>) {
    let permits = Arc::new(Semaphore::new(limit.max(1)));
    let mut tasks = JoinSet::new();
    let mut task_ids = HashMap::new();

    for id in ids {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let store = Arc::clone(&store);
        let object_id = id.clone();
        let handle = tasks.spawn_blocking(move || {
            let _permit = permit;
            let outcome = read_and_parse(store.as_ref(), &object_id);
            (object_id, outcome)
        });
        task_ids.insert(handle.id(), id);
    }

    let mut parsed = Vec::new();
    let mut skipped = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((source_log_id, Ok(outcome))) => {
                if outcome.malformed_entries > 0 {
                    tracing::warn!(
                        log = %source_log_id,
                        malformed = outcome.malformed_entries,
                        "skipped malformed log entries"
                    );
                }
                parsed.push(ParsedRun {
                    record: outcome.record,
                    source_log_id,
                    skipped_entries: outcome.malformed_entries,
                });
            }
            Ok((source_log_id, Err(e))) => {
                tracing::warn!(log = %source_log_id, error = %e, "skipping unreadable log");
                skipped.push(SkippedLog {
                    source_log_id,
                    reason: SkipReason::StorageUnavailable,
                    detail: e.to_string(),
                });
            }
            Err(e) => {
                let source_log_id = task_ids.remove(&e.id()).unwrap_or_default();
                tracing::warn!(log = %source_log_id, error = %e, "parse task failed");
                skipped.push(SkippedLog {
                    source_log_id,
                    reason: SkipReason::Undecodable,
                    detail: e.to_string(),
                });
            }
        }
    }
    (parsed, skipped)
}

fn read_and_parse(store: &dyn LogStore, object_id: &str) -> Result<ParseOutcome, StorageError> {
    let raw = store.read(object_id)?;
    let content = String::from_utf8_lossy(&raw);
    Ok(parser::parse_log(&content))
}

fn reconcile(parsed: Vec<ParsedRun>, config: &AnalyzerConfig) -> Vec<ParsedRun> {
    let name_match = config.logs.name_match;
    // One reconciler per name key; spellings equal under `name_match` share one.
    let names: BTreeSet<String> = match &config.logs.app_name {
        Some(name) => BTreeSet::from([name.clone()]),
        // Logs without a start event have no name to report under.
        None => parsed
            .iter()
            .map(|p| name_match.key(&p.record.app_name))
            .filter(|key| !key.is_empty())
            .collect(),
    };

    names
        .into_iter()
        .flat_map(|name| {
            RunReconciler::new(name)
                .with_name_match(name_match)
                .reconcile(parsed.iter().cloned())
        })
        .collect()
}

async fn load_rates(
    config: &AnalyzerConfig,
    pricing: Option<Arc<dyn PricingSource>>,
) -> (RateTable, RateSource) {
    let mode = config.pricing.mode;
    let default_rate = config.pricing.default_rate();
    if mode == PricingMode::Static {
        return pricing::resolve_rates(mode, None, default_rate);
    }

    // The pricing collaborator may block on I/O.
    let fetched = tokio::task::spawn_blocking(move || {
        pricing::resolve_rates(mode, pricing.as_deref(), default_rate)
    })
    .await;
    match fetched {
        Ok(resolved) => resolved,
        Err(e) => {
            tracing::warn!(error = %e, "pricing task failed, using embedded rates");
            (
                RateTable::embedded().with_default_rate(default_rate),
                RateSource::StaleFallback,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::ResourceClass;
    use crate::storage::LocalStore;
    use std::path::Path;
    use tempfile::tempdir;

    const HOUR_MS: i64 = 3_600_000;

    fn write_log(root: &Path, app_id: &str, name: &str, start: i64, end: Option<i64>) {
        let dir = root.join(format!("eventlog_v2_{app_id}"));
        std::fs::create_dir_all(&dir).unwrap();
        let mut lines = vec![
            format!(
                r#"{{"Event":"SparkListenerApplicationStart","App Name":"{name}","App ID":"{app_id}","Timestamp":{start}}}"#
            ),
            r#"{"Event":"SparkListenerEnvironmentUpdate","Spark Properties":{"spark.executor.cores":"4","spark.executor.memory":"8g","spark.executor.instances":"2"}}"#.to_string(),
            "this line is not json".to_string(),
        ];
        if let Some(end) = end {
            lines.push(format!(
                r#"{{"Event":"SparkListenerApplicationEnd","Timestamp":{end}}}"#
            ));
        }
        std::fs::write(dir.join(format!("events_1_{app_id}")), lines.join("\n")).unwrap();
    }

    fn config_for(root: &Path, app: Option<&str>) -> AnalyzerConfig {
        let mut cfg = AnalyzerConfig::default();
        cfg.logs.root = root.to_path_buf();
        cfg.logs.app_name = app.map(str::to_string);
        cfg.batch.max_concurrent_reads = 2;
        cfg
    }

    struct FixedPricing;

    impl PricingSource for FixedPricing {
        fn fetch_rates(&self) -> Result<Vec<ResourceClass>, crate::pricing::PricingError> {
            Ok(vec![ResourceClass {
                name: "fixed".into(),
                vcpu: 8,
                memory_gb: 16.0,
                vcpu_rate: 0.05,
                memory_rate: 0.01,
            }])
        }
    }

    #[tokio::test]
    async fn end_to_end_single_pipeline() {
        let dir = tempdir().unwrap();
        let t0 = 1_739_793_526_775_i64;
        write_log(dir.path(), "app-b", "etl", t0 + HOUR_MS * 24 * 7, Some(t0 + HOUR_MS * 24 * 7 + HOUR_MS));
        write_log(dir.path(), "app-a", "etl", t0, Some(t0 + HOUR_MS));
        write_log(dir.path(), "app-c", "other", t0, Some(t0 + HOUR_MS));
        write_log(dir.path(), "app-d", "etl", t0 + 5, None);

        let mut cfg = config_for(dir.path(), Some("etl"));
        cfg.pricing.mode = PricingMode::Live;
        let store: Arc<dyn LogStore> = Arc::new(LocalStore::new(dir.path()));
        let pricing: Arc<dyn PricingSource> = Arc::new(FixedPricing);

        let out = run_batch(store, &cfg, Some(pricing)).await.unwrap();
        assert_eq!(out.located, 4);
        assert_eq!(out.malformed_entries, 4);
        assert_eq!(out.rate_source, RateSource::Live);

        let ids: Vec<&str> = out.report.rows.iter().map(|r| r.app_id.as_str()).collect();
        assert_eq!(ids, vec!["app-a", "app-d", "app-b"]);
        assert!((out.report.rows[0].resource_estimate_score.unwrap() - 0.56).abs() < 1e-9);
        assert_eq!(out.report.rows[1].resource_estimate_score, None);
        assert!(out.report.skipped.is_empty());

        let yearly: f64 = out
            .report
            .aggregates
            .iter()
            .filter(|a| a.period_kind == crate::report::PeriodKind::Yearly)
            .map(|a| a.total_score)
            .sum();
        assert!((yearly - 1.12).abs() < 1e-9);
    }

    #[tokio::test]
    async fn live_mode_without_source_falls_back() {
        let dir = tempdir().unwrap();
        write_log(dir.path(), "app-a", "etl", 1_000_000, Some(1_000_000 + HOUR_MS));
        let mut cfg = config_for(dir.path(), Some("etl"));
        cfg.pricing.mode = PricingMode::Live;
        let store: Arc<dyn LogStore> = Arc::new(LocalStore::new(dir.path()));

        let out = run_batch(store, &cfg, None).await.unwrap();
        assert_eq!(out.rate_source, RateSource::StaleFallback);
        match &out.entries[0].score {
            crate::record::Score::Computed(s) => assert!(s.approximate),
            other => panic!("expected score, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn all_pipelines_when_no_name_given() {
        let dir = tempdir().unwrap();
        write_log(dir.path(), "app-a", "etl", 2_000, Some(3_000));
        write_log(dir.path(), "app-b", "other", 1_000, Some(3_000));
        let store: Arc<dyn LogStore> = Arc::new(LocalStore::new(dir.path()));

        let out = run_batch(store, &config_for(dir.path(), None), None).await.unwrap();
        let names: Vec<&str> = out.report.rows.iter().map(|r| r.pipeline_name.as_str()).collect();
        assert_eq!(names, vec!["other", "etl"]);
    }

    #[tokio::test]
    async fn mixed_case_names_reconciled_once_when_ignoring_case() {
        let dir = tempdir().unwrap();
        write_log(dir.path(), "app-a", "etl", 1_000, Some(2_000));
        write_log(dir.path(), "app-b", "ETL", 3_000, Some(4_000));
        let mut cfg = config_for(dir.path(), None);
        cfg.logs.name_match = crate::reconcile::NameMatch::IgnoreCase;
        let store: Arc<dyn LogStore> = Arc::new(LocalStore::new(dir.path()));

        let out = run_batch(store, &cfg, None).await.unwrap();
        let ids: Vec<&str> = out.report.rows.iter().map(|r| r.app_id.as_str()).collect();
        assert_eq!(ids, vec!["app-a", "app-b"]);

        let unique: BTreeSet<&str> = out.entries.iter().map(|e| e.record.app_id.as_str()).collect();
        assert_eq!(unique.len(), out.entries.len());
        let yearly_runs: usize = out
            .report
            .aggregates
            .iter()
            .filter(|a| a.period_kind == crate::report::PeriodKind::Yearly)
            .map(|a| a.runs)
            .sum();
        assert_eq!(yearly_runs, 2);
    }

    #[tokio::test]
    async fn exact_match_keeps_spellings_apart() {
        let dir = tempdir().unwrap();
        write_log(dir.path(), "app-a", "etl", 1_000, Some(2_000));
        write_log(dir.path(), "app-b", "ETL", 3_000, Some(4_000));
        let store: Arc<dyn LogStore> = Arc::new(LocalStore::new(dir.path()));

        let out = run_batch(store, &config_for(dir.path(), None), None).await.unwrap();
        let names: Vec<&str> = out.report.rows.iter().map(|r| r.pipeline_name.as_str()).collect();
        assert_eq!(names, vec!["etl", "ETL"]);
    }

    #[tokio::test]
    async fn empty_store_gives_no_data_report() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn LogStore> = Arc::new(LocalStore::new(dir.path()));
        let out = run_batch(store, &config_for(dir.path(), Some("etl")), None)
            .await
            .unwrap();
        assert!(out.report.is_empty());
        assert!(out.report.aggregates.is_empty());
        assert_eq!(out.located, 0);
    }

    #[tokio::test]
    async fn missing_location_aborts_batch() {
        let store: Arc<dyn LogStore> = Arc::new(LocalStore::new("/nonexistent/sparkcost"));
        let cfg = config_for(Path::new("/nonexistent/sparkcost"), Some("etl"));
        assert!(matches!(
            run_batch(store, &cfg, None).await,
            Err(BatchError::Locate(_))
        ));
    }

    /// Store whose reads fail for one object.
    struct FlakyStore {
        inner: LocalStore,
        broken: String,
    }

    impl LogStore for FlakyStore {
        fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
            self.inner.list(prefix)
        }

        fn read(&self, object_id: &str) -> Result<Vec<u8>, StorageError> {
            if object_id == self.broken {
                return Err(StorageError::Read {
                    object_id: object_id.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
                });
            }
            self.inner.read(object_id)
        }
    }

    #[tokio::test]
    async fn unreadable_log_is_isolated() {
        let dir = tempdir().unwrap();
        write_log(dir.path(), "app-a", "etl", 1_000, Some(2_000));
        write_log(dir.path(), "app-b", "etl", 3_000, Some(4_000));
        let store: Arc<dyn LogStore> = Arc::new(FlakyStore {
            inner: LocalStore::new(dir.path()),
            broken: "eventlog_v2_app-a/events_1_app-a".into(),
        });

        let out = run_batch(store, &config_for(dir.path(), Some("etl")), None)
            .await
            .unwrap();
        assert_eq!(out.report.rows.len(), 1);
        assert_eq!(out.report.rows[0].app_id, "app-b");
        assert_eq!(out.report.skipped.len(), 1);
        assert_eq!(out.report.skipped[0].reason, SkipReason::StorageUnavailable);
    }
}
