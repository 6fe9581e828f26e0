//! Resource estimate scoring.
//!
//! `score = vcpu_hours * vcpu_rate + memory_gb_hours * memory_rate` where
//! `vcpu_hours = max_executors * executor_cores * hours` and
//! `memory_gb_hours = max_executors * executor_memory_gib * hours`.
//!
//! This is an upper bound: each run is assumed to hold its maximum executor
//! count for the whole session, with no sharing between tenants.
use crate::pricing::RateTable;
use crate::record::{
    Completeness, MetricsRecord, NotComputable, RateSource, ResourceEstimateScore, Score,
};
use serde::Deserialize;

const MS_PER_HOUR: f64 = 3_600_000.0;
const BYTES_PER_GIB: f64 = (1u64 << 30) as f64;

/// What to do with runs that never logged a usable end event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncompletePolicy {
    /// Leave them unscored.
    #[default]
    Exclude,
    /// Score up to the latest timestamp seen in the log.
    LastEvent,
}

/// Scores runs against one rate table.
#[derive(Debug, Clone)]
pub struct CostEstimator<'a> {
    rates: &'a RateTable,
    rate_source: RateSource,
    incomplete_policy: IncompletePolicy,
    include_memory_overhead: bool,
}

impl<'a> CostEstimator<'a> {
    pub fn new(rates: &'a RateTable, rate_source: RateSource) -> Self {
        Self {
            rates,
            rate_source,
            incomplete_policy: IncompletePolicy::Exclude,
            include_memory_overhead: false,
        }
    }

    pub fn with_incomplete_policy(mut self, policy: IncompletePolicy) -> Self {
        self.incomplete_policy = policy;
        self
    }

    pub fn with_memory_overhead(mut self, include: bool) -> Self {
        self.include_memory_overhead = include;
        self
    }

    /// Score one run, or explain why it cannot be scored.
    pub fn estimate(&self, record: &MetricsRecord) -> Score {
        let Some(end_ts) = self.scoring_end(record) else {
            return Score::NotComputable {
                reason: NotComputable::IncompleteRun,
            };
        };

        let Some(elapsed_ms) = end_ts.checked_sub(record.start_ts) else {
            tracing::warn!(
                app_id = %record.app_id,
                start_ts = record.start_ts,
                end_ts,
                "run duration overflows, not scored"
            );
            return Score::NotComputable {
                reason: NotComputable::DurationOutOfRange,
            };
        };
        let hours = elapsed_ms.max(0) as f64 / MS_PER_HOUR;
        let mut memory_bytes = record.executor_memory_bytes;
        if self.include_memory_overhead {
            memory_bytes = memory_bytes.saturating_add(record.executor_memory_overhead_bytes);
        }
        let memory_gib = memory_bytes as f64 / BYTES_PER_GIB;
        let executors = record.max_executors as f64;

        let vcpu_hours = executors * record.executor_cores as f64 * hours;
        let memory_gb_hours = executors * memory_gib * hours;

        let (rate, class) = self.rates.rate_for(record.executor_cores, memory_gib);
        let score = (vcpu_hours * rate.vcpu_rate + memory_gb_hours * rate.memory_rate).max(0.0);

        Score::Computed(ResourceEstimateScore {
            score,
            vcpu_hours,
            memory_gb_hours,
            rate_source: self.rate_source,
            resource_class: class.map(str::to_string),
            vcpu_rate: rate.vcpu_rate,
            memory_rate: rate.memory_rate,
            approximate: self.rate_source == RateSource::StaleFallback || record.memory_unparsed,
        })
    }

    fn scoring_end(&self, record: &MetricsRecord) -> Option<i64> {
        match (record.completeness, self.incomplete_policy) {
            (Completeness::Complete, _) => record.end_ts,
            (Completeness::Incomplete, IncompletePolicy::Exclude) => None,
            // A zero start means no start event was seen.
            (Completeness::Incomplete, IncompletePolicy::LastEvent) => record
                .last_event_ts
                .filter(|&last| record.start_ts > 0 && last >= record.start_ts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::{Rate, ResourceClass};
    use crate::record::sample_record;

    const HOUR_MS: i64 = 3_600_000;
    const T0: i64 = 1_739_793_526_775;

    fn flat_table() -> RateTable {
        RateTable::new(
            vec![ResourceClass {
                name: "std".into(),
                vcpu: 64,
                memory_gb: 512.0,
                vcpu_rate: 0.05,
                memory_rate: 0.01,
            }],
            Rate {
                vcpu_rate: 0.05,
                memory_rate: 0.01,
            },
        )
    }

    fn computed(s: Score) -> ResourceEstimateScore {
        match s {
            Score::Computed(v) => v,
            other => panic!("expected a score, got {other:?}"),
        }
    }

    #[test]
    fn reference_formula() {
        let table = flat_table();
        let est = CostEstimator::new(&table, RateSource::Static);
        let r = sample_record("app-1", "etl", T0, Some(T0 + HOUR_MS));
        let s = computed(est.estimate(&r));
        assert!((s.vcpu_hours - 8.0).abs() < 1e-9);
        assert!((s.memory_gb_hours - 16.0).abs() < 1e-9);
        assert!((s.score - 0.56).abs() < 1e-9);
        assert_eq!(s.resource_class.as_deref(), Some("std"));
        assert_eq!(s.rate_source, RateSource::Static);
        assert!(!s.approximate);
    }

    #[test]
    fn incomplete_is_not_computable_by_default() {
        let table = flat_table();
        let est = CostEstimator::new(&table, RateSource::Static);
        let r = sample_record("app-1", "etl", T0, None);
        assert_eq!(
            est.estimate(&r),
            Score::NotComputable {
                reason: NotComputable::IncompleteRun
            }
        );
    }

    #[test]
    fn last_event_policy_scores_incomplete_runs() {
        let table = flat_table();
        let est = CostEstimator::new(&table, RateSource::Static)
            .with_incomplete_policy(IncompletePolicy::LastEvent);
        let mut r = sample_record("app-1", "etl", T0, None);
        r.last_event_ts = Some(T0 + HOUR_MS / 2);
        let s = computed(est.estimate(&r));
        assert!((s.score - 0.28).abs() < 1e-9);

        r.last_event_ts = None;
        assert!(matches!(est.estimate(&r), Score::NotComputable { .. }));
    }

    #[test]
    fn stale_fallback_and_unparsed_memory_are_approximate() {
        let table = flat_table();
        let r = sample_record("app-1", "etl", T0, Some(T0 + HOUR_MS));
        let stale = computed(CostEstimator::new(&table, RateSource::StaleFallback).estimate(&r));
        assert!(stale.approximate);
        assert_eq!(stale.rate_source, RateSource::StaleFallback);

        let mut unparsed = r.clone();
        unparsed.memory_unparsed = true;
        unparsed.executor_memory_bytes = 0;
        let s = computed(CostEstimator::new(&table, RateSource::Live).estimate(&unparsed));
        assert!(s.approximate);
        assert_eq!(s.memory_gb_hours, 0.0);
    }

    #[test]
    fn memory_overhead_only_when_enabled() {
        let table = flat_table();
        let mut r = sample_record("app-1", "etl", T0, Some(T0 + HOUR_MS));
        r.executor_memory_overhead_bytes = 2 << 30;
        let without = computed(CostEstimator::new(&table, RateSource::Static).estimate(&r));
        let with = computed(
            CostEstimator::new(&table, RateSource::Static)
                .with_memory_overhead(true)
                .estimate(&r),
        );
        assert!((without.memory_gb_hours - 16.0).abs() < 1e-9);
        assert!((with.memory_gb_hours - 20.0).abs() < 1e-9);
    }

    #[test]
    fn duration_overflow_is_not_computable() {
        let table = flat_table();
        let est = CostEstimator::new(&table, RateSource::Static);
        let r = sample_record("app-1", "etl", i64::MIN + 1, Some(i64::MAX));
        assert!(r.is_complete());
        assert_eq!(
            est.estimate(&r),
            Score::NotComputable {
                reason: NotComputable::DurationOutOfRange
            }
        );
    }

    #[test]
    fn hostile_log_timestamps_do_not_panic() {
        let content = [
            r#"{"Event":"SparkListenerApplicationStart","App Name":"etl","App ID":"app-1","Timestamp":-9223372036854775807}"#,
            r#"{"Event":"SparkListenerApplicationEnd","Timestamp":9223372036854775807}"#,
        ]
        .join("\n");
        let record = crate::parser::parse_log(&content).record;
        assert!(record.is_complete());

        let table = RateTable::embedded();
        let est = CostEstimator::new(&table, RateSource::Static);
        assert!(matches!(
            est.estimate(&record),
            Score::NotComputable {
                reason: NotComputable::DurationOutOfRange
            }
        ));
    }

    #[test]
    fn extreme_timestamps_that_fit_still_score() {
        let table = flat_table();
        let est = CostEstimator::new(&table, RateSource::Static);
        let r = sample_record("app-1", "etl", 0, Some(i64::MAX));
        let s = computed(est.estimate(&r));
        assert!(s.score.is_finite());
        assert!(s.score > 0.0);
    }

    #[test]
    fn zero_duration_scores_zero() {
        let table = flat_table();
        let r = sample_record("app-1", "etl", T0, Some(T0));
        let s = computed(CostEstimator::new(&table, RateSource::Static).estimate(&r));
        assert_eq!(s.score, 0.0);
    }

    #[test]
    fn monotone_in_every_resource_dimension() {
        let table = RateTable::embedded();
        let est = CostEstimator::new(&table, RateSource::Static);
        let score = |r: &MetricsRecord| computed(est.estimate(r)).score;
        let base = sample_record("app-1", "etl", T0, Some(T0 + HOUR_MS));

        for step in 1..40u32 {
            let mut smaller = base.clone();
            let mut larger = base.clone();

            smaller.end_ts = Some(T0 + HOUR_MS * step as i64);
            larger.end_ts = Some(T0 + HOUR_MS * (step as i64 + 1));
            assert!(score(&smaller) <= score(&larger), "duration step {step}");

            let (mut a, mut b) = (base.clone(), base.clone());
            a.max_executors = step;
            b.max_executors = step + 1;
            assert!(score(&a) <= score(&b), "executors step {step}");

            let (mut a, mut b) = (base.clone(), base.clone());
            a.executor_cores = step;
            b.executor_cores = step + 1;
            assert!(score(&a) <= score(&b), "cores step {step}");

            let (mut a, mut b) = (base.clone(), base.clone());
            a.executor_memory_bytes = (step as u64) << 30;
            b.executor_memory_bytes = (step as u64 + 1) << 30;
            assert!(score(&a) <= score(&b), "memory step {step}");
        }
    }
}
