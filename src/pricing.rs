//! Rate tables: the embedded static table, the SQLite-backed live table,
//! and the fallback between them.
//!
//! A rate table prices vCPU-hours and memory-GiB-hours per resource class.
//! Each class also states the capacity of one node so an executor can be
//! matched to the cheapest class that holds it.
use crate::record::RateSource;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Flat rates used when no class can hold an executor.
pub const DEFAULT_VCPU_RATE: f64 = 0.048;
pub const DEFAULT_MEMORY_RATE: f64 = 0.006;

/// One named bucket of the rate table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceClass {
    pub name: String,
    pub vcpu: u32,
    pub memory_gb: f64,
    /// Currency units per vCPU-hour.
    pub vcpu_rate: f64,
    /// Currency units per GiB-hour.
    pub memory_rate: f64,
}

/// Price per unit for a matched (or defaulted) class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    pub vcpu_rate: f64,
    pub memory_rate: f64,
}

/// A complete, immutable rate table passed into the estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct RateTable {
    classes: Vec<ResourceClass>,
    default_rate: Rate,
}

impl RateTable {
    /// Build a table; classes are kept ordered smallest first.
    pub fn new(mut classes: Vec<ResourceClass>, default_rate: Rate) -> Self {
        classes.sort_by(|a, b| {
            a.vcpu
                .cmp(&b.vcpu)
                .then_with(|| a.memory_gb.total_cmp(&b.memory_gb))
                .then_with(|| a.name.cmp(&b.name))
        });
        Self {
            classes,
            default_rate,
        }
    }

    /// The embedded table.
    ///
    /// Unit rates are per family: compute-optimised nodes price vCPU low and
    /// memory high, memory-optimised the reverse. Values include the
    /// managed-cluster surcharge.
    pub fn embedded() -> Self {
        let family = [
            ("c5", 2.0, 0.0390, 0.0060),
            ("m5", 4.0, 0.0420, 0.0052),
            ("r5", 8.0, 0.0460, 0.0046),
        ];
        let sizes = [("xlarge", 4), ("2xlarge", 8), ("4xlarge", 16), ("12xlarge", 48)];

        let mut classes = Vec::new();
        for (prefix, gb_per_vcpu, vcpu_rate, memory_rate) in family {
            for (size, vcpu) in sizes {
                classes.push(ResourceClass {
                    name: format!("{prefix}.{size}"),
                    vcpu,
                    memory_gb: gb_per_vcpu * vcpu as f64,
                    vcpu_rate,
                    memory_rate,
                });
            }
        }

        Self::new(
            classes,
            Rate {
                vcpu_rate: DEFAULT_VCPU_RATE,
                memory_rate: DEFAULT_MEMORY_RATE,
            },
        )
    }

    pub fn classes(&self) -> &[ResourceClass] {
        &self.classes
    }

    pub fn default_rate(&self) -> Rate {
        self.default_rate
    }

    /// Replace the flat fallback rate.
    pub fn with_default_rate(mut self, rate: Rate) -> Self {
        self.default_rate = rate;
        self
    }

    /// The class that holds one executor of `cores` x `memory_gb` at the
    /// lowest executor-hour price. Equal prices go to the smaller class.
    pub fn nearest_class(&self, cores: u32, memory_gb: f64) -> Option<&ResourceClass> {
        self.classes
            .iter()
            .filter(|c| c.vcpu >= cores && c.memory_gb >= memory_gb)
            .min_by(|a, b| {
                executor_hour(a, cores, memory_gb).total_cmp(&executor_hour(b, cores, memory_gb))
            })
    }

    /// Rate for an executor shape, with the class name when one matched.
    ///
    /// The flat rate is raised to at least the dearest class rate so an
    /// executor too large for every class never scores below one that fits.
    pub fn rate_for(&self, cores: u32, memory_gb: f64) -> (Rate, Option<&str>) {
        match self.nearest_class(cores, memory_gb) {
            Some(c) => (
                Rate {
                    vcpu_rate: c.vcpu_rate,
                    memory_rate: c.memory_rate,
                },
                Some(c.name.as_str()),
            ),
            None => (self.flat_rate(), None),
        }
    }

    fn flat_rate(&self) -> Rate {
        self.classes.iter().fold(self.default_rate, |acc, c| Rate {
            vcpu_rate: acc.vcpu_rate.max(c.vcpu_rate),
            memory_rate: acc.memory_rate.max(c.memory_rate),
        })
    }
}

fn executor_hour(c: &ResourceClass, cores: u32, memory_gb: f64) -> f64 {
    cores as f64 * c.vcpu_rate + memory_gb * c.memory_rate
}

/// Errors from the pricing collaborator.
#[derive(Debug)]
pub enum PricingError {
    Db { path: PathBuf, source: rusqlite::Error },
    Empty { path: PathBuf },
    InvalidRate { class: String },
}

impl std::fmt::Display for PricingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PricingError::Db { path, source } => {
                write!(f, "rates database {} unreadable: {source}", path.display())
            }
            PricingError::Empty { path } => {
                write!(f, "rates database {} has no resource classes", path.display())
            }
            PricingError::InvalidRate { class } => {
                write!(f, "resource class {class} has a negative or non-finite rate")
            }
        }
    }
}

impl std::error::Error for PricingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PricingError::Db { source, .. } => Some(source),
            PricingError::Empty { .. } | PricingError::InvalidRate { .. } => None,
        }
    }
}

/// Pricing collaborator boundary.
pub trait PricingSource: Send + Sync {
    fn fetch_rates(&self) -> Result<Vec<ResourceClass>, PricingError>;
}

/// Live rates read from a SQLite database with a `resource_rates` table.
#[derive(Debug, Clone)]
pub struct SqlitePricing {
    path: PathBuf,
}

impl SqlitePricing {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn db_err(&self, source: rusqlite::Error) -> PricingError {
        PricingError::Db {
            path: self.path.clone(),
            source,
        }
    }
}

impl PricingSource for SqlitePricing {
    fn fetch_rates(&self) -> Result<Vec<ResourceClass>, PricingError> {
        let conn = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| self.db_err(e))?;
        let mut stmt = conn
            .prepare(
                "SELECT name, vcpu, memory_gb, vcpu_rate, memory_rate
                 FROM resource_rates ORDER BY name ASC",
            )
            .map_err(|e| self.db_err(e))?;
        let classes = stmt
            .query_map([], |row| {
                Ok(ResourceClass {
                    name: row.get(0)?,
                    vcpu: row.get(1)?,
                    memory_gb: row.get(2)?,
                    vcpu_rate: row.get(3)?,
                    memory_rate: row.get(4)?,
                })
            })
            .map_err(|e| self.db_err(e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| self.db_err(e))?;

        if classes.is_empty() {
            return Err(PricingError::Empty {
                path: self.path.clone(),
            });
        }
        if let Some(bad) = classes.iter().find(|c| !valid_rate(c)) {
            return Err(PricingError::InvalidRate {
                class: bad.name.clone(),
            });
        }
        Ok(classes)
    }
}

fn valid_rate(c: &ResourceClass) -> bool {
    [c.vcpu_rate, c.memory_rate, c.memory_gb]
        .iter()
        .all(|v| v.is_finite() && *v >= 0.0)
}

/// Create (or refresh) a rates database with the given classes.
pub fn write_rates_db(path: &Path, classes: &[ResourceClass]) -> rusqlite::Result<()> {
    let mut conn = Connection::open(path)?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS resource_rates (
            name        TEXT PRIMARY KEY,
            vcpu        INTEGER NOT NULL,
            memory_gb   REAL NOT NULL,
            vcpu_rate   REAL NOT NULL,
            memory_rate REAL NOT NULL
        );",
    )?;
    let tx = conn.transaction()?;
    for c in classes {
        tx.execute(
            "INSERT OR REPLACE INTO resource_rates (name, vcpu, memory_gb, vcpu_rate, memory_rate)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![c.name, c.vcpu, c.memory_gb, c.vcpu_rate, c.memory_rate],
        )?;
    }
    tx.commit()
}

/// Whether to price from the embedded table or the live collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingMode {
    #[default]
    Static,
    Live,
}

/// Pick the rate table for this invocation.
///
/// Live mode falls back to the embedded table when the collaborator is
/// missing or fails, marking the result `StaleFallback`.
pub fn resolve_rates(
    mode: PricingMode,
    source: Option<&dyn PricingSource>,
    default_rate: Rate,
) -> (RateTable, RateSource) {
    let embedded = || RateTable::embedded().with_default_rate(default_rate);

    match (mode, source) {
        (PricingMode::Static, _) => (embedded(), RateSource::Static),
        (PricingMode::Live, None) => {
            tracing::warn!("live pricing requested without a pricing source, using embedded rates");
            (embedded(), RateSource::StaleFallback)
        }
        (PricingMode::Live, Some(src)) => match src.fetch_rates() {
            Ok(classes) => {
                tracing::info!(classes = classes.len(), "loaded live rates");
                (RateTable::new(classes, default_rate), RateSource::Live)
            }
            Err(e) => {
                tracing::warn!(error = %e, "live pricing unavailable, using embedded rates");
                (embedded(), RateSource::StaleFallback)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn default_rate() -> Rate {
        Rate {
            vcpu_rate: DEFAULT_VCPU_RATE,
            memory_rate: DEFAULT_MEMORY_RATE,
        }
    }

    struct FailingSource;

    impl PricingSource for FailingSource {
        fn fetch_rates(&self) -> Result<Vec<ResourceClass>, PricingError> {
            Err(PricingError::Empty {
                path: PathBuf::from("offline"),
            })
        }
    }

    #[test]
    fn nearest_class_follows_executor_shape() {
        let table = RateTable::embedded();
        assert_eq!(table.nearest_class(4, 8.0).unwrap().name, "c5.xlarge");
        assert_eq!(table.nearest_class(4, 16.0).unwrap().name, "m5.xlarge");
        assert_eq!(table.nearest_class(4, 30.0).unwrap().name, "r5.xlarge");
        assert_eq!(table.nearest_class(2, 60.0).unwrap().name, "r5.2xlarge");
    }

    #[test]
    fn oversized_executor_uses_flat_rate() {
        let table = RateTable::embedded();
        let (rate, class) = table.rate_for(96, 1024.0);
        assert_eq!(class, None);
        assert_eq!(rate, default_rate());
    }

    #[test]
    fn flat_rate_never_undercuts_classes() {
        let cheap = Rate {
            vcpu_rate: 0.001,
            memory_rate: 0.0001,
        };
        let table = RateTable::embedded().with_default_rate(cheap);
        let (rate, _) = table.rate_for(96, 1024.0);
        assert_eq!(rate.vcpu_rate, 0.0460);
        assert_eq!(rate.memory_rate, 0.0060);
    }

    #[test]
    fn static_mode_ignores_source() {
        let (_, src) = resolve_rates(PricingMode::Static, Some(&FailingSource as &dyn PricingSource), default_rate());
        assert_eq!(src, RateSource::Static);
    }

    #[test]
    fn live_failure_falls_back() {
        let (table, src) = resolve_rates(PricingMode::Live, Some(&FailingSource as &dyn PricingSource), default_rate());
        assert_eq!(src, RateSource::StaleFallback);
        assert_eq!(table, RateTable::embedded());
    }

    #[test]
    fn live_without_source_falls_back() {
        let (_, src) = resolve_rates(PricingMode::Live, None, default_rate());
        assert_eq!(src, RateSource::StaleFallback);
    }

    #[test]
    fn sqlite_round_trip_as_live_source() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("rates.db");
        let classes = vec![ResourceClass {
            name: "tiny".into(),
            vcpu: 2,
            memory_gb: 4.0,
            vcpu_rate: 0.05,
            memory_rate: 0.01,
        }];
        write_rates_db(&db, &classes).unwrap();

        let pricing = SqlitePricing::new(&db);
        let (table, src) = resolve_rates(PricingMode::Live, Some(&pricing as &dyn PricingSource), default_rate());
        assert_eq!(src, RateSource::Live);
        assert_eq!(table.classes(), classes.as_slice());
    }

    #[test]
    fn sqlite_missing_db_is_error() {
        let dir = tempdir().unwrap();
        let pricing = SqlitePricing::new(dir.path().join("absent.db"));
        assert!(matches!(pricing.fetch_rates(), Err(PricingError::Db { .. })));
    }

    #[test]
    fn sqlite_empty_table_is_error() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("rates.db");
        write_rates_db(&db, &[]).unwrap();
        assert!(matches!(
            SqlitePricing::new(&db).fetch_rates(),
            Err(PricingError::Empty { .. })
        ));
    }

    #[test]
    fn sqlite_negative_rate_is_rejected() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("rates.db");
        let bad = ResourceClass {
            name: "weird".into(),
            vcpu: 2,
            memory_gb: 4.0,
            vcpu_rate: -1.0,
            memory_rate: 0.01,
        };
        write_rates_db(&db, &[bad]).unwrap();
        assert!(matches!(
            SqlitePricing::new(&db).fetch_rates(),
            Err(PricingError::InvalidRate { .. })
        ));
    }
}
