use crate::estimator::IncompletePolicy;
use crate::locator::DEFAULT_LOG_PATTERNS;
use crate::pricing::{PricingMode, Rate, DEFAULT_MEMORY_RATE, DEFAULT_VCPU_RATE};
use crate::reconcile::NameMatch;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from sparkcost.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub logs: LogsConfig,
    pub pricing: PricingConfig,
    pub scoring: ScoringConfig,
    pub batch: BatchConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// Root directory of the log store.
    pub root: PathBuf,
    /// Object-id prefix to list under the root.
    pub location: String,
    /// File-name globs that identify event logs.
    pub patterns: Vec<String>,
    /// Optional glob matched against full object ids.
    pub object_filter: Option<String>,
    /// Pipeline (Spark application) name to report on.
    pub app_name: Option<String>,
    pub name_match: NameMatch,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub mode: PricingMode,
    /// SQLite database with a `resource_rates` table, used in live mode.
    pub rates_db: Option<PathBuf>,
    pub default_vcpu_rate: f64,
    pub default_memory_rate: f64,
    pub include_memory_overhead: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ScoringConfig {
    pub incomplete: IncompletePolicy,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Upper bound on logs read and parsed at once.
    pub max_concurrent_reads: usize,
}

// --- Default implementations ---

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            location: String::new(),
            patterns: DEFAULT_LOG_PATTERNS.iter().map(|p| p.to_string()).collect(),
            object_filter: None,
            app_name: None,
            name_match: NameMatch::Exact,
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            mode: PricingMode::Static,
            rates_db: None,
            default_vcpu_rate: DEFAULT_VCPU_RATE,
            default_memory_rate: DEFAULT_MEMORY_RATE,
            include_memory_overhead: false,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reads: 8,
        }
    }
}

impl PricingConfig {
    pub fn default_rate(&self) -> Rate {
        Rate {
            vcpu_rate: self.default_vcpu_rate,
            memory_rate: self.default_memory_rate,
        }
    }
}

/// Errors from loading or validating the config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl AnalyzerConfig {
    /// Load config from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        let config: Self = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no batch could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch.max_concurrent_reads == 0 {
            return Err(ConfigError::Invalid(
                "batch.max_concurrent_reads must be at least 1".into(),
            ));
        }
        let rates = [self.pricing.default_vcpu_rate, self.pricing.default_memory_rate];
        if rates.iter().any(|r| !r.is_finite() || *r < 0.0) {
            return Err(ConfigError::Invalid(
                "pricing default rates must be finite and non-negative".into(),
            ));
        }
        for p in &self.logs.patterns {
            glob::Pattern::new(p)
                .map_err(|e| ConfigError::Invalid(format!("logs.patterns entry {p:?}: {e}")))?;
        }
        if let Some(f) = &self.logs.object_filter {
            glob::Pattern::new(f)
                .map_err(|e| ConfigError::Invalid(format!("logs.object_filter {f:?}: {e}")))?;
        }
        Ok(())
    }
}
