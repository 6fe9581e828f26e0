//! Log discovery: find candidate event-log objects under a storage location.
use crate::storage::{LogStore, StorageError};

/// File-name patterns recognised as Spark event logs by default.
///
/// Rolling (`eventlog_v2_*`) directories split one application over
/// `events_1_*`, `events_2_*`, ...; only the first segment carries the
/// application start event, so only it is selected.
pub const DEFAULT_LOG_PATTERNS: &[&str] = &["events_1_*", "app-*", "application_*", "local-*"];

/// Which objects under a location count as event logs.
#[derive(Debug, Clone)]
pub struct LogLocator {
    file_patterns: Vec<glob::Pattern>,
}

impl Default for LogLocator {
    fn default() -> Self {
        Self {
            file_patterns: DEFAULT_LOG_PATTERNS
                .iter()
                .filter_map(|p| glob::Pattern::new(p).ok())
                .collect(),
        }
    }
}

impl LogLocator {
    /// Build a locator from file-name glob patterns.
    pub fn with_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self, glob::PatternError> {
        let file_patterns = patterns
            .iter()
            .map(|p| glob::Pattern::new(p.as_ref()))
            .collect::<Result<_, _>>()?;
        Ok(Self { file_patterns })
    }

    /// List event-log object ids under `location`.
    ///
    /// `object_filter`, when given, is a glob matched against the full object
    /// id. Finding nothing yields an empty iterator. Only the initial listing
    /// can fail; the returned iterator filters lazily.
    pub fn locate<'a>(
        &'a self,
        store: &dyn LogStore,
        location: &str,
        object_filter: Option<&'a glob::Pattern>,
    ) -> Result<impl Iterator<Item = String> + 'a, StorageError> {
        let ids = store.list(location)?;
        tracing::debug!(location, candidates = ids.len(), "listed storage location");

        Ok(ids.into_iter().filter(move |id| {
            self.is_event_log(id) && object_filter.map_or(true, |f| f.matches(id))
        }))
    }

    fn is_event_log(&self, object_id: &str) -> bool {
        let file_name = object_id.rsplit('/').next().unwrap_or(object_id);
        self.file_patterns.iter().any(|p| p.matches(file_name))
    }
}
