//! Storage collaborator boundary: list and read raw log objects.
//!
//! Object ids are `/`-separated paths relative to the store root.
use std::path::{Path, PathBuf};

/// Errors produced by storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// The location could not be listed at all.
    Unavailable { location: String, reason: String },
    /// A single object could not be read.
    Read {
        object_id: String,
        source: std::io::Error,
    },
    /// A compressed object failed to decompress.
    Decompress {
        object_id: String,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Unavailable { location, reason } => {
                write!(f, "storage location {location} unavailable: {reason}")
            }
            StorageError::Read { object_id, source } => {
                write!(f, "failed to read {object_id}: {source}")
            }
            StorageError::Decompress { object_id, source } => {
                write!(f, "failed to decompress {object_id}: {source}")
            }
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Unavailable { .. } => None,
            StorageError::Read { source, .. } => Some(source),
            StorageError::Decompress { source, .. } => Some(source),
        }
    }
}

/// Read-only access to stored event logs.
pub trait LogStore: Send + Sync {
    /// All object ids under `prefix`, sorted. An empty prefix lists everything.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Raw (decompressed) content of one object.
    fn read(&self, object_id: &str) -> Result<Vec<u8>, StorageError>;
}

/// A `LogStore` backed by a local directory tree.
///
/// Objects ending in `.zst` or `.zstd` are decompressed on read.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_id_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = rel
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

impl LogStore for LocalStore {
    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let unavailable = |reason: String| StorageError::Unavailable {
            location: self.root.display().to_string(),
            reason,
        };

        if !self.root.is_dir() {
            return Err(unavailable("not a directory".to_string()));
        }

        let root = self.root.to_str().ok_or_else(|| unavailable("path is not UTF-8".into()))?;
        let pattern = format!("{}/**/*", glob::Pattern::escape(root));
        let paths = glob::glob(&pattern).map_err(|e| unavailable(e.to_string()))?;

        let mut ids = Vec::new();
        for entry in paths {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            if let Some(id) = self.object_id_for(&path) {
                if id.starts_with(prefix) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn read(&self, object_id: &str) -> Result<Vec<u8>, StorageError> {
        let path = object_id
            .split('/')
            .fold(self.root.clone(), |acc, part| acc.join(part));
        let raw = std::fs::read(&path).map_err(|e| StorageError::Read {
            object_id: object_id.to_string(),
            source: e,
        })?;

        if is_zstd(object_id) {
            zstd::decode_all(raw.as_slice()).map_err(|e| StorageError::Decompress {
                object_id: object_id.to_string(),
                source: e,
            })
        } else {
            Ok(raw)
        }
    }
}

fn is_zstd(object_id: &str) -> bool {
    object_id.ends_with(".zst") || object_id.ends_with(".zstd")
}
