//! Catalog backend contract and built-in implementations.
//!
//! # Responsibility
//! - Define the storage-agnostic `KnowledgeBase` contract.
//! - Provide the built-in `memory`, `json_file` and `sqlite` backends.
//!
//! # Invariants
//! - Write paths call `CauseRecord::validate()` before persisting.
//! - `list_for_edit`, `get` and `categories` always read committed state;
//!   only `list_for_scan` may be served from a cache.
//! - `save` upserts by id, so replaying the same record never duplicates it.

use crate::db::DbError;
use crate::model::cause::{CauseId, CauseName, CauseRecord, CauseValidationError};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Component, Path, PathBuf};

pub mod cache;
pub mod config;
pub mod json_file;
pub mod memory;
pub mod sqlite;

pub use config::{BackendConfig, BackendDescriptor, BackendFactory, FactoryError};

pub type KbResult<T> = Result<T, KbError>;

/// Errors returned by catalog backend operations.
#[derive(Debug)]
pub enum KbError {
    Validation(CauseValidationError),
    NotFound(CauseId),
    /// Storage could not be reached or written.
    Unavailable {
        backend: &'static str,
        message: String,
    },
    /// Persisted state could not be decoded into valid records.
    InvalidData(String),
    UnknownBackendType(String),
    InvalidConfig {
        backend: &'static str,
        message: String,
    },
}

impl KbError {
    pub fn unavailable(backend: &'static str, err: impl Display) -> Self {
        Self::Unavailable {
            backend,
            message: err.to_string(),
        }
    }

    pub fn invalid_config(backend: &'static str, err: impl Display) -> Self {
        Self::InvalidConfig {
            backend,
            message: err.to_string(),
        }
    }
}

impl Display for KbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "cause not found: {id}"),
            Self::Unavailable { backend, message } => {
                write!(f, "{backend} backend unavailable: {message}")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted cause data: {message}"),
            Self::UnknownBackendType(value) => write!(f, "unknown backend type: {value}"),
            Self::InvalidConfig { backend, message } => {
                write!(f, "invalid {backend} backend configuration: {message}")
            }
        }
    }
}

impl Error for KbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CauseValidationError> for KbError {
    fn from(value: CauseValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for KbError {
    fn from(value: DbError) -> Self {
        Self::unavailable(sqlite::TYPE_ID, value)
    }
}

impl From<rusqlite::Error> for KbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::from(DbError::Sqlite(value))
    }
}

/// Storage contract every catalog backend implements.
///
/// Implementations are shared across reader threads, so all methods take
/// `&self` and serialize writes internally.
pub trait KnowledgeBase: Send + Sync {
    /// Stable type identifier, also used as the `type` tag in configuration.
    fn type_id(&self) -> &'static str;

    /// Normalized configuration this instance was built from.
    fn config(&self) -> BackendConfig;

    /// Every cause, for the scanner. May be cached.
    fn list_for_scan(&self) -> KbResult<Vec<CauseRecord>>;

    /// Fresh `(id, name)` listing, for editors.
    fn list_for_edit(&self) -> KbResult<Vec<CauseName>>;

    /// Fresh read of one cause.
    fn get(&self, id: &CauseId) -> KbResult<CauseRecord>;

    /// Stores a new cause under a freshly generated id.
    ///
    /// Any id already present on `record` is ignored.
    fn add(&self, record: &CauseRecord) -> KbResult<CauseRecord>;

    /// Upserts a cause by its id.
    ///
    /// The id may come from another backend (migration). Unknown ids are
    /// created.
    fn save(&self, record: &CauseRecord) -> KbResult<CauseRecord>;

    /// Deletes a cause and returns its last stored form.
    fn remove(&self, id: &CauseId) -> KbResult<CauseRecord>;

    /// Sorted, de-duplicated union of all categories.
    fn categories(&self) -> KbResult<Vec<String>> {
        let mut categories: Vec<String> = self
            .list_for_scan()?
            .into_iter()
            .flat_map(|record| record.categories)
            .collect();
        categories.sort();
        categories.dedup();
        Ok(categories)
    }

    /// Whether `other` is configured to address the same storage.
    ///
    /// Compares configuration, never data.
    fn equivalent_config(&self, other: &dyn KnowledgeBase) -> bool {
        self.config() == other.config()
    }
}

/// Sorts an edit listing by id for deterministic output.
pub(crate) fn sorted_names(records: impl IntoIterator<Item = CauseRecord>) -> Vec<CauseName> {
    let mut names: Vec<CauseName> = records
        .into_iter()
        .filter_map(|record| record.to_name())
        .collect();
    names.sort();
    names
}

/// Picks the lowest free decimal id at or after `*next` and advances it.
///
/// Once the counter reaches `u64::MAX` the search wraps around to `1`, so a
/// migrated id at the top of the range never blocks later adds.
pub(crate) fn next_decimal_id(
    backend: &'static str,
    next: &mut u64,
    taken: impl Fn(&CauseId) -> bool,
) -> KbResult<CauseId> {
    let start = (*next).max(1);
    for numeric in (start..=u64::MAX).chain(1..start) {
        let candidate = CauseId::new(numeric.to_string())?;
        if !taken(&candidate) {
            *next = numeric.saturating_add(1);
            return Ok(candidate);
        }
    }
    Err(KbError::unavailable(backend, "no free numeric id left"))
}

/// Whether two configured storage paths name the same file.
///
/// Existing files compare by canonical path. A file that does not exist
/// yet compares by its canonical parent directory plus file name.
pub(crate) fn same_storage_path(left: &Path, right: &Path) -> bool {
    left == right || storage_key(left) == storage_key(right)
}

fn storage_key(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    if let Some(name) = path.file_name() {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        if let Ok(parent) = parent.canonicalize() {
            return parent.join(name);
        }
    }
    path.components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect()
}

/// The `path` option of a backend configuration, when present.
pub(crate) fn config_path(config: &BackendConfig) -> Option<PathBuf> {
    config
        .options
        .get("path")
        .and_then(|value| value.as_str())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::{next_decimal_id, same_storage_path};
    use crate::model::cause::CauseId;
    use std::collections::HashSet;

    #[test]
    fn decimal_ids_skip_taken_values() {
        let taken: HashSet<CauseId> = ["1", "2"]
            .into_iter()
            .map(|id| CauseId::new(id).unwrap())
            .collect();
        let mut next = 0;
        let id = next_decimal_id("memory", &mut next, |id| taken.contains(id)).unwrap();
        assert_eq!(id.as_str(), "3");
        assert_eq!(next, 4);
    }

    #[test]
    fn decimal_ids_wrap_after_the_top_of_the_range() {
        let max = CauseId::new(u64::MAX.to_string()).unwrap();
        let mut next = u64::MAX;
        let id = next_decimal_id("memory", &mut next, |id| *id == max).unwrap();
        assert_eq!(id.as_str(), "1");
        assert_eq!(next, 2);
    }

    #[test]
    fn storage_paths_ignore_current_dir_segments() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("causes.json");
        let dotted = dir.path().join(".").join("causes.json");
        assert!(same_storage_path(&plain, &dotted));

        std::fs::write(&plain, "{}").unwrap();
        assert!(same_storage_path(&plain, &dotted));
        assert!(!same_storage_path(&plain, &dir.path().join("other.json")));
    }
}
