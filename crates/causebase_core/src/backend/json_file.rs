//! Single-document JSON file backend.
//!
//! # Responsibility
//! - Persist the whole catalog as one pretty-printed JSON document.
//! - Serve scanner reads from a short-lived cache and edits from disk.
//!
//! # Invariants
//! - Writes go to `<path>.tmp` first and are renamed into place.
//! - Every write re-reads the document under the write lock.

use crate::backend::cache::ScanCache;
use crate::backend::config::{BackendConfig, BackendDescriptor};
use crate::backend::{
    config_path, next_decimal_id, same_storage_path, sorted_names, KbError, KbResult,
    KnowledgeBase,
};
use crate::model::cause::{CauseId, CauseName, CauseRecord};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub const TYPE_ID: &str = "json_file";
const DEFAULT_CACHE_TTL_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonFileOptions {
    path: PathBuf,
    #[serde(default = "default_cache_ttl_secs")]
    cache_ttl_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

pub fn descriptor() -> BackendDescriptor {
    BackendDescriptor {
        type_id: TYPE_ID,
        display_name: "JSON file",
        build: build,
    }
}

fn build(config: &BackendConfig) -> KbResult<Arc<dyn KnowledgeBase>> {
    let options: JsonFileOptions = config.parse_options(TYPE_ID)?;
    Ok(Arc::new(JsonFileKnowledgeBase::open(
        options.path,
        Duration::from_secs(options.cache_ttl_secs),
    )?))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    causes: Vec<CauseRecord>,
}

impl CatalogDocument {
    fn position(&self, id: &CauseId) -> Option<usize> {
        self.causes
            .iter()
            .position(|record| record.id.as_ref() == Some(id))
    }

    fn allocate_id(&mut self) -> KbResult<CauseId> {
        let causes = &self.causes;
        next_decimal_id(TYPE_ID, &mut self.next_id, |id| {
            causes.iter().any(|record| record.id.as_ref() == Some(id))
        })
    }
}

/// Catalog stored in a JSON file on local disk.
pub struct JsonFileKnowledgeBase {
    options: JsonFileOptions,
    cache: ScanCache,
    write_lock: Mutex<()>,
}

impl JsonFileKnowledgeBase {
    /// Opens the catalog at `path`, checking that any existing file decodes.
    ///
    /// A missing file is an empty catalog; it is created on first write.
    pub fn open(path: impl Into<PathBuf>, cache_ttl: Duration) -> KbResult<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(KbError::invalid_config(TYPE_ID, "path cannot be empty"));
        }
        let kb = Self {
            options: JsonFileOptions {
                path,
                cache_ttl_secs: cache_ttl.as_secs(),
            },
            cache: ScanCache::new(cache_ttl),
            write_lock: Mutex::new(()),
        };
        kb.load()?;
        Ok(kb)
    }

    pub fn path(&self) -> &Path {
        &self.options.path
    }

    fn load(&self) -> KbResult<CatalogDocument> {
        let bytes = match fs::read(self.path()) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(CatalogDocument::default());
            }
            Err(err) => return Err(KbError::unavailable(TYPE_ID, err)),
        };
        let document: CatalogDocument = serde_json::from_slice(&bytes).map_err(|err| {
            KbError::InvalidData(format!("{}: {err}", self.path().display()))
        })?;
        if document.causes.iter().any(|record| record.id.is_none()) {
            return Err(KbError::InvalidData(format!(
                "{}: stored cause without id",
                self.path().display()
            )));
        }
        Ok(document)
    }

    fn store(&self, document: &CatalogDocument) -> KbResult<()> {
        let path = self.path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| KbError::unavailable(TYPE_ID, err))?;
        }

        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|err| KbError::InvalidData(err.to_string()))?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let written = fs::write(&tmp, bytes).and_then(|()| fs::rename(&tmp, path));
        self.cache.invalidate();
        written.map_err(|err| {
            error!("event=catalog_write module=json_file status=error error={err}");
            KbError::unavailable(TYPE_ID, err)
        })?;
        debug!(
            "event=catalog_write module=json_file status=ok causes={}",
            document.causes.len()
        );
        Ok(())
    }

    /// Runs `mutate` against a fresh copy of the document and persists it.
    fn modify<T>(
        &self,
        mutate: impl FnOnce(&mut CatalogDocument) -> KbResult<T>,
    ) -> KbResult<T> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut document = self.load()?;
        let value = mutate(&mut document)?;
        self.store(&document)?;
        Ok(value)
    }
}

impl KnowledgeBase for JsonFileKnowledgeBase {
    fn type_id(&self) -> &'static str {
        TYPE_ID
    }

    fn config(&self) -> BackendConfig {
        BackendConfig::from_options(TYPE_ID, &self.options)
    }

    fn list_for_scan(&self) -> KbResult<Vec<CauseRecord>> {
        let records = self.cache.get_or_load(|| Ok(self.load()?.causes))?;
        Ok(records.as_ref().clone())
    }

    fn list_for_edit(&self) -> KbResult<Vec<CauseName>> {
        Ok(sorted_names(self.load()?.causes))
    }

    fn get(&self, id: &CauseId) -> KbResult<CauseRecord> {
        self.load()?
            .causes
            .into_iter()
            .find(|record| record.id.as_ref() == Some(id))
            .ok_or_else(|| KbError::NotFound(id.clone()))
    }

    fn add(&self, record: &CauseRecord) -> KbResult<CauseRecord> {
        record.validate()?;
        self.modify(|document| {
            let mut stored = record.clone();
            stored.id = Some(document.allocate_id()?);
            document.causes.push(stored.clone());
            Ok(stored)
        })
    }

    fn save(&self, record: &CauseRecord) -> KbResult<CauseRecord> {
        record.validate()?;
        let id = record.require_id()?.clone();
        self.modify(|document| {
            if let Ok(numeric) = id.as_str().parse::<u64>() {
                document.next_id = document.next_id.max(numeric.saturating_add(1));
            }
            match document.position(&id) {
                Some(index) => document.causes[index] = record.clone(),
                None => document.causes.push(record.clone()),
            }
            Ok(record.clone())
        })
    }

    fn remove(&self, id: &CauseId) -> KbResult<CauseRecord> {
        self.modify(|document| {
            let index = document
                .position(id)
                .ok_or_else(|| KbError::NotFound(id.clone()))?;
            Ok(document.causes.remove(index))
        })
    }

    fn categories(&self) -> KbResult<Vec<String>> {
        let mut categories: Vec<String> = self
            .load()?
            .causes
            .into_iter()
            .flat_map(|record| record.categories)
            .collect();
        categories.sort();
        categories.dedup();
        Ok(categories)
    }

    /// Same file means same catalog; the cache window is only a tuning knob.
    fn equivalent_config(&self, other: &dyn KnowledgeBase) -> bool {
        other.type_id() == TYPE_ID
            && config_path(&other.config())
                .is_some_and(|path| same_storage_path(self.path(), &path))
    }
}

#[cfg(test)]
mod tests {
    use super::JsonFileKnowledgeBase;
    use crate::backend::{KbError, KnowledgeBase};
    use crate::model::cause::CauseRecord;
    use std::time::Duration;

    #[test]
    fn missing_file_opens_as_empty_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let kb = JsonFileKnowledgeBase::open(dir.path().join("causes.json"), Duration::ZERO)
            .unwrap();
        assert!(kb.list_for_edit().unwrap().is_empty());
        assert!(!kb.path().exists());
    }

    #[test]
    fn corrupt_file_is_rejected_at_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("causes.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = match JsonFileKnowledgeBase::open(&path, Duration::ZERO) {
            Err(err) => err,
            Ok(_) => panic!("corrupt catalog should not open"),
        };
        assert!(matches!(err, KbError::InvalidData(_)));
    }

    #[test]
    fn writes_are_visible_to_a_second_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("causes.json");
        let first = JsonFileKnowledgeBase::open(&path, Duration::from_secs(60)).unwrap();
        let added = first.add(&CauseRecord::new("OOM")).unwrap();

        let second = JsonFileKnowledgeBase::open(&path, Duration::from_secs(60)).unwrap();
        let loaded = second.get(added.id.as_ref().unwrap()).unwrap();
        assert_eq!(loaded, added);
        assert!(first.equivalent_config(&second));
    }

    #[test]
    fn spelling_of_the_same_path_does_not_matter_for_equivalence() {
        let dir = tempfile::tempdir().unwrap();
        let plain = JsonFileKnowledgeBase::open(dir.path().join("causes.json"), Duration::ZERO)
            .unwrap();
        let dotted =
            JsonFileKnowledgeBase::open(dir.path().join(".").join("causes.json"), Duration::ZERO)
                .unwrap();
        let other = JsonFileKnowledgeBase::open(dir.path().join("other.json"), Duration::ZERO)
            .unwrap();

        assert!(plain.equivalent_config(&dotted));
        assert!(!plain.equivalent_config(&other));
    }

    #[test]
    fn scan_cache_is_invalidated_by_local_writes() {
        let dir = tempfile::tempdir().unwrap();
        let kb = JsonFileKnowledgeBase::open(dir.path().join("c.json"), Duration::from_secs(600))
            .unwrap();
        assert!(kb.list_for_scan().unwrap().is_empty());

        kb.add(&CauseRecord::new("Timeout")).unwrap();
        assert_eq!(kb.list_for_scan().unwrap().len(), 1);
    }
}
