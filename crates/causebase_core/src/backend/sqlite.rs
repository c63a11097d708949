//! SQLite catalog backend.
//!
//! # Responsibility
//! - Persist causes in the `causes` / `cause_categories` tables.
//! - Keep SQL details inside this module.
//!
//! # Invariants
//! - Write paths call `CauseRecord::validate()` before SQL mutations.
//! - Each write runs in one transaction, so a record is stored whole or not at all.
//! - Read paths reject invalid persisted rows instead of masking them.

use crate::backend::cache::ScanCache;
use crate::backend::config::{BackendConfig, BackendDescriptor};
use crate::backend::{config_path, same_storage_path, KbError, KbResult, KnowledgeBase};
use crate::db::{open_db, open_db_in_memory};
use crate::model::cause::{CauseId, CauseName, CauseRecord, Indication};
use rusqlite::{params, Connection, Row, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

pub const TYPE_ID: &str = "sqlite";
const DEFAULT_CACHE_TTL_SECS: u64 = 60;

const CAUSE_SELECT_SQL: &str = "SELECT
    id,
    name,
    description,
    comment,
    indications,
    last_occurred
FROM causes";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SqliteOptions {
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default = "default_cache_ttl_secs")]
    cache_ttl_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

pub fn descriptor() -> BackendDescriptor {
    BackendDescriptor {
        type_id: TYPE_ID,
        display_name: "SQLite",
        build: build,
    }
}

fn build(config: &BackendConfig) -> KbResult<Arc<dyn KnowledgeBase>> {
    let options: SqliteOptions = config.parse_options(TYPE_ID)?;
    let ttl = Duration::from_secs(options.cache_ttl_secs);
    let kb = match options.path {
        Some(path) => SqliteKnowledgeBase::open(path, ttl)?,
        None => SqliteKnowledgeBase::open_in_memory(ttl)?,
    };
    Ok(Arc::new(kb))
}

/// SQLite-backed catalog. Ids are UUID v4 strings.
pub struct SqliteKnowledgeBase {
    conn: Mutex<Connection>,
    options: SqliteOptions,
    cache: ScanCache,
}

impl SqliteKnowledgeBase {
    pub fn open(path: impl Into<PathBuf>, cache_ttl: Duration) -> KbResult<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(KbError::invalid_config(TYPE_ID, "path cannot be empty"));
        }
        let conn = open_db(&path)?;
        Ok(Self::with_connection(conn, Some(path), cache_ttl))
    }

    /// Private database that lives as long as this instance.
    pub fn open_in_memory(cache_ttl: Duration) -> KbResult<Self> {
        let conn = open_db_in_memory()?;
        Ok(Self::with_connection(conn, None, cache_ttl))
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>, cache_ttl: Duration) -> Self {
        Self {
            conn: Mutex::new(conn),
            options: SqliteOptions {
                path,
                cache_ttl_secs: cache_ttl.as_secs(),
            },
            cache: ScanCache::new(cache_ttl),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.options.path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_all(&self) -> KbResult<Vec<CauseRecord>> {
        let conn = self.conn();
        let mut categories = load_categories(&conn)?;

        let mut stmt = conn.prepare(&format!("{CAUSE_SELECT_SQL} ORDER BY id ASC;"))?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = parse_cause_row(row)?;
            if let Some(id) = &record.id {
                record.categories = categories.remove(id.as_str()).unwrap_or_default();
            }
            record.validate()?;
            records.push(record);
        }
        Ok(records)
    }

    fn write<T>(&self, apply: impl FnOnce(&Transaction<'_>) -> KbResult<T>) -> KbResult<T> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let value = apply(&tx)?;
        tx.commit()?;
        self.cache.invalidate();
        Ok(value)
    }
}

impl KnowledgeBase for SqliteKnowledgeBase {
    fn type_id(&self) -> &'static str {
        TYPE_ID
    }

    fn config(&self) -> BackendConfig {
        BackendConfig::from_options(TYPE_ID, &self.options)
    }

    fn list_for_scan(&self) -> KbResult<Vec<CauseRecord>> {
        let records = self.cache.get_or_load(|| self.load_all())?;
        Ok(records.as_ref().clone())
    }

    fn list_for_edit(&self) -> KbResult<Vec<CauseName>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, name FROM causes ORDER BY id ASC;")?;
        let mut rows = stmt.query([])?;
        let mut names = Vec::new();
        while let Some(row) = rows.next()? {
            names.push(CauseName {
                id: parse_id(row.get::<_, String>("id")?)?,
                name: row.get("name")?,
            });
        }
        Ok(names)
    }

    fn get(&self, id: &CauseId) -> KbResult<CauseRecord> {
        let conn = self.conn();
        let mut record = select_cause(&conn, id)?.ok_or_else(|| KbError::NotFound(id.clone()))?;
        record.categories = select_categories(&conn, id)?;
        record.validate()?;
        Ok(record)
    }

    fn add(&self, record: &CauseRecord) -> KbResult<CauseRecord> {
        record.validate()?;
        let mut stored = record.clone();
        stored.id = Some(CauseId::new(Uuid::new_v4().to_string())?);
        self.write(|tx| upsert_cause(tx, &stored))?;
        Ok(stored)
    }

    fn save(&self, record: &CauseRecord) -> KbResult<CauseRecord> {
        record.validate()?;
        record.require_id()?;
        self.write(|tx| upsert_cause(tx, record))?;
        Ok(record.clone())
    }

    fn remove(&self, id: &CauseId) -> KbResult<CauseRecord> {
        self.write(|tx| {
            let mut record = select_cause(tx, id)?.ok_or_else(|| KbError::NotFound(id.clone()))?;
            record.categories = select_categories(tx, id)?;
            tx.execute("DELETE FROM causes WHERE id = ?1;", [id.as_str()])?;
            Ok(record)
        })
    }

    fn categories(&self) -> KbResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT DISTINCT category FROM cause_categories ORDER BY category ASC;")?;
        let categories = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    /// Same database file means same catalog. In-memory databases are
    /// private, so only the very same instance qualifies.
    fn equivalent_config(&self, other: &dyn KnowledgeBase) -> bool {
        if other.type_id() != TYPE_ID {
            return false;
        }
        match self.path() {
            Some(path) => config_path(&other.config())
                .is_some_and(|other_path| same_storage_path(path, &other_path)),
            None => std::ptr::eq(
                self as *const Self as *const u8,
                other as *const dyn KnowledgeBase as *const u8,
            ),
        }
    }
}

fn upsert_cause(tx: &Transaction<'_>, record: &CauseRecord) -> KbResult<()> {
    let id = record.require_id()?;
    let indications = serde_json::to_string(&record.indications)
        .map_err(|err| KbError::InvalidData(err.to_string()))?;

    tx.execute(
        "INSERT INTO causes (
            id,
            name,
            description,
            comment,
            indications,
            last_occurred
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            comment = excluded.comment,
            indications = excluded.indications,
            last_occurred = excluded.last_occurred,
            updated_at = (strftime('%s', 'now') * 1000);",
        params![
            id.as_str(),
            record.name.as_str(),
            record.description.as_str(),
            record.comment.as_str(),
            indications,
            record.last_occurred,
        ],
    )?;

    tx.execute(
        "DELETE FROM cause_categories WHERE cause_id = ?1;",
        [id.as_str()],
    )?;
    let mut insert = tx.prepare(
        "INSERT INTO cause_categories (cause_id, position, category) VALUES (?1, ?2, ?3);",
    )?;
    for (position, category) in record.categories.iter().enumerate() {
        insert.execute(params![id.as_str(), position as i64, category.as_str()])?;
    }
    Ok(())
}

fn select_cause(conn: &Connection, id: &CauseId) -> KbResult<Option<CauseRecord>> {
    let mut stmt = conn.prepare(&format!("{CAUSE_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([id.as_str()])?;
    match rows.next()? {
        Some(row) => Ok(Some(parse_cause_row(row)?)),
        None => Ok(None),
    }
}

fn select_categories(conn: &Connection, id: &CauseId) -> KbResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT category FROM cause_categories WHERE cause_id = ?1 ORDER BY position ASC;",
    )?;
    let categories = stmt
        .query_map([id.as_str()], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(categories)
}

fn load_categories(conn: &Connection) -> KbResult<HashMap<String, Vec<String>>> {
    let mut stmt = conn.prepare(
        "SELECT cause_id, category FROM cause_categories ORDER BY cause_id ASC, position ASC;",
    )?;
    let mut rows = stmt.query([])?;
    let mut categories: HashMap<String, Vec<String>> = HashMap::new();
    while let Some(row) = rows.next()? {
        categories
            .entry(row.get("cause_id")?)
            .or_default()
            .push(row.get("category")?);
    }
    Ok(categories)
}

/// Decodes the `causes` columns. Categories are filled in by the caller.
fn parse_cause_row(row: &Row<'_>) -> KbResult<CauseRecord> {
    let id = parse_id(row.get::<_, String>("id")?)?;

    let indications_text: String = row.get("indications")?;
    let indications: Vec<Indication> = serde_json::from_str(&indications_text).map_err(|err| {
        KbError::InvalidData(format!(
            "invalid indications for cause `{id}` in causes.indications: {err}"
        ))
    })?;

    Ok(CauseRecord {
        id: Some(id),
        name: row.get("name")?,
        description: row.get("description")?,
        comment: row.get("comment")?,
        categories: Vec::new(),
        indications,
        last_occurred: row.get("last_occurred")?,
    })
}

fn parse_id(value: String) -> KbResult<CauseId> {
    CauseId::new(value.clone())
        .map_err(|_| KbError::InvalidData(format!("invalid id value `{value}` in causes.id")))
}

