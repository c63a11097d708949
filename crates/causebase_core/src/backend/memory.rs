//! Process-local catalog backend.
//!
//! Ids are decimal counters. Migrated ids are kept as-is and the counter is
//! bumped past any numeric id it sees, so generated ids never collide.

use crate::backend::config::{BackendConfig, BackendDescriptor};
use crate::backend::{next_decimal_id, sorted_names, KbError, KbResult, KnowledgeBase};
use crate::model::cause::{CauseId, CauseName, CauseRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

pub const TYPE_ID: &str = "memory";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct MemoryOptions {}

pub fn descriptor() -> BackendDescriptor {
    BackendDescriptor {
        type_id: TYPE_ID,
        display_name: "In-memory",
        build: build,
    }
}

fn build(config: &BackendConfig) -> KbResult<Arc<dyn KnowledgeBase>> {
    let _: MemoryOptions = config.parse_options(TYPE_ID)?;
    Ok(Arc::new(InMemoryKnowledgeBase::new()))
}

#[derive(Default)]
struct State {
    causes: BTreeMap<CauseId, CauseRecord>,
    next_id: u64,
}

impl State {
    fn allocate_id(&mut self) -> KbResult<CauseId> {
        let causes = &self.causes;
        next_decimal_id(TYPE_ID, &mut self.next_id, |id| causes.contains_key(id))
    }

    fn observe_id(&mut self, id: &CauseId) {
        if let Ok(numeric) = id.as_str().parse::<u64>() {
            self.next_id = self.next_id.max(numeric.saturating_add(1));
        }
    }
}

/// Catalog held entirely in process memory.
///
/// Contents die with the instance; a second instance never shares them.
#[derive(Default)]
pub struct InMemoryKnowledgeBase {
    state: RwLock<State>,
}

impl InMemoryKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KnowledgeBase for InMemoryKnowledgeBase {
    fn type_id(&self) -> &'static str {
        TYPE_ID
    }

    fn config(&self) -> BackendConfig {
        BackendConfig::from_options(TYPE_ID, &MemoryOptions::default())
    }

    fn list_for_scan(&self) -> KbResult<Vec<CauseRecord>> {
        Ok(self.read().causes.values().cloned().collect())
    }

    fn list_for_edit(&self) -> KbResult<Vec<CauseName>> {
        Ok(sorted_names(self.read().causes.values().cloned()))
    }

    fn get(&self, id: &CauseId) -> KbResult<CauseRecord> {
        self.read()
            .causes
            .get(id)
            .cloned()
            .ok_or_else(|| KbError::NotFound(id.clone()))
    }

    fn add(&self, record: &CauseRecord) -> KbResult<CauseRecord> {
        record.validate()?;

        let mut state = self.write();
        let mut stored = record.clone();
        let id = state.allocate_id()?;
        stored.id = Some(id.clone());
        state.causes.insert(id, stored.clone());
        Ok(stored)
    }

    fn save(&self, record: &CauseRecord) -> KbResult<CauseRecord> {
        record.validate()?;
        let id = record.require_id()?.clone();

        let mut state = self.write();
        state.observe_id(&id);
        state.causes.insert(id, record.clone());
        Ok(record.clone())
    }

    fn remove(&self, id: &CauseId) -> KbResult<CauseRecord> {
        self.write()
            .causes
            .remove(id)
            .ok_or_else(|| KbError::NotFound(id.clone()))
    }

    /// Only the very same instance is equivalent: a new memory backend
    /// starts empty.
    fn equivalent_config(&self, other: &dyn KnowledgeBase) -> bool {
        std::ptr::eq(
            self as *const Self as *const u8,
            other as *const dyn KnowledgeBase as *const u8,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::InMemoryKnowledgeBase;
    use crate::backend::KnowledgeBase;
    use crate::model::cause::CauseRecord;

    #[test]
    fn generated_ids_skip_past_migrated_numeric_ids() {
        let kb = InMemoryKnowledgeBase::new();
        kb.save(&CauseRecord::with_id("1", "OOM").unwrap()).unwrap();
        kb.save(&CauseRecord::with_id("2", "Timeout").unwrap())
            .unwrap();

        let added = kb.add(&CauseRecord::new("Disk full")).unwrap();
        assert_eq!(added.id.unwrap().as_str(), "3");
    }

    #[test]
    fn non_numeric_ids_do_not_disturb_counter() {
        let kb = InMemoryKnowledgeBase::new();
        kb.save(&CauseRecord::with_id("a1b2", "Imported").unwrap())
            .unwrap();

        let added = kb.add(&CauseRecord::new("Fresh")).unwrap();
        assert_eq!(added.id.unwrap().as_str(), "1");
    }

    #[test]
    fn distinct_instances_are_never_equivalent() {
        let a = InMemoryKnowledgeBase::new();
        let b = InMemoryKnowledgeBase::new();
        assert!(a.equivalent_config(&a));
        assert!(!a.equivalent_config(&b));
        assert_eq!(a.config(), b.config());
    }
}
