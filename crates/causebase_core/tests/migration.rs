use causebase_core::backend::memory::InMemoryKnowledgeBase;
use causebase_core::backend::sqlite::SqliteKnowledgeBase;
use causebase_core::{
    migrate, BackendConfig, CauseId, CauseName, CauseRecord, CopyStage, Indication, KbError,
    KbResult, KnowledgeBase, MigrationError,
};
use std::time::Duration;

/// Destination that refuses to store one specific id.
struct RejectingBackend {
    inner: InMemoryKnowledgeBase,
    reject: CauseId,
}

impl KnowledgeBase for RejectingBackend {
    fn type_id(&self) -> &'static str {
        "rejecting"
    }

    fn config(&self) -> BackendConfig {
        BackendConfig::new("rejecting")
    }

    fn list_for_scan(&self) -> KbResult<Vec<CauseRecord>> {
        self.inner.list_for_scan()
    }

    fn list_for_edit(&self) -> KbResult<Vec<CauseName>> {
        self.inner.list_for_edit()
    }

    fn get(&self, id: &CauseId) -> KbResult<CauseRecord> {
        self.inner.get(id)
    }

    fn add(&self, record: &CauseRecord) -> KbResult<CauseRecord> {
        self.inner.add(record)
    }

    fn save(&self, record: &CauseRecord) -> KbResult<CauseRecord> {
        if record.id.as_ref() == Some(&self.reject) {
            return Err(KbError::unavailable("rejecting", "disk full"));
        }
        self.inner.save(record)
    }

    fn remove(&self, id: &CauseId) -> KbResult<CauseRecord> {
        self.inner.remove(id)
    }
}

/// Source whose id listing always fails.
struct OfflineBackend;

impl KnowledgeBase for OfflineBackend {
    fn type_id(&self) -> &'static str {
        "offline"
    }

    fn config(&self) -> BackendConfig {
        BackendConfig::new("offline")
    }

    fn list_for_scan(&self) -> KbResult<Vec<CauseRecord>> {
        Err(KbError::unavailable("offline", "connection refused"))
    }

    fn list_for_edit(&self) -> KbResult<Vec<CauseName>> {
        Err(KbError::unavailable("offline", "connection refused"))
    }

    fn get(&self, id: &CauseId) -> KbResult<CauseRecord> {
        Err(KbError::NotFound(id.clone()))
    }

    fn add(&self, _record: &CauseRecord) -> KbResult<CauseRecord> {
        Err(KbError::unavailable("offline", "connection refused"))
    }

    fn save(&self, _record: &CauseRecord) -> KbResult<CauseRecord> {
        Err(KbError::unavailable("offline", "connection refused"))
    }

    fn remove(&self, id: &CauseId) -> KbResult<CauseRecord> {
        Err(KbError::NotFound(id.clone()))
    }
}

fn seeded_source() -> InMemoryKnowledgeBase {
    let source = InMemoryKnowledgeBase::new();
    source
        .save(
            &CauseRecord::with_id("1", "OOM")
                .unwrap()
                .with_indication(Indication::build_log("java.lang.OutOfMemoryError")),
        )
        .unwrap();
    source
        .save(&CauseRecord::with_id("2", "Timeout").unwrap().with_category("network"))
        .unwrap();
    source
}

fn names(kb: &dyn KnowledgeBase) -> Vec<(String, String)> {
    kb.list_for_edit()
        .unwrap()
        .into_iter()
        .map(|name| (name.id.to_string(), name.name))
        .collect()
}

#[test]
fn migration_preserves_ids_and_content() {
    let source = seeded_source();
    let destination = SqliteKnowledgeBase::open_in_memory(Duration::ZERO).unwrap();

    let report = migrate(&source, &destination).unwrap();
    assert_eq!(report.copied.len(), 2);

    assert_eq!(
        names(&destination),
        vec![
            ("1".to_string(), "OOM".to_string()),
            ("2".to_string(), "Timeout".to_string())
        ]
    );
    for name in source.list_for_edit().unwrap() {
        assert_eq!(
            destination.get(&name.id).unwrap(),
            source.get(&name.id).unwrap()
        );
    }
}

#[test]
fn migrating_twice_does_not_duplicate() {
    let source = seeded_source();
    let destination = InMemoryKnowledgeBase::new();

    migrate(&source, &destination).unwrap();
    let once = destination.list_for_scan().unwrap();
    migrate(&source, &destination).unwrap();
    let twice = destination.list_for_scan().unwrap();

    assert_eq!(once, twice);
    assert_eq!(twice.len(), 2);
}

#[test]
fn migrating_empty_source_succeeds_with_empty_report() {
    let source = InMemoryKnowledgeBase::new();
    let destination = InMemoryKnowledgeBase::new();
    let report = migrate(&source, &destination).unwrap();
    assert!(report.copied.is_empty());
}

#[test]
fn one_failed_record_does_not_stop_the_rest() {
    let source = seeded_source();
    source
        .save(&CauseRecord::with_id("3", "Disk full").unwrap())
        .unwrap();
    let destination = RejectingBackend {
        inner: InMemoryKnowledgeBase::new(),
        reject: CauseId::new("2").unwrap(),
    };

    let err = migrate(&source, &destination).unwrap_err();
    match &err {
        MigrationError::Incomplete { copied, failures } => {
            let copied: Vec<&str> = copied.iter().map(CauseId::as_str).collect();
            assert_eq!(copied, vec!["1", "3"]);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].id.as_str(), "2");
            assert_eq!(failures[0].stage, CopyStage::Write);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.failures().len(), 1);
    assert_eq!(destination.list_for_edit().unwrap().len(), 2);
}

#[test]
fn unreadable_source_listing_copies_nothing() {
    let destination = InMemoryKnowledgeBase::new();
    let err = migrate(&OfflineBackend, &destination).unwrap_err();
    assert!(matches!(err, MigrationError::SourceUnavailable(_)));
    assert!(err.failures().is_empty());
    assert!(destination.list_for_edit().unwrap().is_empty());
}
