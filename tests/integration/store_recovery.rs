#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use casita::error::PipelineError;
use casita::model::{PhaseId, PhaseStatus, SourceTier};
use casita::store::enrichment::EnrichmentStore;
use casita::store::work_items::WorkItemStore;
use tempfile::tempdir;

#[test]
fn work_items_survive_corrupt_primary_via_backup() {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("work_items.json");
    {
        let store = WorkItemStore::open(path.clone(), Duration::from_secs(1800)).unwrap();
        store.acquire("A", "w").unwrap();
        store
            .checkpoint("A", "w", PhaseId::P0County, PhaseStatus::Complete, Some("P0 done"))
            .unwrap();
        // Second write so the backup holds the checkpointed version.
        store
            .checkpoint("A", "w", PhaseId::P05Cost, PhaseStatus::Complete, None)
            .unwrap();
        store.release("A", "w").unwrap();
    }
    fs::write(&path, b"truncated garbag").unwrap();

    let store = WorkItemStore::open(path, Duration::from_secs(1800)).unwrap();
    let item = store.item("A").expect("item restored from backup");
    assert_eq!(item.status(PhaseId::P0County), PhaseStatus::Complete);
}

#[test]
fn both_files_corrupt_is_fatal() {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("work_items.json");
    fs::write(&path, b"{ nope").unwrap();
    fs::write(dir.path().join("work_items.json.bak"), b"also nope").unwrap();
    let err = WorkItemStore::open(path, Duration::from_secs(1800)).unwrap_err();
    assert!(matches!(err, PipelineError::CorruptState(_)));
}

#[test]
fn legacy_schema_version_is_refused() {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("enrichment.json");
    fs::write(&path, r#"{"schema_version": 1, "records": {}}"#).unwrap();
    let err =
        EnrichmentStore::open(path, dir.path().join("conflicts.jsonl")).unwrap_err();
    match err {
        PipelineError::CorruptState(message) => assert!(message.contains("schema version 1")),
        other => panic!("expected corrupt state, got {other:?}"),
    }
}

#[test]
fn enrichment_round_trip_deep_equals() {
    let dir = tempdir().expect("tmpdir");
    let store = EnrichmentStore::open(
        dir.path().join("enrichment.json"),
        dir.path().join("conflicts.jsonl"),
    )
    .unwrap();

    let mut fields = BTreeMap::new();
    fields.insert("beds".to_string(), serde_json::json!(4));
    fields.insert("baths".to_string(), serde_json::json!(2.5));
    fields.insert("sewer_type".to_string(), serde_json::json!("city"));
    store
        .apply_fields("123 MAIN ST", "zillow", SourceTier::Listing, 0.7, &fields)
        .unwrap();

    store.verify_round_trip().expect("round trip");

    // A second store over the same file sees the same records.
    let reopened = EnrichmentStore::open(
        dir.path().join("enrichment.json"),
        dir.path().join("conflicts.jsonl"),
    )
    .unwrap();
    assert_eq!(reopened.records(), store.records());
}

#[test]
fn conflicts_append_to_the_log_file() {
    let dir = tempdir().expect("tmpdir");
    let conflict_log = dir.path().join("conflicts.jsonl");
    let store =
        EnrichmentStore::open(dir.path().join("enrichment.json"), conflict_log.clone()).unwrap();

    let mut manual = BTreeMap::new();
    manual.insert("lot_sqft".to_string(), serde_json::json!(9200.0));
    store
        .apply_fields("A", "site-visit", SourceTier::Manual, 1.0, &manual)
        .unwrap();

    let mut county = BTreeMap::new();
    county.insert("lot_sqft".to_string(), serde_json::json!(11000.0));
    let stats = store
        .apply_fields("A", "assessor", SourceTier::County, 0.9, &county)
        .unwrap();
    assert_eq!(stats.conflicts, 1);

    let log = fs::read_to_string(&conflict_log).unwrap();
    assert_eq!(log.lines().count(), 1);
    assert!(log.contains("lot_sqft"));
    assert!(log.contains("site-visit"));
    // Manual value kept.
    assert_eq!(store.get("A").unwrap().lot_sqft, Some(9200.0));
}

#[test]
fn expired_locks_reset_in_progress_work() {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("work_items.json");
    {
        let store = WorkItemStore::open(path.clone(), Duration::from_secs(0)).unwrap();
        store.acquire("A", "crashed-worker").unwrap();
        store
            .checkpoint(
                "A",
                "crashed-worker",
                PhaseId::P1Listing,
                PhaseStatus::InProgress,
                None,
            )
            .unwrap();
        // Worker dies here without releasing.
    }
    let store = WorkItemStore::open(path, Duration::from_secs(0)).unwrap();
    let item = store.item("A").unwrap();
    assert!(item.lock.is_none());
    assert_eq!(item.status(PhaseId::P1Listing), PhaseStatus::Pending);
    assert!(store.acquire("A", "new-worker").unwrap());
}
