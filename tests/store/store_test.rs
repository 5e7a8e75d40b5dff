//! Metadata store behavior: plan→SQL cache keys, traces, persistence.

use chrono::Utc;
use serde_json::json;
use tempfile::TempDir;

use heron::store::{DatasetRecord, MetadataStore, DEFAULT_DATASET};

#[test]
fn test_cached_sql_get_after_set_is_idempotent() {
    let store = MetadataStore::open_in_memory().unwrap();
    store
        .set_cached_sql(Some("retail"), "sig-1", "SELECT 1", Some("hash-a"))
        .unwrap();

    for _ in 0..3 {
        assert_eq!(
            store
                .get_cached_sql(Some("retail"), "sig-1", Some("hash-a"))
                .unwrap()
                .as_deref(),
            Some("SELECT 1")
        );
    }
}

#[test]
fn test_cache_key_components_are_independent() {
    let store = MetadataStore::open_in_memory().unwrap();
    store
        .set_cached_sql(Some("retail"), "sig-1", "SELECT 1", Some("hash-a"))
        .unwrap();

    // Different dataset, signature, or schema hash: all misses.
    assert!(store
        .get_cached_sql(Some("other"), "sig-1", Some("hash-a"))
        .unwrap()
        .is_none());
    assert!(store
        .get_cached_sql(Some("retail"), "sig-2", Some("hash-a"))
        .unwrap()
        .is_none());
    assert!(store
        .get_cached_sql(Some("retail"), "sig-1", Some("hash-b"))
        .unwrap()
        .is_none());
    // A schema-hash-less entry is its own key, not a fallback.
    assert!(store
        .get_cached_sql(Some("retail"), "sig-1", None)
        .unwrap()
        .is_none());
}

#[test]
fn test_cache_overwrite_last_write_wins() {
    let store = MetadataStore::open_in_memory().unwrap();
    store.set_cached_sql(None, "sig", "SELECT 1", None).unwrap();
    store.set_cached_sql(None, "sig", "SELECT 2", None).unwrap();
    assert_eq!(
        store.get_cached_sql(None, "sig", None).unwrap().as_deref(),
        Some("SELECT 2")
    );
}

#[test]
fn test_store_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("heron.db");

    {
        let store = MetadataStore::open(&path).unwrap();
        store
            .set_cached_sql(Some("retail"), "sig", "SELECT 42", None)
            .unwrap();
        store
            .save_schema_metadata("retail", "hash-a", &json!({"tables": []}))
            .unwrap();
    }

    let store = MetadataStore::open(&path).unwrap();
    assert_eq!(
        store
            .get_cached_sql(Some("retail"), "sig", None)
            .unwrap()
            .as_deref(),
        Some("SELECT 42")
    );
    assert_eq!(
        store.load_schema_hash("retail").unwrap().as_deref(),
        Some("hash-a")
    );
}

#[test]
fn test_query_traces_are_append_only_and_ordered() {
    let store = MetadataStore::open_in_memory().unwrap();
    for attempt in 1..=5 {
        store
            .append_query_trace(&json!({"attempt": attempt, "status": "ok"}))
            .unwrap();
    }

    let all = store.load_query_traces(None).unwrap();
    assert_eq!(all.len(), 5);
    assert_eq!(all[0]["attempt"], 1);
    assert_eq!(all[4]["attempt"], 5);

    let recent = store.load_query_traces(Some(2)).unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0]["attempt"], 4);
    assert_eq!(recent[1]["attempt"], 5);
}

#[test]
fn test_dataset_registration_upserts() {
    let store = MetadataStore::open_in_memory().unwrap();
    let mut record = DatasetRecord {
        dataset_id: "retail".into(),
        name: "Retail".into(),
        source_type: "warehouse".into(),
        db_engine: "postgres".into(),
        schema_name: "public".into(),
        status: "ready".into(),
        schema_hash: None,
        row_count: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    store.register_dataset(&record).unwrap();

    record.status = "refreshing".into();
    record.row_count = Some(10_000);
    store.register_dataset(&record).unwrap();

    let loaded = store.get_dataset("retail").unwrap().unwrap();
    assert_eq!(loaded.status, "refreshing");
    assert_eq!(loaded.row_count, Some(10_000));
    assert_eq!(store.list_datasets().unwrap().len(), 1);
}

#[test]
fn test_default_dataset_key_is_reserved_name() {
    let store = MetadataStore::open_in_memory().unwrap();
    store
        .save_schema_metadata(DEFAULT_DATASET, "h", &json!({"tables": []}))
        .unwrap();
    assert!(store
        .load_schema_metadata(DEFAULT_DATASET)
        .unwrap()
        .is_some());
}
