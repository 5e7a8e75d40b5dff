//! Snapshot lifecycle: versioning, staleness, refresh semantics.

use std::cell::Cell;

use chrono::NaiveDate;
use serde_json::{json, Value};

use heron::error::HeronError;
use heron::plan::{normalize, Plan};
use heron::snapshot::{SnapshotCompute, SnapshotStore, SnapshotType};
use heron::store::MetadataStore;

/// Counts compute calls and serves a fixed source max date.
struct FakeCompute {
    calls: Cell<u32>,
    source_date: Option<NaiveDate>,
}

impl FakeCompute {
    fn new(source_date: Option<NaiveDate>) -> Self {
        Self {
            calls: Cell::new(0),
            source_date,
        }
    }
}

impl SnapshotCompute for FakeCompute {
    fn compute(
        &self,
        snapshot_type: SnapshotType,
        _dataset_id: Option<&str>,
        _plan: Option<&Plan>,
    ) -> Result<(Value, Option<NaiveDate>), HeronError> {
        self.calls.set(self.calls.get() + 1);
        // Identical payload on every call: version and run_id still move.
        Ok((
            json!({"type": snapshot_type.as_str(), "payload": "fixed"}),
            self.source_date,
        ))
    }

    fn source_max_date(&self, _dataset_id: Option<&str>) -> Result<Option<NaiveDate>, HeronError> {
        Ok(self.source_date)
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn test_versions_increase_monotonically_for_identical_payloads() {
    let store = MetadataStore::open_in_memory().unwrap();
    let snapshots = SnapshotStore::new(&store, Box::new(FakeCompute::new(None)));

    let first = snapshots
        .refresh(SnapshotType::TrendAnalysis, None, None)
        .unwrap();
    let second = snapshots
        .refresh(SnapshotType::TrendAnalysis, None, None)
        .unwrap();
    let third = snapshots
        .refresh(SnapshotType::TrendAnalysis, None, None)
        .unwrap();

    assert_eq!(first.record.snapshot_version, 1);
    assert_eq!(second.record.snapshot_version, 2);
    assert_eq!(third.record.snapshot_version, 3);
    // Payload did not change, run identity did.
    assert_eq!(first.record.snapshot_json, third.record.snapshot_json);
    assert_ne!(first.record.run_id, second.record.run_id);
    assert_ne!(second.record.run_id, third.record.run_id);
}

#[test]
fn test_expired_ttl_is_stale_even_when_source_is_unchanged() {
    let store = MetadataStore::open_in_memory().unwrap();
    let source = date(2024, 6, 30);
    // Zero TTL: any stored snapshot has exceeded its lifetime, so the age
    // check alone must force a refresh, source drift or not.
    let snapshots =
        SnapshotStore::new(&store, Box::new(FakeCompute::new(Some(source)))).with_ttl_hours(0);

    let first = snapshots
        .get(SnapshotType::TrendAnalysis, None, None, true)
        .unwrap();
    let second = snapshots
        .get(SnapshotType::TrendAnalysis, None, None, true)
        .unwrap();

    assert!(first.refreshed);
    assert!(second.refreshed);
    assert_eq!(second.record.snapshot_version, 2);
    assert_eq!(second.record.source_max_date, Some(source));
}

#[test]
fn test_fresh_snapshot_with_matching_source_not_refreshed() {
    let store = MetadataStore::open_in_memory().unwrap();
    let source = date(2024, 6, 30);
    let snapshots = SnapshotStore::new(&store, Box::new(FakeCompute::new(Some(source))));

    snapshots
        .get(SnapshotType::TrendAnalysis, None, None, true)
        .unwrap();
    let again = snapshots
        .get(SnapshotType::TrendAnalysis, None, None, true)
        .unwrap();
    assert!(!again.refreshed);
    assert_eq!(again.record.snapshot_version, 1);
}

#[test]
fn test_refresh_if_stale_false_returns_stored_row() {
    let store = MetadataStore::open_in_memory().unwrap();
    // TTL zero makes the row permanently stale, but the caller opted out.
    let snapshots =
        SnapshotStore::new(&store, Box::new(FakeCompute::new(None))).with_ttl_hours(0);

    snapshots
        .get(SnapshotType::CustomerSegmentation, None, None, true)
        .unwrap();
    let read_only = snapshots
        .get(SnapshotType::CustomerSegmentation, None, None, false)
        .unwrap();
    assert!(!read_only.refreshed);
    assert_eq!(read_only.record.snapshot_version, 1);
}

#[test]
fn test_new_source_data_invalidates_default_scope() {
    let store = MetadataStore::open_in_memory().unwrap();
    {
        let snapshots =
            SnapshotStore::new(&store, Box::new(FakeCompute::new(Some(date(2024, 6, 30)))));
        snapshots
            .get(SnapshotType::TrendAnalysis, None, None, true)
            .unwrap();
    }

    // A day of new rows arrived.
    let snapshots =
        SnapshotStore::new(&store, Box::new(FakeCompute::new(Some(date(2024, 7, 1)))));
    let snap = snapshots
        .get(SnapshotType::TrendAnalysis, None, None, true)
        .unwrap();
    assert!(snap.refreshed);
    assert_eq!(snap.record.snapshot_version, 2);
    assert_eq!(snap.record.source_max_date, Some(date(2024, 7, 1)));
}

#[test]
fn test_plan_scoped_snapshot_ignores_source_drift() {
    let store = MetadataStore::open_in_memory().unwrap();
    let plan = normalize(
        &json!({"intent": "trend_analysis"}),
        "monthly revenue trend",
    )
    .unwrap();

    {
        let snapshots =
            SnapshotStore::new(&store, Box::new(FakeCompute::new(Some(date(2024, 6, 30)))));
        snapshots
            .get(SnapshotType::TrendAnalysis, None, Some(&plan), true)
            .unwrap();
    }

    // Source moved, but the plan-scoped row is within TTL: no recompute.
    let snapshots =
        SnapshotStore::new(&store, Box::new(FakeCompute::new(Some(date(2024, 7, 1)))));
    let snap = snapshots
        .get(SnapshotType::TrendAnalysis, None, Some(&plan), true)
        .unwrap();
    assert!(!snap.refreshed);
    assert_eq!(snap.record.snapshot_version, 1);
}

#[test]
fn test_datasets_and_scopes_are_separate_rows() {
    let store = MetadataStore::open_in_memory().unwrap();
    let snapshots = SnapshotStore::new(&store, Box::new(FakeCompute::new(None)));
    let plan = normalize(&json!({"intent": "trend_analysis"}), "trend").unwrap();

    let default_row = snapshots
        .refresh(SnapshotType::TrendAnalysis, None, None)
        .unwrap();
    let dataset_row = snapshots
        .refresh(SnapshotType::TrendAnalysis, Some("retail"), None)
        .unwrap();
    let plan_row = snapshots
        .refresh(SnapshotType::TrendAnalysis, None, Some(&plan))
        .unwrap();

    // Three distinct keys, each starting its own version sequence.
    assert_eq!(default_row.record.snapshot_version, 1);
    assert_eq!(dataset_row.record.snapshot_version, 1);
    assert_eq!(plan_row.record.snapshot_version, 1);
    assert_ne!(default_row.record.scope_key, plan_row.record.scope_key);
    assert_ne!(default_row.record.dataset_id, dataset_row.record.dataset_id);
}

#[test]
fn test_refresh_all_refreshes_every_type_in_name_order() {
    let store = MetadataStore::open_in_memory().unwrap();
    let snapshots = SnapshotStore::new(&store, Box::new(FakeCompute::new(None)));

    let all = snapshots.refresh_all().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].record.snapshot_type, "customer_segmentation");
    assert_eq!(all[1].record.snapshot_type, "trend_analysis");
    assert!(all.iter().all(|s| s.refreshed));

    let again = snapshots.refresh_all().unwrap();
    assert!(again.iter().all(|s| s.record.snapshot_version == 2));
}
