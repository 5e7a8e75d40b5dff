//! Versioned mining snapshots.
//!
//! Heavy analyses (trend regression, RFM rollups) run on a schedule or on
//! demand, never inline with a user question. Results land in the metadata
//! store keyed by (type, dataset, scope) with a monotonically increasing
//! version; readers get the stored row back until it goes stale.
//!
//! Staleness: a snapshot older than the TTL is always stale. The
//! dataset-agnostic default scope additionally compares the source data's
//! maximum event date against the one recorded at computation time, so new
//! data invalidates early. Plan-scoped snapshots rely on the TTL alone.

mod features;

pub use features::FeatureCompute;

use chrono::{Duration, NaiveDate, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::HeronError;
use crate::plan::{Plan, DEFAULT_SCOPE_KEY};
use crate::store::{MetadataStore, SnapshotRecord, DEFAULT_DATASET};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SnapshotType {
    CustomerSegmentation,
    TrendAnalysis,
}

impl SnapshotType {
    /// All types, in sorted name order.
    pub const ALL: [SnapshotType; 2] =
        [SnapshotType::CustomerSegmentation, SnapshotType::TrendAnalysis];

    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotType::CustomerSegmentation => "customer_segmentation",
            SnapshotType::TrendAnalysis => "trend_analysis",
        }
    }

    pub fn from_str(raw: &str) -> Option<SnapshotType> {
        match raw {
            "customer_segmentation" => Some(SnapshotType::CustomerSegmentation),
            "trend_analysis" => Some(SnapshotType::TrendAnalysis),
            _ => None,
        }
    }
}

/// Produces snapshot payloads. The production implementation is
/// [`FeatureCompute`]; tests use canned fakes.
pub trait SnapshotCompute {
    /// Compute the payload plus the source data's max event date at the time
    /// of computation.
    fn compute(
        &self,
        snapshot_type: SnapshotType,
        dataset_id: Option<&str>,
        plan: Option<&Plan>,
    ) -> Result<(Value, Option<NaiveDate>), HeronError>;

    /// Current max event date in the source data, used for drift detection
    /// without recomputing the payload.
    fn source_max_date(&self, dataset_id: Option<&str>) -> Result<Option<NaiveDate>, HeronError>;
}

/// A snapshot row plus whether this call recomputed it.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub record: SnapshotRecord,
    pub refreshed: bool,
}

pub struct SnapshotStore<'a> {
    store: &'a MetadataStore,
    compute: Box<dyn SnapshotCompute + 'a>,
    ttl: Duration,
}

impl<'a> SnapshotStore<'a> {
    pub fn new(store: &'a MetadataStore, compute: Box<dyn SnapshotCompute + 'a>) -> Self {
        Self {
            store,
            compute,
            ttl: Duration::hours(24),
        }
    }

    pub fn with_ttl_hours(mut self, hours: i64) -> Self {
        self.ttl = Duration::hours(hours);
        self
    }

    /// Fetch a snapshot, computing it on first access and recomputing when
    /// `refresh_if_stale` is set and the stored row has gone stale.
    pub fn get(
        &self,
        snapshot_type: SnapshotType,
        dataset_id: Option<&str>,
        plan: Option<&Plan>,
        refresh_if_stale: bool,
    ) -> Result<Snapshot, HeronError> {
        let dataset_key = dataset_id.unwrap_or(DEFAULT_DATASET);
        let scope_key = scope_key(plan);

        let existing =
            self.store
                .load_snapshot(snapshot_type.as_str(), dataset_key, &scope_key)?;
        match existing {
            None => self.refresh(snapshot_type, dataset_id, plan),
            Some(record) => {
                if refresh_if_stale && self.is_stale(&record, dataset_id, plan)? {
                    debug!(
                        snapshot_type = snapshot_type.as_str(),
                        scope_key, "snapshot stale, recomputing"
                    );
                    self.refresh(snapshot_type, dataset_id, plan)
                } else {
                    Ok(Snapshot {
                        record,
                        refreshed: false,
                    })
                }
            }
        }
    }

    /// Recompute unconditionally. Always bumps the stored version.
    pub fn refresh(
        &self,
        snapshot_type: SnapshotType,
        dataset_id: Option<&str>,
        plan: Option<&Plan>,
    ) -> Result<Snapshot, HeronError> {
        let dataset_key = dataset_id.unwrap_or(DEFAULT_DATASET);
        let scope_key = scope_key(plan);

        let (payload, source_max_date) = self.compute.compute(snapshot_type, dataset_id, plan)?;
        let record = self.store.upsert_snapshot(
            snapshot_type.as_str(),
            dataset_key,
            &scope_key,
            &payload,
            source_max_date,
        )?;
        info!(
            snapshot_type = snapshot_type.as_str(),
            version = record.snapshot_version,
            "snapshot refreshed"
        );
        Ok(Snapshot {
            record,
            refreshed: true,
        })
    }

    /// Recompute every snapshot type at the default scope, in name order.
    pub fn refresh_all(&self) -> Result<Vec<Snapshot>, HeronError> {
        SnapshotType::ALL
            .iter()
            .map(|ty| self.refresh(*ty, None, None))
            .collect()
    }

    fn is_stale(
        &self,
        record: &SnapshotRecord,
        dataset_id: Option<&str>,
        plan: Option<&Plan>,
    ) -> Result<bool, HeronError> {
        if Utc::now() - record.generated_at > self.ttl {
            return Ok(true);
        }
        // Source-date drift only applies at the default scope; plan-scoped
        // snapshots age out by TTL.
        if plan.is_some() {
            return Ok(false);
        }
        let current = self.compute.source_max_date(dataset_id)?;
        Ok(current != record.source_max_date)
    }
}

fn scope_key(plan: Option<&Plan>) -> String {
    match plan {
        Some(plan) => plan.scope_key(),
        None => DEFAULT_SCOPE_KEY.to_string(),
    }
}
