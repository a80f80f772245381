//! Trait for the snapshot database.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::records::{InsertResult, Snapshot, StationInfo, TrainingRow};

/// Persistence seam shared by the collector, the trainer and the predictor.
///
/// Every write is an independent atomic unit: implementations must not let a
/// failure for one station leave another station's rows half-written.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert-or-update keyed by `station_id`, refreshing `updated_at`.
    async fn upsert_station(&self, info: &StationInfo) -> Result<()>;

    /// Insert keyed by `(collected_at, station_id)`. A key conflict yields
    /// [`InsertResult::Duplicate`], never an error.
    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<InsertResult>;

    /// Snapshots of installed stations joined with their metadata, oldest first.
    async fn training_rows(&self) -> Result<Vec<TrainingRow>>;

    async fn station_capacity(&self, station_id: &str) -> Result<Option<i32>>;

    /// Known capacities; stations with a null capacity are omitted.
    async fn station_capacities(&self) -> Result<HashMap<String, i32>>;

    /// Deletes snapshots collected strictly before `cutoff`, returning how many.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
