//! In-process [`SnapshotStore`] with the same key and foreign-key rules as the
//! Postgres schema. Used by tests and by `collect --dry-run`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::records::{InsertResult, Snapshot, StationInfo, TrainingRow};
use crate::services::snapshot_store::SnapshotStore;

#[derive(Default)]
struct Tables {
    stations: HashMap<String, (StationInfo, DateTime<Utc>)>,
    snapshots: BTreeMap<(DateTime<Utc>, String), Snapshot>,
    writes: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    pub fn station_count(&self) -> usize {
        self.lock().map(|t| t.stations.len()).unwrap_or(0)
    }

    pub fn snapshot_count(&self) -> usize {
        self.lock().map(|t| t.snapshots.len()).unwrap_or(0)
    }

    /// Number of write attempts (upserts and inserts, including duplicates).
    pub fn write_count(&self) -> usize {
        self.lock().map(|t| t.writes).unwrap_or(0)
    }

    pub fn station(&self, station_id: &str) -> Option<StationInfo> {
        self.lock()
            .ok()?
            .stations
            .get(station_id)
            .map(|(info, _)| info.clone())
    }

    pub fn station_updated_at(&self, station_id: &str) -> Option<DateTime<Utc>> {
        self.lock().ok()?.stations.get(station_id).map(|(_, at)| *at)
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.lock()
            .map(|t| t.snapshots.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn upsert_station(&self, info: &StationInfo) -> Result<()> {
        let mut tables = self.lock()?;
        tables.writes += 1;
        tables
            .stations
            .insert(info.station_id.clone(), (info.clone(), Utc::now()));
        Ok(())
    }

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<InsertResult> {
        let mut tables = self.lock()?;
        tables.writes += 1;

        if !tables.stations.contains_key(&snapshot.station_id) {
            return Err(anyhow!(
                "station '{}' has no station_info row",
                snapshot.station_id
            ));
        }

        let key = (snapshot.collected_at, snapshot.station_id.clone());
        if tables.snapshots.contains_key(&key) {
            return Ok(InsertResult::Duplicate);
        }
        tables.snapshots.insert(key, snapshot.clone());
        Ok(InsertResult::Inserted)
    }

    async fn training_rows(&self) -> Result<Vec<TrainingRow>> {
        let tables = self.lock()?;
        Ok(tables
            .snapshots
            .values()
            .filter(|s| s.is_installed)
            .map(|s| TrainingRow {
                collected_at: s.collected_at,
                station_id: s.station_id.clone(),
                bikes_available: s.bikes_available,
                capacity: tables
                    .stations
                    .get(&s.station_id)
                    .and_then(|(info, _)| info.capacity),
            })
            .collect())
    }

    async fn station_capacity(&self, station_id: &str) -> Result<Option<i32>> {
        Ok(self
            .lock()?
            .stations
            .get(station_id)
            .and_then(|(info, _)| info.capacity))
    }

    async fn station_capacities(&self) -> Result<HashMap<String, i32>> {
        Ok(self
            .lock()?
            .stations
            .iter()
            .filter_map(|(id, (info, _))| info.capacity.map(|c| (id.clone(), c)))
            .collect())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.lock()?;
        let before = tables.snapshots.len();
        tables.snapshots.retain(|(at, _), _| *at >= cutoff);
        Ok((before - tables.snapshots.len()) as u64)
    }
}
