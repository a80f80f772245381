use chrono::{DateTime, NaiveTime, Utc};
use serde::{Serialize, Serializer};

use crate::records::{InsertResult, Origin};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CollectionStatus {
    /// The gate fired: no feed calls, no writes.
    SkippedClosed {
        #[serde(serialize_with = "hh_mm")]
        local_time: NaiveTime,
    },
    Completed,
}

fn hh_mm<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&time.format("%H:%M"))
}

/// Per-cycle counters returned by the collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionResult {
    pub origin: Origin,
    pub status: CollectionStatus,
    pub collected_at: Option<DateTime<Utc>>,
    pub stations_upserted: usize,
    pub snapshots_inserted: usize,
    pub duplicates_skipped: usize,
    pub errors: usize,
}

impl CollectionResult {
    pub fn skipped(origin: Origin, local_time: NaiveTime) -> Self {
        Self {
            origin,
            status: CollectionStatus::SkippedClosed { local_time },
            collected_at: None,
            stations_upserted: 0,
            snapshots_inserted: 0,
            duplicates_skipped: 0,
            errors: 0,
        }
    }

    pub fn started(origin: Origin, collected_at: DateTime<Utc>) -> Self {
        Self {
            origin,
            status: CollectionStatus::Completed,
            collected_at: Some(collected_at),
            stations_upserted: 0,
            snapshots_inserted: 0,
            duplicates_skipped: 0,
            errors: 0,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, CollectionStatus::SkippedClosed { .. })
    }

    pub fn record_insert(&mut self, result: InsertResult) {
        match result {
            InsertResult::Inserted => self.snapshots_inserted += 1,
            InsertResult::Duplicate => self.duplicates_skipped += 1,
        }
    }
}
