//! Persisted records: station metadata and per-tick availability snapshots.

use std::fmt;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Which external trigger produced a snapshot.
///
/// The entry point decides the origin; nothing below it inspects transport
/// metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    ScheduledPrimary,
    ScheduledBackup,
    Manual,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::ScheduledPrimary => "scheduled-primary",
            Origin::ScheduledBackup => "scheduled-backup",
            Origin::Manual => "manual",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Station metadata, one row per `station_id`. `updated_at` is assigned by the
/// store on every upsert, so it is not part of what callers write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationInfo {
    pub station_id: String,
    pub name: String,
    pub capacity: Option<i32>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

/// One observation of a station at one feed tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub collected_at: DateTime<Utc>,
    pub station_id: String,
    pub bikes_available: i32,
    pub bikes_disabled: i32,
    pub docks_available: i32,
    pub docks_disabled: i32,
    pub is_installed: bool,
    pub is_renting: bool,
    pub is_returning: bool,
    pub origin: Origin,
}

/// Outcome of a snapshot write. A key conflict means another trigger already
/// collected this tick, which is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    Inserted,
    Duplicate,
}

/// Historical row the trainer consumes: an installed station's snapshot joined
/// with its current metadata.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TrainingRow {
    pub collected_at: DateTime<Utc>,
    pub station_id: String,
    pub bikes_available: i32,
    pub capacity: Option<i32>,
}
