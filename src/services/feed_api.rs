//! Trait and wire types for a GBFS station feed.
//!
//! Only the two endpoints the pipeline reads are modelled:
//! `station_information.json` (slow-changing metadata) and
//! `station_status.json` (per-station counts plus the feed-level
//! `last_updated` tick).

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::records::{Origin, Snapshot, StationInfo};

/// Common GBFS envelope: `{ "last_updated": ..., "ttl": ..., "data": { "stations": [...] } }`.
#[derive(Debug, Clone, Deserialize)]
pub struct GbfsEnvelope<T> {
    /// POSIX seconds of the feed's last refresh.
    pub last_updated: Option<i64>,
    pub ttl: Option<u32>,
    pub data: StationList<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationList<T> {
    #[serde(default = "Vec::new")]
    pub stations: Vec<T>,
}

pub type StationInformationFeed = GbfsEnvelope<StationInformation>;
pub type StationStatusFeed = GbfsEnvelope<StationStatus>;

impl<T> GbfsEnvelope<T> {
    /// The feed tick as a timestamp, if the feed reported a valid one.
    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        self.last_updated
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationInformation {
    #[serde(default, deserialize_with = "lenient_id")]
    pub station_id: String,
    #[serde(default)]
    pub name: String,
    pub capacity: Option<i32>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl StationInformation {
    pub fn to_record(&self) -> StationInfo {
        StationInfo {
            station_id: self.station_id.clone(),
            name: self.name.clone(),
            capacity: self.capacity,
            lat: self.lat,
            lon: self.lon,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationStatus {
    #[serde(default, deserialize_with = "lenient_id")]
    pub station_id: String,
    #[serde(default)]
    pub num_bikes_available: i32,
    #[serde(default)]
    pub num_bikes_disabled: i32,
    #[serde(default)]
    pub num_docks_available: i32,
    #[serde(default)]
    pub num_docks_disabled: i32,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub is_installed: bool,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub is_renting: bool,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub is_returning: bool,
}

impl StationStatus {
    /// Builds the row for this tick. Negative counters from a misbehaving feed
    /// are clamped to zero.
    pub fn to_snapshot(&self, collected_at: DateTime<Utc>, origin: Origin) -> Snapshot {
        Snapshot {
            collected_at,
            station_id: self.station_id.clone(),
            bikes_available: self.num_bikes_available.max(0),
            bikes_disabled: self.num_bikes_disabled.max(0),
            docks_available: self.num_docks_available.max(0),
            docks_disabled: self.num_docks_disabled.max(0),
            is_installed: self.is_installed,
            is_renting: self.is_renting,
            is_returning: self.is_returning,
            origin,
        }
    }
}

/// Station ids arrive as strings in GBFS v2 but as numbers in some v1 feeds.
fn lenient_id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// Flags are booleans in GBFS v2 and `0`/`1` in v1.
fn lenient_flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(match value {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_i64().is_some_and(|v| v != 0),
        _ => false,
    })
}

/// Abstraction over a GBFS provider.
#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    async fn station_information(&self) -> Result<StationInformationFeed>;

    async fn station_status(&self) -> Result<StationStatusFeed>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_v2_status() {
        let json = r#"{
            "last_updated": 1741795200,
            "ttl": 60,
            "data": { "stations": [
                { "station_id": "059", "num_bikes_available": 3, "num_bikes_disabled": 1,
                  "num_docks_available": 12, "num_docks_disabled": 0,
                  "is_installed": true, "is_renting": true, "is_returning": false }
            ]}
        }"#;

        let feed: StationStatusFeed = serde_json::from_str(json).unwrap();
        assert_eq!(feed.data.stations.len(), 1);
        let s = &feed.data.stations[0];
        assert_eq!(s.station_id, "059");
        assert_eq!(s.num_bikes_available, 3);
        assert!(s.is_renting);
        assert!(!s.is_returning);
        assert_eq!(
            feed.last_updated_at().unwrap(),
            DateTime::<Utc>::from_timestamp(1741795200, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_v1_numeric_ids_and_flags() {
        let json = r#"{
            "last_updated": 1741795200,
            "data": { "stations": [
                { "station_id": 59, "num_bikes_available": 2, "is_installed": 1, "is_renting": 0 }
            ]}
        }"#;

        let feed: StationStatusFeed = serde_json::from_str(json).unwrap();
        let s = &feed.data.stations[0];
        assert_eq!(s.station_id, "59");
        assert!(s.is_installed);
        assert!(!s.is_renting);
        assert!(!s.is_returning);
        assert_eq!(s.num_docks_available, 0);
    }

    #[test]
    fn test_missing_station_id_becomes_empty() {
        let json = r#"{ "data": { "stations": [ { "name": "No id" } ] } }"#;
        let feed: StationInformationFeed = serde_json::from_str(json).unwrap();
        assert!(feed.data.stations[0].station_id.is_empty());
        assert!(feed.last_updated_at().is_none());
    }

    #[test]
    fn test_negative_counts_are_clamped() {
        let status = StationStatus {
            station_id: "1".into(),
            num_bikes_available: -2,
            num_bikes_disabled: 0,
            num_docks_available: 5,
            num_docks_disabled: -1,
            is_installed: true,
            is_renting: true,
            is_returning: true,
        };
        let snap = status.to_snapshot(Utc::now(), Origin::Manual);
        assert_eq!(snap.bikes_available, 0);
        assert_eq!(snap.docks_disabled, 0);
        assert_eq!(snap.docks_available, 5);
    }
}
