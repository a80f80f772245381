//! Scoring a loaded model, for one station or for the whole live feed.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::ml::artifact::ModelArtifact;
use crate::ml::features::{FeatureVector, TimeSlot, TimeSlotError};
use crate::ml::tier::AvailabilityTier;
use crate::services::feed_api::StationStatusFeed;

/// Validated input for single-station mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleStationQuery {
    pub station_id: String,
    pub slot: TimeSlot,
}

impl SingleStationQuery {
    pub fn new(station_id: impl Into<String>, hour: u32, dow: u32) -> Result<Self, TimeSlotError> {
        Ok(Self {
            station_id: station_id.into(),
            slot: TimeSlot::new(hour, dow)?,
        })
    }
}

/// Validated input for report mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportQuery {
    /// Print only the first `top` rows; all stations when `None`.
    pub top: Option<usize>,
}

/// The two things `predict` can do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictMode {
    Single(SingleStationQuery),
    Report(ReportQuery),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub station_id: String,
    pub hour: u32,
    pub dow: u32,
    pub probability: f64,
    pub tier: AvailabilityTier,
    /// False when the station was scored with the unknown-station encoding.
    pub known_station: bool,
}

pub fn predict_single(
    artifact: &ModelArtifact,
    query: &SingleStationQuery,
    capacity: Option<i32>,
) -> Prediction {
    let vector = artifact
        .encoder
        .encode_slot(&query.station_id, query.slot, capacity);
    let probability = artifact.predict_one(&vector);

    Prediction {
        station_id: query.station_id.clone(),
        hour: query.slot.hour(),
        dow: query.slot.dow(),
        probability,
        tier: AvailabilityTier::from_probability(probability),
        known_station: artifact.encoder.is_known(&query.station_id),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub station_id: String,
    pub bikes_now: i32,
    pub probability: f64,
    pub tier: AvailabilityTier,
    pub known_station: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailabilityReport {
    pub as_of: DateTime<Tz>,
    pub hour: u32,
    pub dow: u32,
    /// Sorted by descending probability, then ascending station id.
    pub rows: Vec<ReportRow>,
}

impl AvailabilityReport {
    pub fn unknown_stations(&self) -> usize {
        self.rows.iter().filter(|r| !r.known_station).count()
    }
}

/// Scores every station in a live status payload at the slot of the feed's
/// own timestamp (`fallback_now` when the feed has none).
pub fn build_report(
    artifact: &ModelArtifact,
    status: &StationStatusFeed,
    capacities: &HashMap<String, i32>,
    fallback_now: DateTime<Utc>,
) -> AvailabilityReport {
    let encoder = &artifact.encoder;
    let at = status.last_updated_at().unwrap_or(fallback_now);
    let slot = encoder.slot_at(at);

    let stations: Vec<_> = status
        .data
        .stations
        .iter()
        .filter(|s| !s.station_id.is_empty())
        .collect();
    let vectors: Vec<FeatureVector> = stations
        .iter()
        .map(|s| encoder.encode_slot(&s.station_id, slot, capacities.get(&s.station_id).copied()))
        .collect();
    let probabilities = artifact.predict_proba(&vectors);

    let mut rows: Vec<ReportRow> = stations
        .iter()
        .zip(probabilities)
        .map(|(s, probability)| ReportRow {
            station_id: s.station_id.clone(),
            bikes_now: s.num_bikes_available,
            probability,
            tier: AvailabilityTier::from_probability(probability),
            known_station: encoder.is_known(&s.station_id),
        })
        .collect();
    sort_rows(&mut rows);

    AvailabilityReport {
        as_of: at.with_timezone(&encoder.timezone()),
        hour: slot.hour(),
        dow: slot.dow(),
        rows,
    }
}

fn sort_rows(rows: &mut [ReportRow]) {
    rows.sort_by(|a, b| {
        b.probability
            .partial_cmp(&a.probability)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.station_id.cmp(&b.station_id))
    });
}
