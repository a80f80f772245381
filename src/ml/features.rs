//! Feature encoding shared by training and prediction.
//!
//! Any change here changes what the model sees, so the encoder travels inside
//! the model artifact and both sides call the same methods.

use std::f64::consts::TAU;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ml::metrics::median;

/// Encoding for a station the model never saw.
pub const UNKNOWN_STATION: i32 = -1;

pub const FEATURE_NAMES: [&str; 7] = [
    "station_enc",
    "hour_sin",
    "hour_cos",
    "dow_sin",
    "dow_cos",
    "is_weekend",
    "capacity",
];

pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeSlotError {
    #[error("hour must be in 0..=23, got {0}")]
    Hour(u32),
    #[error("day of week must be in 0..=6 (0 = Monday), got {0}")]
    DayOfWeek(u32),
}

/// Hour of day and day of week (Monday = 0) in the feed's local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    hour: u32,
    dow: u32,
}

impl TimeSlot {
    pub fn new(hour: u32, dow: u32) -> Result<Self, TimeSlotError> {
        if hour > 23 {
            return Err(TimeSlotError::Hour(hour));
        }
        if dow > 6 {
            return Err(TimeSlotError::DayOfWeek(dow));
        }
        Ok(Self { hour, dow })
    }

    pub fn of<Z: TimeZone>(local: &DateTime<Z>) -> Self {
        Self {
            hour: local.hour(),
            dow: local.weekday().num_days_from_monday(),
        }
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn dow(&self) -> u32 {
        self.dow
    }

    pub fn is_weekend(&self) -> bool {
        self.dow >= 5
    }
}

/// Maps `value` onto the unit circle so that the ends of the period are
/// neighbours: `(sin, cos)` of `2π·value/period`.
pub fn cyclical(value: u32, period: u32) -> (f64, f64) {
    let angle = TAU * f64::from(value) / f64::from(period);
    (angle.sin(), angle.cos())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    pub station_enc: i32,
    pub hour_sin: f64,
    pub hour_cos: f64,
    pub dow_sin: f64,
    pub dow_cos: f64,
    pub is_weekend: bool,
    pub capacity: f64,
}

impl FeatureVector {
    /// Row in [`FEATURE_NAMES`] order, in the precision the model consumes.
    pub fn to_row(&self) -> Vec<f32> {
        vec![
            self.station_enc as f32,
            self.hour_sin as f32,
            self.hour_cos as f32,
            self.dow_sin as f32,
            self.dow_cos as f32,
            if self.is_weekend { 1.0 } else { 0.0 },
            self.capacity as f32,
        ]
    }
}

/// State fixed at training time: the station table (sorted, so an id's index
/// is its encoding), the capacity used when a station has none, and the zone
/// timestamps are read in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEncoder {
    timezone: Tz,
    stations: Vec<String>,
    default_capacity: f64,
}

impl FeatureEncoder {
    /// Builds the station table from the training ids. The capacity default is
    /// the median of the known capacities, or zero when none are known.
    pub fn fit<'a, I, C>(timezone: Tz, station_ids: I, capacities: C) -> Self
    where
        I: IntoIterator<Item = &'a str>,
        C: IntoIterator<Item = i32>,
    {
        let mut stations: Vec<String> = station_ids.into_iter().map(str::to_string).collect();
        stations.sort();
        stations.dedup();

        let known: Vec<f64> = capacities.into_iter().map(f64::from).collect();
        let default_capacity = median(&known).unwrap_or(0.0);

        Self {
            timezone,
            stations,
            default_capacity,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn stations(&self) -> &[String] {
        &self.stations
    }

    pub fn default_capacity(&self) -> f64 {
        self.default_capacity
    }

    pub fn is_known(&self, station_id: &str) -> bool {
        self.station_enc(station_id) != UNKNOWN_STATION
    }

    pub fn station_enc(&self, station_id: &str) -> i32 {
        self.stations
            .binary_search_by(|s| s.as_str().cmp(station_id))
            .map(|idx| idx as i32)
            .unwrap_or(UNKNOWN_STATION)
    }

    /// The local slot a UTC instant falls in.
    pub fn slot_at(&self, at: DateTime<Utc>) -> TimeSlot {
        TimeSlot::of(&at.with_timezone(&self.timezone))
    }

    pub fn encode(&self, station_id: &str, at: DateTime<Utc>, capacity: Option<i32>) -> FeatureVector {
        self.encode_slot(station_id, self.slot_at(at), capacity)
    }

    pub fn encode_slot(&self, station_id: &str, slot: TimeSlot, capacity: Option<i32>) -> FeatureVector {
        let (hour_sin, hour_cos) = cyclical(slot.hour(), 24);
        let (dow_sin, dow_cos) = cyclical(slot.dow(), 7);

        FeatureVector {
            station_enc: self.station_enc(station_id),
            hour_sin,
            hour_cos,
            dow_sin,
            dow_cos,
            is_weekend: slot.is_weekend(),
            capacity: capacity.map(f64::from).unwrap_or(self.default_capacity),
        }
    }
}
