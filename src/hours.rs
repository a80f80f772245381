//! Wall-clock access and the nightly closure gate.
//!
//! The bikeshare system is administratively closed for part of the night.
//! Rows observed then say nothing about demand, so both collection and
//! training skip that window.

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Source of "now". Injected so the gate and the encoder can be pinned in tests.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always returns the same instant.
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

/// The feed's local time zone plus its closed interval `[closed_from, closed_until)`.
///
/// The interval may wrap past midnight (`23:00`–`05:00`). Equal bounds mean the
/// system never closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingHours {
    pub timezone: Tz,
    pub closed_from: NaiveTime,
    pub closed_until: NaiveTime,
}

impl OperatingHours {
    pub fn new(timezone: Tz, closed_from: NaiveTime, closed_until: NaiveTime) -> Self {
        Self {
            timezone,
            closed_from,
            closed_until,
        }
    }

    pub fn is_closed(&self, ts: DateTime<Utc>) -> bool {
        let local = ts.with_timezone(&self.timezone).time();
        let (from, until) = (self.closed_from, self.closed_until);

        if from < until {
            from <= local && local < until
        } else if from > until {
            local >= from || local < until
        } else {
            false
        }
    }

    pub fn is_open(&self, ts: DateTime<Utc>) -> bool {
        !self.is_closed(ts)
    }
}

impl Default for OperatingHours {
    /// EcoBici (Mexico City) closes from 00:30 to 05:00 local time.
    fn default() -> Self {
        Self {
            timezone: chrono_tz::America::Mexico_City,
            closed_from: NaiveTime::from_hms_opt(0, 30, 0).unwrap_or_default(),
            closed_until: NaiveTime::from_hms_opt(5, 0, 0).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_local(hours: &OperatingHours, h: u32, m: u32) -> DateTime<Utc> {
        hours
            .timezone
            .with_ymd_and_hms(2025, 3, 12, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_default_window_boundaries() {
        let hours = OperatingHours::default();

        assert!(hours.is_open(at_local(&hours, 0, 29)));
        assert!(hours.is_closed(at_local(&hours, 0, 30)));
        assert!(hours.is_closed(at_local(&hours, 3, 0)));
        assert!(hours.is_closed(at_local(&hours, 4, 59)));
        assert!(hours.is_open(at_local(&hours, 5, 0)));
        assert!(hours.is_open(at_local(&hours, 23, 59)));
    }

    #[test]
    fn test_window_uses_local_time_not_utc() {
        let hours = OperatingHours::default();
        // 08:00 UTC is 02:00 in Mexico City (UTC-6, no DST since 2022).
        let ts = Utc.with_ymd_and_hms(2025, 3, 12, 8, 0, 0).unwrap();
        assert!(hours.is_closed(ts));
    }

    #[test]
    fn test_window_wrapping_midnight() {
        let hours = OperatingHours::new(
            chrono_tz::UTC,
            NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(5, 0, 0).unwrap(),
        );

        assert!(hours.is_open(at_local(&hours, 22, 59)));
        assert!(hours.is_closed(at_local(&hours, 23, 0)));
        assert!(hours.is_closed(at_local(&hours, 0, 0)));
        assert!(hours.is_closed(at_local(&hours, 4, 59)));
        assert!(hours.is_open(at_local(&hours, 5, 0)));
    }

    #[test]
    fn test_equal_bounds_never_close() {
        let t = NaiveTime::from_hms_opt(3, 0, 0).unwrap();
        let hours = OperatingHours::new(chrono_tz::UTC, t, t);
        assert!(hours.is_open(at_local(&hours, 3, 0)));
    }

    #[test]
    fn test_fixed_clock_is_pinned() {
        let instant = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let clock = FixedClock(instant);
        assert_eq!(clock.now_utc(), instant);
        assert_eq!(clock.now_utc(), instant);
    }
}
