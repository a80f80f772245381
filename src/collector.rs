//! One collection cycle: gate, fetch, upsert metadata, insert snapshots.

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::hours::{Clock, OperatingHours};
use crate::records::Origin;
use crate::services::feed_api::FeedSource;
use crate::services::snapshot_store::SnapshotStore;
use crate::stats::CollectionResult;

/// The skipped result when `clock` reads inside the closed window.
///
/// Callers that must acquire resources before [`collect`] (a database pool)
/// check this first, so a closed cycle touches neither the feed nor the store.
pub fn closed_gate<C>(clock: &C, hours: &OperatingHours, origin: Origin) -> Option<CollectionResult>
where
    C: Clock + ?Sized,
{
    let now = clock.now_utc();
    if !hours.is_closed(now) {
        return None;
    }
    let local_time = now.with_timezone(&hours.timezone).time();
    info!(
        local_time = %local_time.format("%H:%M"),
        closed_from = %hours.closed_from.format("%H:%M"),
        closed_until = %hours.closed_until.format("%H:%M"),
        "Outside operating hours, skipping collection"
    );
    Some(CollectionResult::skipped(origin, local_time))
}

/// Runs a single cycle for `origin`.
///
/// Inside the closed window this returns immediately without touching the feed
/// or the store. Otherwise every station is written independently: a failed
/// write is logged and counted, and the cycle moves on. Only a missing or empty
/// station-status payload fails the whole cycle.
#[tracing::instrument(skip(feed, store, clock, hours, origin), fields(origin = %origin))]
pub async fn collect<F, S, C>(
    feed: &F,
    store: &S,
    clock: &C,
    hours: &OperatingHours,
    origin: Origin,
) -> Result<CollectionResult>
where
    F: FeedSource + ?Sized,
    S: SnapshotStore + ?Sized,
    C: Clock + ?Sized,
{
    let now = clock.now_utc();
    if let Some(skipped) = closed_gate(clock, hours, origin) {
        return Ok(skipped);
    }

    let status = feed.station_status().await?;
    if status.data.stations.is_empty() {
        bail!("station_status returned no stations");
    }

    // The feed tick, not wall-clock time, keys the rows so that overlapping
    // triggers collapse onto the same snapshot.
    let collected_at = status.last_updated_at().unwrap_or_else(|| {
        warn!("station_status has no last_updated, using the current time");
        now
    });
    info!(
        collected_at = %collected_at.to_rfc3339(),
        stations = status.data.stations.len(),
        "Feed status received"
    );

    let info_stations = match feed.station_information().await {
        Ok(info) => info.data.stations,
        Err(e) => {
            warn!(error = %e, "station_information unavailable, skipping metadata upsert");
            Vec::new()
        }
    };

    let mut result = CollectionResult::started(origin, collected_at);

    for station in info_stations.iter().filter(|s| !s.station_id.is_empty()) {
        match store.upsert_station(&station.to_record()).await {
            Ok(()) => result.stations_upserted += 1,
            Err(e) => {
                warn!(station_id = %station.station_id, error = %e, "Station upsert failed");
                result.errors += 1;
            }
        }
    }

    for station in status.data.stations.iter().filter(|s| !s.station_id.is_empty()) {
        let snapshot = station.to_snapshot(collected_at, origin);
        match store.insert_snapshot(&snapshot).await {
            Ok(outcome) => result.record_insert(outcome),
            Err(e) => {
                warn!(station_id = %station.station_id, error = %e, "Snapshot insert failed");
                result.errors += 1;
            }
        }
    }

    info!(
        upserted = result.stations_upserted,
        inserted = result.snapshots_inserted,
        duplicates = result.duplicates_skipped,
        errors = result.errors,
        "Collection finished"
    );

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hours::FixedClock;
    use crate::infra::memory::MemoryStore;
    use crate::services::feed_api::{
        GbfsEnvelope, StationInformation, StationInformationFeed, StationList, StationStatus,
        StationStatusFeed,
    };
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedFeed {
        last_updated: Option<i64>,
        info: Vec<StationInformation>,
        status: Vec<StationStatus>,
        info_fails: bool,
        calls: AtomicUsize,
    }

    impl ScriptedFeed {
        fn new(info: Vec<StationInformation>, status: Vec<StationStatus>) -> Self {
            Self {
                last_updated: Some(1_741_795_200),
                info,
                status,
                info_fails: false,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl FeedSource for ScriptedFeed {
        async fn station_information(&self) -> Result<StationInformationFeed> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.info_fails {
                bail!("connection reset");
            }
            Ok(GbfsEnvelope {
                last_updated: self.last_updated,
                ttl: None,
                data: StationList {
                    stations: self.info.clone(),
                },
            })
        }

        async fn station_status(&self) -> Result<StationStatusFeed> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GbfsEnvelope {
                last_updated: self.last_updated,
                ttl: None,
                data: StationList {
                    stations: self.status.clone(),
                },
            })
        }
    }

    fn info(id: &str) -> StationInformation {
        StationInformation {
            station_id: id.into(),
            name: format!("Station {id}"),
            capacity: Some(20),
            lat: None,
            lon: None,
        }
    }

    fn status(id: &str, bikes: i32) -> StationStatus {
        StationStatus {
            station_id: id.into(),
            num_bikes_available: bikes,
            num_bikes_disabled: 0,
            num_docks_available: 20 - bikes,
            num_docks_disabled: 0,
            is_installed: true,
            is_renting: true,
            is_returning: true,
        }
    }

    fn open_clock() -> FixedClock {
        // 12:00 in Mexico City
        FixedClock(Utc.with_ymd_and_hms(2025, 3, 12, 18, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_closed_window_does_nothing() {
        let feed = ScriptedFeed::new(vec![info("059")], vec![status("059", 3)]);
        let store = MemoryStore::new();
        // 02:00 in Mexico City
        let clock = FixedClock(Utc.with_ymd_and_hms(2025, 3, 12, 8, 0, 0).unwrap());

        let result = collect(&feed, &store, &clock, &OperatingHours::default(), Origin::Manual)
            .await
            .unwrap();

        assert!(result.is_skipped());
        assert_eq!(feed.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn test_closed_gate_reports_local_time() {
        let hours = OperatingHours::default();
        let closed = FixedClock(Utc.with_ymd_and_hms(2025, 3, 12, 8, 0, 0).unwrap());

        let skipped = closed_gate(&closed, &hours, Origin::ScheduledPrimary).unwrap();
        assert!(skipped.is_skipped());
        assert_eq!(skipped.origin, Origin::ScheduledPrimary);
        assert_eq!(
            serde_json::to_value(&skipped).unwrap()["status"]["local_time"],
            "02:00"
        );
        assert!(closed_gate(&open_clock(), &hours, Origin::Manual).is_none());
    }

    #[tokio::test]
    async fn test_uses_feed_timestamp_and_origin() {
        let feed = ScriptedFeed::new(vec![info("059")], vec![status("059", 3)]);
        let store = MemoryStore::new();

        let result = collect(
            &feed,
            &store,
            &open_clock(),
            &OperatingHours::default(),
            Origin::ScheduledBackup,
        )
        .await
        .unwrap();

        let expected: DateTime<Utc> = DateTime::from_timestamp(1_741_795_200, 0).unwrap();
        assert_eq!(result.collected_at, Some(expected));
        let snaps = store.snapshots();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].collected_at, expected);
        assert_eq!(snaps[0].origin, Origin::ScheduledBackup);
    }

    #[tokio::test]
    async fn test_missing_last_updated_falls_back_to_clock() {
        let mut feed = ScriptedFeed::new(vec![info("059")], vec![status("059", 3)]);
        feed.last_updated = None;
        let store = MemoryStore::new();
        let clock = open_clock();

        let result = collect(&feed, &store, &clock, &OperatingHours::default(), Origin::Manual)
            .await
            .unwrap();

        assert_eq!(result.collected_at, Some(clock.0));
    }

    #[tokio::test]
    async fn test_station_failure_is_isolated() {
        // "999" has status but no metadata, so its insert violates the FK.
        let feed = ScriptedFeed::new(
            vec![info("001"), info("002")],
            vec![status("001", 1), status("999", 4), status("002", 0)],
        );
        let store = MemoryStore::new();

        let result = collect(&feed, &store, &open_clock(), &OperatingHours::default(), Origin::Manual)
            .await
            .unwrap();

        assert_eq!(result.stations_upserted, 2);
        assert_eq!(result.snapshots_inserted, 2);
        assert_eq!(result.errors, 1);
        assert_eq!(store.snapshot_count(), 2);
    }

    #[tokio::test]
    async fn test_information_outage_is_not_fatal() {
        let mut feed = ScriptedFeed::new(vec![info("001")], vec![status("001", 1)]);
        let store = MemoryStore::new();
        store.upsert_station(&info("001").to_record()).await.unwrap();
        feed.info_fails = true;

        let result = collect(&feed, &store, &open_clock(), &OperatingHours::default(), Origin::Manual)
            .await
            .unwrap();

        assert_eq!(result.stations_upserted, 0);
        assert_eq!(result.snapshots_inserted, 1);
    }

    #[tokio::test]
    async fn test_empty_status_fails_cycle() {
        let feed = ScriptedFeed::new(vec![info("001")], vec![]);
        let store = MemoryStore::new();

        let result =
            collect(&feed, &store, &open_clock(), &OperatingHours::default(), Origin::Manual).await;

        assert!(result.is_err());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_repeat_cycle_counts_duplicates() {
        let feed = ScriptedFeed::new(vec![info("059")], vec![status("059", 3)]);
        let store = MemoryStore::new();
        let hours = OperatingHours::default();

        collect(&feed, &store, &open_clock(), &hours, Origin::ScheduledPrimary)
            .await
            .unwrap();
        let again = collect(&feed, &store, &open_clock(), &hours, Origin::ScheduledBackup)
            .await
            .unwrap();

        assert_eq!(again.snapshots_inserted, 0);
        assert_eq!(again.duplicates_skipped, 1);
        assert_eq!(store.snapshot_count(), 1);
        assert_eq!(store.snapshots()[0].origin, Origin::ScheduledPrimary);
    }

    #[tokio::test]
    async fn test_entries_without_id_are_ignored() {
        let feed = ScriptedFeed::new(vec![info(""), info("7")], vec![status("", 2), status("7", 2)]);
        let store = MemoryStore::new();

        let result = collect(&feed, &store, &open_clock(), &OperatingHours::default(), Origin::Manual)
            .await
            .unwrap();

        assert_eq!(result.stations_upserted, 1);
        assert_eq!(result.snapshots_inserted, 1);
        assert_eq!(result.errors, 0);
    }
}
