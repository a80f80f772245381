use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::info;

use crate::records::{InsertResult, Snapshot, StationInfo, TrainingRow};
use crate::services::snapshot_store::SnapshotStore;

/// Postgres-backed [`SnapshotStore`].
///
/// Managed Postgres offerings usually sit behind pgBouncer in transaction
/// mode, which breaks named prepared statements; the statement cache is off
/// and every query is sent unprepared. Every query also runs under the
/// client-side `query_timeout`.
pub struct PgStore {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgStore {
    pub async fn connect(
        database_url: &str,
        acquire_timeout: Duration,
        query_timeout: Duration,
    ) -> Result<Self> {
        info!("Connecting to PostgreSQL");

        let options = PgConnectOptions::from_str(database_url)
            .context("Failed to parse the database connection string")?
            .statement_cache_capacity(0);

        let pool = PgPoolOptions::new()
            // one invocation per trigger; a couple of connections is plenty
            .max_connections(2)
            .min_connections(0)
            .acquire_timeout(acquire_timeout)
            .idle_timeout(Duration::from_secs(60))
            .connect_with(options)
            .await
            .context(
                "Failed to connect to PostgreSQL. Check DATABASE_URL and that the database is reachable.",
            )?;

        info!("Database connection established");
        Ok(Self {
            pool,
            query_timeout,
        })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations completed");
        Ok(())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SnapshotStore for PgStore {
    async fn upsert_station(&self, info: &StationInfo) -> Result<()> {
        let query = sqlx::query(
            r#"
            INSERT INTO station_info (station_id, name, capacity, lat, lon, updated_at)
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (station_id) DO UPDATE
                SET name       = EXCLUDED.name,
                    capacity   = EXCLUDED.capacity,
                    lat        = EXCLUDED.lat,
                    lon        = EXCLUDED.lon,
                    updated_at = now()
            "#,
        )
        .bind(&info.station_id)
        .bind(&info.name)
        .bind(info.capacity)
        .bind(info.lat)
        .bind(info.lon)
        .persistent(false);

        bounded(self.query_timeout, query.execute(&self.pool))
            .await
            .with_context(|| format!("upsert of station '{}' failed", info.station_id))?;

        Ok(())
    }

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<InsertResult> {
        let query = sqlx::query(
            r#"
            INSERT INTO snapshots
                (collected_at, station_id, bikes_available, bikes_disabled,
                 docks_available, docks_disabled, is_installed, is_renting,
                 is_returning, origin)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (collected_at, station_id) DO NOTHING
            "#,
        )
        .bind(snapshot.collected_at)
        .bind(&snapshot.station_id)
        .bind(snapshot.bikes_available)
        .bind(snapshot.bikes_disabled)
        .bind(snapshot.docks_available)
        .bind(snapshot.docks_disabled)
        .bind(snapshot.is_installed)
        .bind(snapshot.is_renting)
        .bind(snapshot.is_returning)
        .bind(snapshot.origin.as_str())
        .persistent(false);

        let done = bounded(self.query_timeout, query.execute(&self.pool))
            .await
            .with_context(|| format!("snapshot insert for station '{}' failed", snapshot.station_id))?;

        Ok(if done.rows_affected() == 0 {
            InsertResult::Duplicate
        } else {
            InsertResult::Inserted
        })
    }

    async fn training_rows(&self) -> Result<Vec<TrainingRow>> {
        let query = sqlx::query_as::<_, TrainingRow>(
            r#"
            SELECT s.collected_at, s.station_id, s.bikes_available, si.capacity
            FROM snapshots s
            LEFT JOIN station_info si USING (station_id)
            WHERE s.is_installed = TRUE
            ORDER BY s.collected_at
            "#,
        )
        .persistent(false);

        bounded(self.query_timeout, query.fetch_all(&self.pool))
            .await
            .context("Failed to load training snapshots")
    }

    async fn station_capacity(&self, station_id: &str) -> Result<Option<i32>> {
        let query =
            sqlx::query_as::<_, (Option<i32>,)>("SELECT capacity FROM station_info WHERE station_id = $1")
                .bind(station_id)
                .persistent(false);

        let row = bounded(self.query_timeout, query.fetch_optional(&self.pool))
            .await
            .context("Failed to look up station capacity")?;

        Ok(row.and_then(|(capacity,)| capacity))
    }

    async fn station_capacities(&self) -> Result<HashMap<String, i32>> {
        let query = sqlx::query_as::<_, (String, i32)>(
            "SELECT station_id, capacity FROM station_info WHERE capacity IS NOT NULL",
        )
        .persistent(false);

        let rows = bounded(self.query_timeout, query.fetch_all(&self.pool))
            .await
            .context("Failed to load station capacities")?;

        Ok(rows.into_iter().collect())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let query = sqlx::query("DELETE FROM snapshots WHERE collected_at < $1")
            .bind(cutoff)
            .persistent(false);

        let done = bounded(self.query_timeout, query.execute(&self.pool))
            .await
            .context("Failed to prune old snapshots")?;

        Ok(done.rows_affected())
    }
}

/// Fails a database call that has not completed within `limit`.
async fn bounded<T, E, F>(limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(anyhow!("database call timed out after {}s", limit.as_secs())),
    }
}
