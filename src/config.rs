//! Runtime configuration from the environment (and `.env`).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;

use crate::hours::OperatingHours;

pub const DEFAULT_GBFS_BASE_URL: &str = "https://gbfs.mex.lyftbikes.com/gbfs/en";
pub const DEFAULT_MODEL_PATH: &str = "model/availability_model.json";

#[derive(Debug, Clone)]
pub struct Config {
    /// `DATABASE_URL`, falling back to `SUPABASE_DB_URL`.
    pub database_url: Option<String>,
    pub gbfs_base_url: String,
    pub hours: OperatingHours,
    pub http_timeout: Duration,
    pub db_acquire_timeout: Duration,
    /// Deadline for each individual query.
    pub db_query_timeout: Duration,
    pub model_path: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup, so tests need not touch
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = OperatingHours::default();

        let timezone = match get("FEED_TIMEZONE") {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|e| anyhow::anyhow!("Invalid FEED_TIMEZONE '{name}': {e}"))?,
            None => defaults.timezone,
        };

        let closed_from = match get("CLOSED_FROM") {
            Some(v) => parse_hhmm(&v).context("Invalid CLOSED_FROM value (use HH:MM)")?,
            None => defaults.closed_from,
        };
        let closed_until = match get("CLOSED_UNTIL") {
            Some(v) => parse_hhmm(&v).context("Invalid CLOSED_UNTIL value (use HH:MM)")?,
            None => defaults.closed_until,
        };

        Ok(Config {
            database_url: get("DATABASE_URL").or_else(|| get("SUPABASE_DB_URL")),
            gbfs_base_url: get("GBFS_BASE_URL").unwrap_or_else(|| DEFAULT_GBFS_BASE_URL.to_string()),
            hours: OperatingHours::new(timezone, closed_from, closed_until),
            http_timeout: Duration::from_secs(
                get("HTTP_TIMEOUT_SECS")
                    .unwrap_or_else(|| "20".to_string())
                    .parse()
                    .context("Invalid HTTP_TIMEOUT_SECS value")?,
            ),
            db_acquire_timeout: Duration::from_secs(
                get("DB_ACQUIRE_TIMEOUT_SECS")
                    .unwrap_or_else(|| "10".to_string())
                    .parse()
                    .context("Invalid DB_ACQUIRE_TIMEOUT_SECS value")?,
            ),
            db_query_timeout: Duration::from_secs(
                get("DB_QUERY_TIMEOUT_SECS")
                    .unwrap_or_else(|| "30".to_string())
                    .parse()
                    .context("Invalid DB_QUERY_TIMEOUT_SECS value")?,
            ),
            model_path: get("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
        })
    }

    /// The connection string, or an actionable error for commands that cannot
    /// run without a database.
    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url.as_deref().context(
            "DATABASE_URL (or SUPABASE_DB_URL) is required for this command but is not set",
        )
    }
}

fn parse_hhmm(value: &str) -> Result<NaiveTime> {
    Ok(NaiveTime::parse_from_str(value.trim(), "%H:%M")?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]).unwrap();
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.gbfs_base_url, DEFAULT_GBFS_BASE_URL);
        assert_eq!(cfg.hours, OperatingHours::default());
        assert_eq!(cfg.http_timeout, Duration::from_secs(20));
        assert_eq!(cfg.db_acquire_timeout, Duration::from_secs(10));
        assert_eq!(cfg.db_query_timeout, Duration::from_secs(30));
        assert_eq!(cfg.model_path, PathBuf::from(DEFAULT_MODEL_PATH));
    }

    #[test]
    fn test_missing_database_url_is_actionable() {
        let cfg = config(&[]).unwrap();
        let err = cfg.require_database_url().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_supabase_fallback_and_precedence() {
        let cfg = config(&[("SUPABASE_DB_URL", "postgres://b")]).unwrap();
        assert_eq!(cfg.require_database_url().unwrap(), "postgres://b");

        let cfg = config(&[("DATABASE_URL", "postgres://a"), ("SUPABASE_DB_URL", "postgres://b")]).unwrap();
        assert_eq!(cfg.require_database_url().unwrap(), "postgres://a");
    }

    #[test]
    fn test_window_and_timezone_overrides() {
        let cfg = config(&[
            ("FEED_TIMEZONE", "America/New_York"),
            ("CLOSED_FROM", "23:00"),
            ("CLOSED_UNTIL", "06:00"),
        ])
        .unwrap();
        assert_eq!(cfg.hours.timezone, chrono_tz::America::New_York);
        assert_eq!(cfg.hours.closed_from, NaiveTime::from_hms_opt(23, 0, 0).unwrap());
        assert_eq!(cfg.hours.closed_until, NaiveTime::from_hms_opt(6, 0, 0).unwrap());
    }

    #[test]
    fn test_query_timeout_override() {
        let cfg = config(&[("DB_QUERY_TIMEOUT_SECS", "5")]).unwrap();
        assert_eq!(cfg.db_query_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(config(&[("FEED_TIMEZONE", "Mars/Olympus")]).is_err());
        assert!(config(&[("CLOSED_FROM", "25:00")]).is_err());
        assert!(config(&[("HTTP_TIMEOUT_SECS", "soon")]).is_err());
        assert!(config(&[("DB_QUERY_TIMEOUT_SECS", "-1")]).is_err());
    }
}
