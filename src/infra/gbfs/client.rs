use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::fetch::{HttpClient, fetch_json};
use crate::services::feed_api::{FeedSource, StationInformationFeed, StationStatusFeed};

/// Reads a GBFS system rooted at `base_url`
/// (e.g. `https://gbfs.mex.lyftbikes.com/gbfs/en`).
pub struct GbfsClient<C> {
    http: C,
    base_url: String,
}

impl<C: HttpClient> GbfsClient<C> {
    pub fn new(http: C, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, file: &str) -> String {
        format!("{}/{}.json", self.base_url, file)
    }
}

#[async_trait]
impl<C: HttpClient> FeedSource for GbfsClient<C> {
    async fn station_information(&self) -> Result<StationInformationFeed> {
        let feed: StationInformationFeed =
            fetch_json(&self.http, &self.url("station_information")).await?;
        debug!(stations = feed.data.stations.len(), "station_information fetched");
        Ok(feed)
    }

    async fn station_status(&self) -> Result<StationStatusFeed> {
        let feed: StationStatusFeed = fetch_json(&self.http, &self.url("station_status")).await?;
        debug!(
            stations = feed.data.stations.len(),
            last_updated = ?feed.last_updated,
            "station_status fetched"
        );
        Ok(feed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;
    use std::time::Duration;

    #[test]
    fn test_urls_are_joined_without_double_slash() {
        let client = GbfsClient::new(
            BasicClient::new(Duration::from_secs(1)).unwrap(),
            "https://gbfs.example.org/gbfs/en/",
        );
        assert_eq!(
            client.url("station_status"),
            "https://gbfs.example.org/gbfs/en/station_status.json"
        );
    }
}
