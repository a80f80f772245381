mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

/// Issues a single GET and decodes the JSON body.
///
/// Non-2xx responses are errors. There is no retry here: a failed tick is
/// simply picked up by the next scheduled invocation.
pub async fn fetch_json<C: HttpClient, T: DeserializeOwned>(client: &C, url: &str) -> Result<T> {
    let req = reqwest::Request::new(
        reqwest::Method::GET,
        url.parse().with_context(|| format!("invalid feed URL '{url}'"))?,
    );

    let resp = client
        .execute(req)
        .await
        .with_context(|| format!("request to {url} failed"))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(anyhow::anyhow!("{url} returned status {status}: {body}"));
    }

    resp.json::<T>()
        .await
        .with_context(|| format!("failed to decode JSON from {url}"))
}
