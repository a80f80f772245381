//! HTTP implementation of [`FeedSource`](crate::services::feed_api::FeedSource).

mod client;

pub use client::GbfsClient;
