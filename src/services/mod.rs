pub mod feed_api;
pub mod snapshot_store;
