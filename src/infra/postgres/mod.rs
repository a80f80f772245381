//! sqlx implementation of [`SnapshotStore`](crate::services::snapshot_store::SnapshotStore).

mod store;

pub use store::PgStore;
