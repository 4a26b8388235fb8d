//! Error taxonomy for the ingestion and detection engine.

use std::time::Duration;

/// The feed could not be fetched or decoded. Transient: the current tick is
/// abandoned and the next one proceeds normally.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid feed url: {0}")]
    InvalidUrl(String),

    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed payload is not a valid GTFS-RT message: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Failures reported by a [`PositionStore`](crate::store::PositionStore)
/// backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duckdb: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// A backend-specific failure that does not map onto a driver error.
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Some chunks of a tick's fetch could not be written. The remaining
    /// chunks were still attempted.
    #[error("{failed_batches} of {total_batches} batches not stored ({failed_records} records)")]
    PartialStorage {
        failed_batches: usize,
        total_batches: usize,
        failed_records: usize,
    },

    /// Missing or invalid settings. Raised before anything is scheduled.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A periodic task did not drain within its timeout and was aborted.
    #[error("{task} did not drain within {timeout:?}; forced cancellation")]
    SchedulerShutdown { task: &'static str, timeout: Duration },
}
