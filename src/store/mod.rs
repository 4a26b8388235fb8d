//! The store collaborator and the Latest-Position View.
//!
//! [`PositionStore`] is the seam between the pipelines and durable storage.
//! [`MemoryStore`] keeps everything in process; [`DuckDbStore`] persists to
//! an embedded analytic database.

mod duckdb_store;
mod memory;

pub use duckdb_store::DuckDbStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::StoreError;
use crate::model::{PositionRecord, VehicleStatus};

/// Filters for the Latest-Position View.
///
/// The view first picks each vehicle's newest record, then applies these
/// filters to that record only. A vehicle whose newest record fails a filter
/// is absent from the result, whatever its older records say.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatestQuery {
    pub status: Option<VehicleStatus>,
    /// Keep only records observed strictly after this instant.
    pub observed_after: Option<DateTime<Utc>>,
}

impl LatestQuery {
    /// The unfiltered view: one row per vehicle ever seen.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: VehicleStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Keep vehicles whose newest record is less than `minutes` whole minutes
    /// old at `now`.
    pub fn active_within(mut self, now: DateTime<Utc>, minutes: i64) -> Self {
        self.observed_after = Some(now - Duration::minutes(minutes));
        self
    }

    pub fn matches(&self, record: &PositionRecord) -> bool {
        self.status.is_none_or(|s| record.status == s)
            && self.observed_after.is_none_or(|t| record.observed_at > t)
    }
}

/// Durable, queryable storage for position records.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Writes `batch` in a single transaction, keyed by
    /// `(vehicle_id, observed_at)`. Either the whole batch lands or none of
    /// it does. Returns the number of records written.
    async fn write_batch(&self, batch: &[PositionRecord]) -> Result<usize, StoreError>;

    /// The Latest-Position View, ordered by vehicle id.
    async fn latest_positions(
        &self,
        query: &LatestQuery,
    ) -> Result<Vec<PositionRecord>, StoreError>;

    /// Total number of stored records across all vehicles.
    async fn record_count(&self) -> Result<u64, StoreError>;
}
