use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{LatestQuery, PositionStore};
use crate::error::StoreError;
use crate::model::PositionRecord;

/// In-process store. Records are ordered by `(vehicle_id, observed_at)`, so
/// each vehicle's newest record is the last of its run.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<(String, DateTime<Utc>), PositionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn write_batch(&self, batch: &[PositionRecord]) -> Result<usize, StoreError> {
        let mut records = self.records.write().await;
        for record in batch {
            records
                .entry((record.vehicle_id.clone(), record.observed_at))
                .or_insert_with(|| record.clone());
        }
        Ok(batch.len())
    }

    async fn latest_positions(
        &self,
        query: &LatestQuery,
    ) -> Result<Vec<PositionRecord>, StoreError> {
        let records = self.records.read().await;

        let mut latest: Vec<&PositionRecord> = Vec::new();
        for record in records.values() {
            match latest.last_mut() {
                Some(last) if last.vehicle_id == record.vehicle_id => *last = record,
                _ => latest.push(record),
            }
        }

        Ok(latest
            .into_iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect())
    }

    async fn record_count(&self) -> Result<u64, StoreError> {
        Ok(self.records.read().await.len() as u64)
    }
}
