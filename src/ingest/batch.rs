use std::num::NonZeroUsize;

use crate::error::MonitorError;
use crate::model::PositionRecord;

/// Splits a fetched snapshot into fixed-size groups, one store transaction
/// each. The last group may be shorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionBatcher {
    batch_size: NonZeroUsize,
}

impl PositionBatcher {
    pub const DEFAULT_BATCH_SIZE: usize = 100;

    pub fn new(batch_size: usize) -> Result<Self, MonitorError> {
        NonZeroUsize::new(batch_size)
            .map(|batch_size| Self { batch_size })
            .ok_or_else(|| MonitorError::Configuration("batch size must be at least 1".to_string()))
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.get()
    }

    pub fn batches<'a>(
        &self,
        records: &'a [PositionRecord],
    ) -> std::slice::Chunks<'a, PositionRecord> {
        records.chunks(self.batch_size.get())
    }
}

impl Default for PositionBatcher {
    fn default() -> Self {
        Self {
            batch_size: NonZeroUsize::new(Self::DEFAULT_BATCH_SIZE).unwrap_or(NonZeroUsize::MIN),
        }
    }
}
