//! The feed collaborator: where fresh vehicle positions come from.

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::error::FetchError;
use crate::fetch::{HttpClient, fetch_bytes};
use crate::model::PositionRecord;
use crate::parser::{parse_feed, positions_from_feed};

/// A source of vehicle positions.
///
/// Every call returns a full snapshot of the vehicles currently broadcast;
/// there is no paging and no diffing against earlier calls.
#[async_trait]
pub trait PositionFeed: Send + Sync {
    async fn fetch_positions(&self) -> Result<Vec<PositionRecord>, FetchError>;
}

/// Reads a GTFS-RT vehicle-positions endpoint.
pub struct GtfsRtFeed {
    client: Box<dyn HttpClient>,
    url: String,
}

impl GtfsRtFeed {
    pub fn new(client: Box<dyn HttpClient>, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl PositionFeed for GtfsRtFeed {
    #[tracing::instrument(skip(self))]
    async fn fetch_positions(&self) -> Result<Vec<PositionRecord>, FetchError> {
        let bytes = fetch_bytes(self.client.as_ref(), &self.url).await?;
        let fetched_at = Utc::now();

        let feed = parse_feed(&bytes)?;
        let positions = positions_from_feed(&feed, fetched_at);
        debug!(
            bytes = bytes.len(),
            entities = feed.entity.len(),
            positions = positions.len(),
            "Feed decoded"
        );

        Ok(positions)
    }
}
