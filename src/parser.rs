//! Protobuf parser for GTFS Realtime feeds.

use chrono::{DateTime, Utc};
use prost::Message;

use crate::error::FetchError;
use crate::gtfs_rt::vehicle_position::VehicleStopStatus;
use crate::gtfs_rt::{FeedMessage, VehiclePosition};
use crate::model::{PositionRecord, VehicleStatus};

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage, FetchError> {
    Ok(FeedMessage::decode(bytes)?)
}

/// Flattens the vehicle entities of a feed into position records.
///
/// Entities without a position, a vehicle descriptor carrying an id, or a
/// trip descriptor are skipped. A missing vehicle timestamp falls back to
/// `fetched_at`.
pub fn positions_from_feed(feed: &FeedMessage, fetched_at: DateTime<Utc>) -> Vec<PositionRecord> {
    feed.entity
        .iter()
        .filter(|e| !e.is_deleted.unwrap_or(false))
        .filter_map(|e| e.vehicle.as_ref())
        .filter_map(|v| to_record(v, fetched_at))
        .collect()
}

fn to_record(v: &VehiclePosition, fetched_at: DateTime<Utc>) -> Option<PositionRecord> {
    let position = v.position.as_ref()?;
    let vehicle_id = v.vehicle.as_ref()?.id.clone()?;
    let route_id = v.trip.as_ref()?.route_id.clone().unwrap_or_default();

    let observed_at = v
        .timestamp
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(fetched_at);

    Some(PositionRecord {
        vehicle_id,
        route_id,
        latitude: f64::from(position.latitude),
        longitude: f64::from(position.longitude),
        observed_at,
        status: map_status(v.current_status),
    })
}

fn map_status(raw: Option<i32>) -> VehicleStatus {
    match raw.map(VehicleStopStatus::try_from) {
        Some(Ok(VehicleStopStatus::InTransitTo)) => VehicleStatus::InTransitTo,
        Some(Ok(VehicleStopStatus::StoppedAt)) => VehicleStatus::StoppedAt,
        Some(Ok(VehicleStopStatus::IncomingAt)) => VehicleStatus::IncomingAt,
        _ => VehicleStatus::Unknown,
    }
}
