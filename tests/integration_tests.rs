use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prost::Message;
use transit_monitor::alerts::AlertAggregator;
use transit_monitor::config::Thresholds;
use transit_monitor::error::FetchError;
use transit_monitor::feed::PositionFeed;
use transit_monitor::gtfs_rt::vehicle_position::VehicleStopStatus;
use transit_monitor::gtfs_rt::{
    FeedEntity, FeedHeader, FeedMessage, Position, TripDescriptor, VehicleDescriptor,
    VehiclePosition,
};
use transit_monitor::ingest::IngestionPipeline;
use transit_monitor::model::{AlertType, PositionRecord, VehicleStatus};
use transit_monitor::monitor::MonitoringPipeline;
use transit_monitor::parser::{parse_feed, positions_from_feed};
use transit_monitor::store::{DuckDbStore, LatestQuery, MemoryStore, PositionStore};

/// Serves a fixed encoded GTFS-RT payload, decoding it on every fetch.
struct EncodedFeed {
    bytes: Vec<u8>,
}

#[async_trait]
impl PositionFeed for EncodedFeed {
    async fn fetch_positions(&self) -> Result<Vec<PositionRecord>, FetchError> {
        let feed = parse_feed(&self.bytes)?;
        Ok(positions_from_feed(&feed, Utc::now()))
    }
}

#[tokio::test]
async fn test_feed_to_alerts_through_duckdb() {
    let now = Utc::now();
    let store = Arc::new(DuckDbStore::open_in_memory().unwrap());
    store.init().await.unwrap();

    let ingestion = IngestionPipeline::new(Arc::new(sample_feed(now)), store.clone());
    ingestion.ingest_once().await.unwrap();

    let stats = ingestion.statistics();
    assert_eq!(stats.total_fetched, 3);
    assert_eq!(stats.total_stored, 3);

    let alerts = quiet_aggregator();
    let monitoring = MonitoringPipeline::new(store, &Thresholds::default(), alerts.clone());
    monitoring.run_once(now).await;

    let counts = alerts.alert_counts();
    assert_eq!(counts[&AlertType::DelayedVehicle], 1);
    assert_eq!(counts[&AlertType::VehicleBunching], 1);
    assert_eq!(counts[&AlertType::LowRouteCoverage], 0);
    assert_eq!(counts[&AlertType::OfflineVehicle], 0);

    let recent = alerts.recent_alerts();
    let delayed = recent
        .iter()
        .find(|a| a.alert_type == AlertType::DelayedVehicle)
        .unwrap();
    assert!(delayed.message.contains("V1"));
    assert!(delayed.message.contains('6'));

    let bunched = recent
        .iter()
        .find(|a| a.alert_type == AlertType::VehicleBunching)
        .unwrap();
    assert_eq!(bunched.vehicle_id.as_deref(), Some("V2,V3"));
}

#[tokio::test]
async fn test_refetching_same_snapshot_does_not_duplicate_rows() {
    let now = Utc::now();
    let store = Arc::new(DuckDbStore::open_in_memory().unwrap());
    store.init().await.unwrap();

    let ingestion = IngestionPipeline::new(Arc::new(sample_feed(now)), store.clone());
    ingestion.ingest_once().await.unwrap();
    ingestion.ingest_once().await.unwrap();

    assert_eq!(ingestion.statistics().total_fetched, 6);
    assert_eq!(store.record_count().await.unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_pipelines_share_the_store() {
    let now = Utc::now();
    let store = Arc::new(MemoryStore::new());
    let alerts = quiet_aggregator();

    let ingestion = IngestionPipeline::new(Arc::new(sample_feed(now)), store.clone());
    let monitoring = MonitoringPipeline::new(store.clone(), &Thresholds::default(), alerts.clone())
        .with_initial_delay(Duration::from_secs(1));

    assert!(ingestion.start(Duration::from_secs(3600)));
    assert!(monitoring.start(Duration::from_secs(3600)));

    tokio::time::sleep(Duration::from_secs(2)).await;

    ingestion.stop().await.unwrap();
    monitoring.stop().await.unwrap();

    assert_eq!(store.record_count().await.unwrap(), 3);
    assert_eq!(alerts.alert_counts()[&AlertType::DelayedVehicle], 1);
    assert_eq!(alerts.alert_counts()[&AlertType::VehicleBunching], 1);
    assert!(!ingestion.is_running());
    assert!(!monitoring.is_running());
}

#[tokio::test]
async fn test_memory_and_duckdb_views_agree() {
    let now = Utc::now();
    let duck = DuckDbStore::open_in_memory().unwrap();
    duck.init().await.unwrap();
    let memory = MemoryStore::new();

    let mut history = sample_positions(now);
    // An older, differently-statused row for V2 that the view must hide.
    let mut older = history[1].clone();
    older.observed_at = older.observed_at - chrono::Duration::minutes(30);
    older.status = VehicleStatus::StoppedAt;
    history.push(older);

    duck.write_batch(&history).await.unwrap();
    memory.write_batch(&history).await.unwrap();

    let queries = [
        LatestQuery::all(),
        LatestQuery::all().with_status(VehicleStatus::StoppedAt),
        LatestQuery::all().with_status(VehicleStatus::InTransitTo),
        LatestQuery::all().active_within(now, 15),
        LatestQuery::all()
            .with_status(VehicleStatus::StoppedAt)
            .active_within(now, 5),
    ];
    for query in &queries {
        assert_eq!(
            duck.latest_positions(query).await.unwrap(),
            memory.latest_positions(query).await.unwrap(),
            "views differ for {query:?}"
        );
    }
}

// Helper functions for tests

fn quiet_aggregator() -> Arc<AlertAggregator> {
    let alerts = Arc::new(AlertAggregator::default());
    alerts.set_quiet_mode(true);
    alerts
}

/// V1 stopped for six minutes, V2 and V3 moving 0.005 degrees apart on both
/// axes, all on route R1.
fn sample_message(now: DateTime<Utc>) -> FeedMessage {
    let secs = now.timestamp() as u64;
    FeedMessage {
        header: FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            incrementality: None,
            timestamp: Some(secs),
            feed_version: None,
        },
        entity: vec![
            entity("V1", VehicleStopStatus::StoppedAt, 37.7700, -122.4100, secs - 360),
            entity("V2", VehicleStopStatus::InTransitTo, 37.7749, -122.4194, secs),
            entity("V3", VehicleStopStatus::InTransitTo, 37.7799, -122.4144, secs),
        ],
    }
}

fn sample_feed(now: DateTime<Utc>) -> EncodedFeed {
    EncodedFeed {
        bytes: sample_message(now).encode_to_vec(),
    }
}

fn sample_positions(now: DateTime<Utc>) -> Vec<PositionRecord> {
    positions_from_feed(&sample_message(now), now)
}

fn entity(
    vehicle_id: &str,
    status: VehicleStopStatus,
    latitude: f32,
    longitude: f32,
    timestamp: u64,
) -> FeedEntity {
    FeedEntity {
        id: format!("entity-{vehicle_id}"),
        is_deleted: None,
        vehicle: Some(VehiclePosition {
            trip: Some(TripDescriptor {
                trip_id: Some(format!("trip-{vehicle_id}")),
                route_id: Some("R1".to_string()),
                ..Default::default()
            }),
            vehicle: Some(VehicleDescriptor {
                id: Some(vehicle_id.to_string()),
                ..Default::default()
            }),
            position: Some(Position {
                latitude,
                longitude,
                bearing: None,
                odometer: None,
                speed: None,
            }),
            current_status: Some(status as i32),
            timestamp: Some(timestamp),
            ..Default::default()
        }),
    }
}
