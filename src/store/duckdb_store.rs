use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::DateTime;
use duckdb::{Connection, Row, params};
use tracing::info;

use super::{LatestQuery, PositionStore};
use crate::error::StoreError;
use crate::model::{PositionRecord, VehicleStatus};

const CREATE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS vehicle_positions (
        vehicle_id VARCHAR NOT NULL,
        observed_at BIGINT NOT NULL,
        route_id VARCHAR NOT NULL,
        latitude DOUBLE NOT NULL,
        longitude DOUBLE NOT NULL,
        current_status VARCHAR NOT NULL,
        PRIMARY KEY (vehicle_id, observed_at)
    );
    CREATE INDEX IF NOT EXISTS idx_positions_route ON vehicle_positions (route_id);
    CREATE INDEX IF NOT EXISTS idx_positions_status ON vehicle_positions (current_status);";

const INSERT_POSITION: &str = "
    INSERT OR IGNORE INTO vehicle_positions
        (vehicle_id, observed_at, route_id, latitude, longitude, current_status)
    VALUES (?, ?, ?, ?, ?, ?)";

// Each vehicle's newest row, found by joining against the per-vehicle max.
const SELECT_LATEST: &str = "
    SELECT v.vehicle_id, v.route_id, v.latitude, v.longitude, v.observed_at, v.current_status
    FROM vehicle_positions v
    JOIN (
        SELECT vehicle_id, MAX(observed_at) AS latest_ts
        FROM vehicle_positions
        GROUP BY vehicle_id
    ) l ON v.vehicle_id = l.vehicle_id AND v.observed_at = l.latest_ts";

type StoredRow = (String, String, f64, f64, i64, String);

/// Position store backed by an embedded DuckDB database.
///
/// `observed_at` is stored as epoch milliseconds. Re-inserting an existing
/// `(vehicle_id, observed_at)` is a no-op, since records never change once
/// observed. Every statement runs on tokio's blocking pool.
pub struct DuckDbStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Creates the `vehicle_positions` table if it does not exist yet.
    /// Safe to call on every startup.
    pub async fn init(&self) -> Result<(), StoreError> {
        self.with_connection(|conn| Ok(conn.execute_batch(CREATE_SCHEMA)?))
            .await?;
        info!("Vehicle positions schema ready");
        Ok(())
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_connection<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut *conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("DuckDB task failed: {e}")))?
    }
}

#[async_trait]
impl PositionStore for DuckDbStore {
    async fn write_batch(&self, batch: &[PositionRecord]) -> Result<usize, StoreError> {
        let batch = batch.to_vec();
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(INSERT_POSITION)?;
                for r in &batch {
                    stmt.execute(params![
                        r.vehicle_id,
                        r.observed_at.timestamp_millis(),
                        r.route_id,
                        r.latitude,
                        r.longitude,
                        r.status.as_str(),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(batch.len())
        })
        .await
    }

    async fn latest_positions(
        &self,
        query: &LatestQuery,
    ) -> Result<Vec<PositionRecord>, StoreError> {
        let status = query.status.map(|s| s.as_str());
        let after = query.observed_after.map(|t| t.timestamp_millis());

        let filter = match (status, after) {
            (None, None) => "",
            (Some(_), None) => "WHERE v.current_status = ?",
            (None, Some(_)) => "WHERE v.observed_at > ?",
            (Some(_), Some(_)) => "WHERE v.current_status = ? AND v.observed_at > ?",
        };
        let sql = format!("{SELECT_LATEST} {filter} ORDER BY v.vehicle_id");

        let rows = self
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let mapped = match (status, after) {
                    (None, None) => stmt.query_map([], map_row)?,
                    (Some(status), None) => stmt.query_map(params![status], map_row)?,
                    (None, Some(after)) => stmt.query_map(params![after], map_row)?,
                    (Some(status), Some(after)) => {
                        stmt.query_map(params![status, after], map_row)?
                    }
                };
                Ok(mapped.collect::<Result<Vec<StoredRow>, _>>()?)
            })
            .await?;

        rows.into_iter().map(into_record).collect()
    }

    async fn record_count(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM vehicle_positions", [], |row| {
                    row.get(0)
                })?)
            })
            .await?;
        Ok(count.max(0) as u64)
    }
}

fn map_row(row: &Row<'_>) -> duckdb::Result<StoredRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_record(row: StoredRow) -> Result<PositionRecord, StoreError> {
    let (vehicle_id, route_id, latitude, longitude, observed_ms, status) = row;
    let observed_at = DateTime::from_timestamp_millis(observed_ms).ok_or_else(|| {
        StoreError::Backend(format!(
            "vehicle {vehicle_id}: observed_at {observed_ms} out of range"
        ))
    })?;

    Ok(PositionRecord {
        vehicle_id,
        route_id,
        latitude,
        longitude,
        observed_at,
        status: status.parse().unwrap_or(VehicleStatus::Unknown),
    })
}
