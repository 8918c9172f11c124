//! Time-series readings. Writes come from the poller only; reads serve
//! the alert evaluator (`latest_reading`) and the history endpoint.

use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;

use rc_domain::reading::Reading;
use rc_domain::{Error, Result};

use crate::{fmt_dt, parse_dt, parse_opt_json, store_err, Store};

#[derive(Clone, Debug)]
pub struct NewReading {
    pub device_id: i64,
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
    pub json_value: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
}

/// Filters for `GET /devices/{id}/history`.
#[derive(Clone, Debug, Default)]
pub struct HistoryQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

const COLUMNS: &str = "id, device_id, timestamp, value, json_value, metadata";

#[derive(sqlx::FromRow)]
struct ReadingRow {
    id: i64,
    device_id: i64,
    timestamp: String,
    value: Option<f64>,
    json_value: Option<String>,
    metadata: Option<String>,
}

impl TryFrom<ReadingRow> for Reading {
    type Error = Error;

    fn try_from(row: ReadingRow) -> Result<Self> {
        Ok(Reading {
            id: row.id,
            device_id: row.device_id,
            timestamp: parse_dt("timestamp", &row.timestamp)?,
            value: row.value,
            json_value: parse_opt_json("json_value", row.json_value)?,
            metadata: parse_opt_json("metadata", row.metadata)?,
        })
    }
}

impl Store {
    pub async fn insert_reading(&self, new: &NewReading) -> Result<Reading> {
        let result = sqlx::query(
            "INSERT INTO readings (device_id, timestamp, value, json_value, metadata)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(new.device_id)
        .bind(fmt_dt(&new.timestamp))
        .bind(new.value)
        .bind(new.json_value.as_ref().map(|v| v.to_string()))
        .bind(new.metadata.as_ref().map(|v| v.to_string()))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        let id = result.last_insert_rowid();
        let row = sqlx::query_as::<_, ReadingRow>(&format!(
            "SELECT {COLUMNS} FROM readings WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        row.try_into()
    }

    /// Most recent reading for a device, by timestamp.
    pub async fn latest_reading(&self, device_id: i64) -> Result<Option<Reading>> {
        let row = sqlx::query_as::<_, ReadingRow>(&format!(
            "SELECT {COLUMNS} FROM readings
             WHERE device_id = ?
             ORDER BY timestamp DESC, id DESC
             LIMIT 1"
        ))
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(TryInto::try_into).transpose()
    }

    /// History for a device, newest first, optionally bounded by a time
    /// range. `limit` clamps to [1, 1000], default 100.
    pub async fn reading_history(
        &self,
        device_id: i64,
        query: &HistoryQuery,
    ) -> Result<Vec<Reading>> {
        let mut builder = QueryBuilder::new(format!(
            "SELECT {COLUMNS} FROM readings WHERE device_id = "
        ));
        builder.push_bind(device_id);
        if let Some(start) = query.start {
            builder.push(" AND timestamp >= ");
            builder.push_bind(fmt_dt(&start));
        }
        if let Some(end) = query.end {
            builder.push(" AND timestamp <= ");
            builder.push_bind(fmt_dt(&end));
        }
        builder.push(" ORDER BY timestamp DESC, id DESC LIMIT ");
        builder.push_bind(crate::clamp_limit(query.limit));

        let rows = builder
            .build_query_as::<ReadingRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Retention sweep: delete readings older than `cutoff`. Returns the
    /// number of rows removed.
    pub async fn prune_readings(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM readings WHERE timestamp < ?")
            .bind(fmt_dt(&cutoff))
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    pub async fn count_readings(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM readings")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)
    }
}
