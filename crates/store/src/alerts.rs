//! Alert definitions and alert events. The partial unique index on
//! unresolved events backs the at-most-one-open-event-per-alert
//! invariant; `open_alert_event` treats a violation as "already open".

use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;
use tracing::instrument;

use rc_domain::alert::{Alert, AlertEvent, AlertOperator};
use rc_domain::{Error, Result};

use crate::{
    clamp_limit, fmt_dt, is_unique_violation, parse_dt, parse_opt_dt, parse_opt_json, store_err,
    Store,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Debug)]
pub struct NewAlert {
    pub device_id: i64,
    pub metric: String,
    pub operator: AlertOperator,
    pub threshold_value: f64,
    pub is_enabled: bool,
    pub trend_enabled: bool,
}

#[derive(Clone, Debug, Default)]
pub struct AlertUpdate {
    pub metric: Option<String>,
    pub operator: Option<AlertOperator>,
    pub threshold_value: Option<f64>,
    pub trend_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct AlertFilter {
    pub device_id: Option<i64>,
    pub is_enabled: Option<bool>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct NewAlertEvent {
    pub alert_id: i64,
    pub device_id: i64,
    pub triggered_at: DateTime<Utc>,
    pub current_value: f64,
    pub threshold_value: f64,
    pub operator: AlertOperator,
    pub metric: String,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default)]
pub struct AlertEventFilter {
    pub alert_id: Option<i64>,
    pub device_id: Option<i64>,
    pub is_resolved: Option<bool>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const ALERT_COLUMNS: &str = "id, device_id, metric, operator, threshold_value, \
     is_enabled, trend_enabled, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct AlertRow {
    id: i64,
    device_id: i64,
    metric: String,
    operator: String,
    threshold_value: f64,
    is_enabled: bool,
    trend_enabled: bool,
    created_at: String,
    updated_at: String,
}

impl TryFrom<AlertRow> for Alert {
    type Error = Error;

    fn try_from(row: AlertRow) -> Result<Self> {
        Ok(Alert {
            id: row.id,
            device_id: row.device_id,
            metric: row.metric,
            operator: row.operator.parse().map_err(Error::Store)?,
            threshold_value: row.threshold_value,
            is_enabled: row.is_enabled,
            trend_enabled: row.trend_enabled,
            created_at: parse_dt("created_at", &row.created_at)?,
            updated_at: parse_dt("updated_at", &row.updated_at)?,
        })
    }
}

const EVENT_COLUMNS: &str = "id, alert_id, device_id, triggered_at, current_value, \
     threshold_value, operator, metric, is_resolved, resolved_at, \
     resolution_value, metadata";

#[derive(sqlx::FromRow)]
struct AlertEventRow {
    id: i64,
    alert_id: i64,
    device_id: i64,
    triggered_at: String,
    current_value: f64,
    threshold_value: f64,
    operator: String,
    metric: String,
    is_resolved: bool,
    resolved_at: Option<String>,
    resolution_value: Option<f64>,
    metadata: Option<String>,
}

impl TryFrom<AlertEventRow> for AlertEvent {
    type Error = Error;

    fn try_from(row: AlertEventRow) -> Result<Self> {
        Ok(AlertEvent {
            id: row.id,
            alert_id: row.alert_id,
            device_id: row.device_id,
            triggered_at: parse_dt("triggered_at", &row.triggered_at)?,
            current_value: row.current_value,
            threshold_value: row.threshold_value,
            operator: row.operator.parse().map_err(Error::Store)?,
            metric: row.metric,
            is_resolved: row.is_resolved,
            resolved_at: parse_opt_dt("resolved_at", row.resolved_at)?,
            resolution_value: row.resolution_value,
            metadata: parse_opt_json("metadata", row.metadata)?,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Alert repository
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Store {
    pub async fn create_alert(&self, new: &NewAlert, now: DateTime<Utc>) -> Result<Alert> {
        let result = sqlx::query(
            r#"
            INSERT INTO alerts (
                device_id, metric, operator, threshold_value,
                is_enabled, trend_enabled, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.device_id)
        .bind(&new.metric)
        .bind(new.operator.as_str())
        .bind(new.threshold_value)
        .bind(new.is_enabled)
        .bind(new.trend_enabled)
        .bind(fmt_dt(&now))
        .bind(fmt_dt(&now))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        let id = result.last_insert_rowid();
        self.get_alert(id)
            .await?
            .ok_or_else(|| Error::not_found("alert", id))
    }

    pub async fn get_alert(&self, id: i64) -> Result<Option<Alert>> {
        let row = sqlx::query_as::<_, AlertRow>(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(TryInto::try_into).transpose()
    }

    pub async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        let mut query = QueryBuilder::new(format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE 1=1"));
        if let Some(device_id) = filter.device_id {
            query.push(" AND device_id = ");
            query.push_bind(device_id);
        }
        if let Some(enabled) = filter.is_enabled {
            query.push(" AND is_enabled = ");
            query.push_bind(enabled);
        }
        query.push(" ORDER BY id ASC LIMIT ");
        query.push_bind(clamp_limit(filter.limit));
        query.push(" OFFSET ");
        query.push_bind(filter.skip.unwrap_or(0).max(0));

        let rows = query
            .build_query_as::<AlertRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// All alerts the evaluator must visit this cycle.
    pub async fn enabled_alerts(&self) -> Result<Vec<Alert>> {
        self.list_alerts(&AlertFilter {
            is_enabled: Some(true),
            limit: Some(1000),
            ..Default::default()
        })
        .await
    }

    pub async fn update_alert(
        &self,
        id: i64,
        update: AlertUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        let Some(current) = self.get_alert(id).await? else {
            return Ok(None);
        };

        let metric = update.metric.unwrap_or(current.metric);
        let operator = update.operator.unwrap_or(current.operator);
        let threshold_value = update.threshold_value.unwrap_or(current.threshold_value);
        let trend_enabled = update.trend_enabled.unwrap_or(current.trend_enabled);

        sqlx::query(
            "UPDATE alerts
             SET metric = ?, operator = ?, threshold_value = ?, trend_enabled = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&metric)
        .bind(operator.as_str())
        .bind(threshold_value)
        .bind(trend_enabled)
        .bind(fmt_dt(&now))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        self.get_alert(id).await
    }

    pub async fn set_alert_enabled(
        &self,
        id: i64,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        let result = sqlx::query("UPDATE alerts SET is_enabled = ?, updated_at = ? WHERE id = ?")
            .bind(enabled)
            .bind(fmt_dt(&now))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_alert(id).await
    }

    pub async fn delete_alert(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM alerts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_alerts(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM alerts")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AlertEvent repository
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Store {
    /// Open an event for a newly breached alert. Returns `None` when an
    /// unresolved event already exists (the partial unique index wins the
    /// race, whatever the evaluator believed a moment ago).
    #[instrument(skip(self, new), fields(alert_id = new.alert_id, device_id = new.device_id))]
    pub async fn open_alert_event(&self, new: &NewAlertEvent) -> Result<Option<AlertEvent>> {
        let result = sqlx::query(
            r#"
            INSERT INTO alert_events (
                alert_id, device_id, triggered_at, current_value,
                threshold_value, operator, metric, is_resolved, metadata
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(new.alert_id)
        .bind(new.device_id)
        .bind(fmt_dt(&new.triggered_at))
        .bind(new.current_value)
        .bind(new.threshold_value)
        .bind(new.operator.as_str())
        .bind(&new.metric)
        .bind(new.metadata.as_ref().map(|v| v.to_string()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => {
                let id = done.last_insert_rowid();
                self.get_alert_event(id).await
            }
            Err(e) if is_unique_violation(&e) => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    pub async fn get_alert_event(&self, id: i64) -> Result<Option<AlertEvent>> {
        let row = sqlx::query_as::<_, AlertEventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM alert_events WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(TryInto::try_into).transpose()
    }

    /// The unresolved event for an alert, if one is open.
    pub async fn open_event_for_alert(&self, alert_id: i64) -> Result<Option<AlertEvent>> {
        let row = sqlx::query_as::<_, AlertEventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM alert_events
             WHERE alert_id = ? AND is_resolved = 0"
        ))
        .bind(alert_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(TryInto::try_into).transpose()
    }

    /// Resolve an open event. Returns `false` when the event was already
    /// resolved (or unknown).
    #[instrument(skip(self))]
    pub async fn resolve_alert_event(
        &self,
        id: i64,
        resolution_value: Option<f64>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE alert_events
             SET is_resolved = 1, resolved_at = ?, resolution_value = ?
             WHERE id = ? AND is_resolved = 0",
        )
        .bind(fmt_dt(&at))
        .bind(resolution_value)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn list_alert_events(&self, filter: &AlertEventFilter) -> Result<Vec<AlertEvent>> {
        let mut query =
            QueryBuilder::new(format!("SELECT {EVENT_COLUMNS} FROM alert_events WHERE 1=1"));
        if let Some(alert_id) = filter.alert_id {
            query.push(" AND alert_id = ");
            query.push_bind(alert_id);
        }
        if let Some(device_id) = filter.device_id {
            query.push(" AND device_id = ");
            query.push_bind(device_id);
        }
        if let Some(resolved) = filter.is_resolved {
            query.push(" AND is_resolved = ");
            query.push_bind(resolved);
        }
        query.push(" ORDER BY triggered_at DESC, id DESC LIMIT ");
        query.push_bind(clamp_limit(filter.limit));
        query.push(" OFFSET ");
        query.push_bind(filter.skip.unwrap_or(0).max(0));

        let rows = query
            .build_query_as::<AlertEventRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn count_open_alert_events(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM alert_events WHERE is_resolved = 0")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)
    }
}
