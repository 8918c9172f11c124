//! Device-action queue. Materialization is guarded by the unique index
//! on `(schedule_id, scheduled_time, device_id)`; dispatch claims rows
//! with a conditional update so at most one worker executes each action.

use chrono::{DateTime, Duration, Utc};
use sqlx::QueryBuilder;
use tracing::instrument;

use rc_domain::action::{ActionStatus, DeviceAction};
use rc_domain::schedule::ActionType;
use rc_domain::{Error, Result};

use crate::{
    clamp_limit, fmt_dt, is_unique_violation, parse_dt, parse_json, parse_opt_dt,
    parse_opt_json, store_err, Store,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Debug)]
pub struct NewAction {
    /// `None` for manual (REST-created) actions.
    pub schedule_id: Option<i64>,
    pub device_id: i64,
    pub action_type: ActionType,
    pub parameters: serde_json::Value,
    pub scheduled_time: DateTime<Utc>,
}

#[derive(Clone, Debug, Default)]
pub struct ActionFilter {
    pub status: Option<ActionStatus>,
    pub device_id: Option<i64>,
    pub schedule_id: Option<i64>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

/// Aggregate counts for `GET /schedules/stats`.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ActionStats {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub success: i64,
    pub failed: i64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const COLUMNS: &str = "id, schedule_id, device_id, action_type, parameters, status, \
     scheduled_time, executed_time, result, error_message, created_at";

#[derive(sqlx::FromRow)]
struct ActionRow {
    id: i64,
    schedule_id: Option<i64>,
    device_id: i64,
    action_type: String,
    parameters: String,
    status: String,
    scheduled_time: String,
    executed_time: Option<String>,
    result: Option<String>,
    error_message: Option<String>,
    created_at: String,
}

impl TryFrom<ActionRow> for DeviceAction {
    type Error = Error;

    fn try_from(row: ActionRow) -> Result<Self> {
        Ok(DeviceAction {
            id: row.id,
            schedule_id: row.schedule_id,
            device_id: row.device_id,
            action_type: row.action_type.parse().map_err(Error::Store)?,
            parameters: parse_json("parameters", &row.parameters)?,
            status: row.status.parse().map_err(Error::Store)?,
            scheduled_time: parse_dt("scheduled_time", &row.scheduled_time)?,
            executed_time: parse_opt_dt("executed_time", row.executed_time)?,
            result: parse_opt_json("result", row.result)?,
            error_message: row.error_message,
            created_at: parse_dt("created_at", &row.created_at)?,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Repository
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Store {
    /// Insert one pending action for a schedule firing. Returns the new
    /// id, or `None` when the row already exists (retry after a crash,
    /// overlapping tick) — the duplicate is silently dropped.
    #[instrument(skip(self, new), fields(schedule_id = ?new.schedule_id, device_id = new.device_id))]
    pub async fn materialize_action(
        &self,
        new: &NewAction,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let result = sqlx::query(
            r#"
            INSERT INTO device_actions (
                schedule_id, device_id, action_type, parameters,
                status, scheduled_time, created_at
            )
            VALUES (?, ?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(new.schedule_id)
        .bind(new.device_id)
        .bind(new.action_type.as_str())
        .bind(new.parameters.to_string())
        .bind(fmt_dt(&new.scheduled_time))
        .bind(fmt_dt(&now))
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(Some(done.last_insert_rowid())),
            Err(e) if is_unique_violation(&e) => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    /// Manual action creation (REST). Never collides with the
    /// materialization guard because `schedule_id` is NULL.
    pub async fn create_manual_action(
        &self,
        new: &NewAction,
        now: DateTime<Utc>,
    ) -> Result<DeviceAction> {
        let id = self
            .materialize_action(new, now)
            .await?
            .ok_or_else(|| Error::Conflict("action already materialized".into()))?;
        self.get_action(id)
            .await?
            .ok_or_else(|| Error::not_found("device_action", id))
    }

    pub async fn get_action(&self, id: i64) -> Result<Option<DeviceAction>> {
        let row = sqlx::query_as::<_, ActionRow>(&format!(
            "SELECT {COLUMNS} FROM device_actions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(TryInto::try_into).transpose()
    }

    pub async fn list_actions(&self, filter: &ActionFilter) -> Result<Vec<DeviceAction>> {
        let mut query =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM device_actions WHERE 1=1"));
        if let Some(status) = filter.status {
            query.push(" AND status = ");
            query.push_bind(status.as_str());
        }
        if let Some(device_id) = filter.device_id {
            query.push(" AND device_id = ");
            query.push_bind(device_id);
        }
        if let Some(schedule_id) = filter.schedule_id {
            query.push(" AND schedule_id = ");
            query.push_bind(schedule_id);
        }
        query.push(" ORDER BY scheduled_time DESC, id DESC LIMIT ");
        query.push_bind(clamp_limit(filter.limit));
        query.push(" OFFSET ");
        query.push_bind(filter.skip.unwrap_or(0).max(0));

        let rows = query
            .build_query_as::<ActionRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Pending actions due at/before `now`, in dispatch order
    /// `(scheduled_time ASC, id ASC)`.
    pub async fn due_pending_actions(&self, now: DateTime<Utc>) -> Result<Vec<DeviceAction>> {
        let rows = sqlx::query_as::<_, ActionRow>(&format!(
            "SELECT {COLUMNS} FROM device_actions
             WHERE status = 'pending' AND scheduled_time <= ?
             ORDER BY scheduled_time ASC, id ASC"
        ))
        .bind(fmt_dt(&now))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Compare-and-set `pending → in_progress`. Exactly one caller per
    /// action observes `true`; everyone else must leave the row alone.
    #[instrument(skip(self))]
    pub async fn claim_action(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE device_actions SET status = 'in_progress'
             WHERE id = ? AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected() == 1)
    }

    /// Terminal transition. Only valid from `in_progress`; sets
    /// `executed_time` exactly once.
    pub async fn complete_action(
        &self,
        id: i64,
        status: ActionStatus,
        result: Option<&serde_json::Value>,
        error_message: Option<&str>,
        executed_time: DateTime<Utc>,
    ) -> Result<()> {
        debug_assert!(status.is_terminal());
        let done = sqlx::query(
            "UPDATE device_actions
             SET status = ?, executed_time = ?, result = ?, error_message = ?
             WHERE id = ? AND status = 'in_progress'",
        )
        .bind(status.as_str())
        .bind(fmt_dt(&executed_time))
        .bind(result.map(|v| v.to_string()))
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if done.rows_affected() == 0 {
            return Err(Error::Conflict(format!(
                "action {id} is not in_progress, refusing terminal transition"
            )));
        }
        Ok(())
    }

    /// Delete terminal actions whose execution is older than `days` days.
    /// Returns the number of rows removed.
    #[instrument(skip(self))]
    pub async fn cleanup_actions(&self, days: i64, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - Duration::days(days);
        let result = sqlx::query(
            "DELETE FROM device_actions
             WHERE status IN ('success', 'failed') AND executed_time < ?",
        )
        .bind(fmt_dt(&cutoff))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    pub async fn action_stats(&self) -> Result<ActionStats> {
        let (total, pending, in_progress, success, failed): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                "SELECT COUNT(*),
                        COALESCE(SUM(status = 'pending'), 0),
                        COALESCE(SUM(status = 'in_progress'), 0),
                        COALESCE(SUM(status = 'success'), 0),
                        COALESCE(SUM(status = 'failed'), 0)
                 FROM device_actions",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(ActionStats {
            total,
            pending,
            in_progress,
            success,
            failed,
        })
    }
}
