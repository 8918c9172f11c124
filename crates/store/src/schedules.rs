//! Schedule repository. REST handlers own the user-facing columns; the
//! scheduler worker is the single writer for `next_run`, `last_run`,
//! `last_run_status` and the enable flag it flips on expiry.

use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;
use tracing::instrument;

use rc_domain::schedule::{ActionType, RunStatus, Schedule, ScheduleType};
use rc_domain::{Error, Result};

use crate::{
    clamp_limit, fmt_dt, fmt_opt_dt, parse_dt, parse_json, parse_opt_dt, store_err, Store,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fields supplied when creating a schedule (the store assigns id and
/// bookkeeping columns).
#[derive(Clone, Debug)]
pub struct NewSchedule {
    pub name: String,
    pub schedule_type: ScheduleType,
    pub cron_expression: Option<String>,
    pub interval_seconds: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub timezone: String,
    pub device_ids: Vec<i64>,
    pub action_type: ActionType,
    pub action_params: serde_json::Value,
    pub is_enabled: bool,
}

/// Partial update of the user-facing columns. `None` = leave unchanged.
#[derive(Clone, Debug, Default)]
pub struct ScheduleUpdate {
    pub name: Option<String>,
    pub cron_expression: Option<Option<String>>,
    pub interval_seconds: Option<Option<i64>>,
    pub start_time: Option<Option<DateTime<Utc>>>,
    pub end_time: Option<Option<DateTime<Utc>>>,
    pub timezone: Option<String>,
    pub device_ids: Option<Vec<i64>>,
    pub action_params: Option<serde_json::Value>,
}

/// List filters for `GET /schedules`.
#[derive(Clone, Debug, Default)]
pub struct ScheduleFilter {
    pub schedule_type: Option<ScheduleType>,
    pub is_enabled: Option<bool>,
    pub device_id: Option<i64>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

/// Aggregate counts for `GET /schedules/stats`.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ScheduleStats {
    pub total: i64,
    pub enabled: i64,
    pub disabled: i64,
    pub with_next_run: i64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const COLUMNS: &str = "id, name, schedule_type, cron_expression, interval_seconds, \
     start_time, end_time, timezone, device_ids, action_type, action_params, \
     is_enabled, next_run, last_run, last_run_status, error_message, \
     created_at, updated_at";

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: i64,
    name: String,
    schedule_type: String,
    cron_expression: Option<String>,
    interval_seconds: Option<i64>,
    start_time: Option<String>,
    end_time: Option<String>,
    timezone: String,
    device_ids: String,
    action_type: String,
    action_params: String,
    is_enabled: bool,
    next_run: Option<String>,
    last_run: Option<String>,
    last_run_status: Option<String>,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ScheduleRow> for Schedule {
    type Error = Error;

    fn try_from(row: ScheduleRow) -> Result<Self> {
        let device_ids: Vec<i64> = serde_json::from_str(&row.device_ids)
            .map_err(|e| Error::Store(format!("device_ids: bad JSON: {e}")))?;
        Ok(Schedule {
            id: row.id,
            name: row.name,
            schedule_type: row
                .schedule_type
                .parse()
                .map_err(Error::Store)?,
            cron_expression: row.cron_expression,
            interval_seconds: row.interval_seconds,
            start_time: parse_opt_dt("start_time", row.start_time)?,
            end_time: parse_opt_dt("end_time", row.end_time)?,
            timezone: row.timezone,
            device_ids,
            action_type: row.action_type.parse().map_err(Error::Store)?,
            action_params: parse_json("action_params", &row.action_params)?,
            is_enabled: row.is_enabled,
            next_run: parse_opt_dt("next_run", row.next_run)?,
            last_run: parse_opt_dt("last_run", row.last_run)?,
            last_run_status: row
                .last_run_status
                .map(|s| s.parse().map_err(Error::Store))
                .transpose()?,
            error_message: row.error_message,
            created_at: parse_dt("created_at", &row.created_at)?,
            updated_at: parse_dt("updated_at", &row.updated_at)?,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Repository
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Store {
    pub async fn create_schedule(&self, new: NewSchedule, now: DateTime<Utc>) -> Result<Schedule> {
        let device_ids = serde_json::to_string(&new.device_ids)?;
        let result = sqlx::query(
            r#"
            INSERT INTO schedules (
                name, schedule_type, cron_expression, interval_seconds,
                start_time, end_time, timezone, device_ids,
                action_type, action_params, is_enabled,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.name)
        .bind(new.schedule_type.as_str())
        .bind(&new.cron_expression)
        .bind(new.interval_seconds)
        .bind(fmt_opt_dt(&new.start_time))
        .bind(fmt_opt_dt(&new.end_time))
        .bind(&new.timezone)
        .bind(device_ids)
        .bind(new.action_type.as_str())
        .bind(new.action_params.to_string())
        .bind(new.is_enabled)
        .bind(fmt_dt(&now))
        .bind(fmt_dt(&now))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        let id = result.last_insert_rowid();
        self.get_schedule(id)
            .await?
            .ok_or_else(|| Error::not_found("schedule", id))
    }

    pub async fn get_schedule(&self, id: i64) -> Result<Option<Schedule>> {
        let row = sqlx::query_as::<_, ScheduleRow>(&format!(
            "SELECT {COLUMNS} FROM schedules WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(TryInto::try_into).transpose()
    }

    pub async fn list_schedules(&self, filter: &ScheduleFilter) -> Result<Vec<Schedule>> {
        let mut query = QueryBuilder::new(format!("SELECT {COLUMNS} FROM schedules WHERE 1=1"));
        if let Some(t) = filter.schedule_type {
            query.push(" AND schedule_type = ");
            query.push_bind(t.as_str());
        }
        if let Some(enabled) = filter.is_enabled {
            query.push(" AND is_enabled = ");
            query.push_bind(enabled);
        }
        if let Some(device_id) = filter.device_id {
            query.push(
                " AND EXISTS (SELECT 1 FROM json_each(schedules.device_ids) \
                 WHERE json_each.value = ",
            );
            query.push_bind(device_id);
            query.push(")");
        }
        query.push(" ORDER BY id ASC LIMIT ");
        query.push_bind(clamp_limit(filter.limit));
        query.push(" OFFSET ");
        query.push_bind(filter.skip.unwrap_or(0).max(0));

        let rows = query
            .build_query_as::<ScheduleRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Apply a partial update to the user-facing columns. Scheduling
    /// columns are untouched; the caller is expected to clear `next_run`
    /// separately when the timing definition changed.
    pub async fn update_schedule(
        &self,
        id: i64,
        update: ScheduleUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Schedule>> {
        let Some(current) = self.get_schedule(id).await? else {
            return Ok(None);
        };

        let name = update.name.unwrap_or(current.name);
        let cron_expression = update.cron_expression.unwrap_or(current.cron_expression);
        let interval_seconds = update.interval_seconds.unwrap_or(current.interval_seconds);
        let start_time = update.start_time.unwrap_or(current.start_time);
        let end_time = update.end_time.unwrap_or(current.end_time);
        let timezone = update.timezone.unwrap_or(current.timezone);
        let device_ids = update.device_ids.unwrap_or(current.device_ids);
        let action_params = update.action_params.unwrap_or(current.action_params);

        sqlx::query(
            r#"
            UPDATE schedules
            SET name = ?, cron_expression = ?, interval_seconds = ?,
                start_time = ?, end_time = ?, timezone = ?,
                device_ids = ?, action_params = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&name)
        .bind(&cron_expression)
        .bind(interval_seconds)
        .bind(fmt_opt_dt(&start_time))
        .bind(fmt_opt_dt(&end_time))
        .bind(&timezone)
        .bind(serde_json::to_string(&device_ids)?)
        .bind(action_params.to_string())
        .bind(fmt_dt(&now))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        self.get_schedule(id).await
    }

    /// Flip the enable flag. Enabling clears the stale error and forces a
    /// recompute by nulling `next_run`; disabling nulls `next_run` so the
    /// due-set never sees the schedule.
    pub async fn set_schedule_enabled(
        &self,
        id: i64,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<Schedule>> {
        let result = sqlx::query(
            r#"
            UPDATE schedules
            SET is_enabled = ?, next_run = NULL,
                error_message = CASE WHEN ? THEN NULL ELSE error_message END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(enabled)
        .bind(enabled)
        .bind(fmt_dt(&now))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_schedule(id).await
    }

    pub async fn delete_schedule(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    // ── scheduler-worker operations ──────────────────────────────────

    /// Enabled schedules whose `next_run` is unset or at/before `cutoff`,
    /// in `(next_run, id)` order.
    #[instrument(skip(self))]
    pub async fn due_schedules(&self, cutoff: DateTime<Utc>) -> Result<Vec<Schedule>> {
        let rows = sqlx::query_as::<_, ScheduleRow>(&format!(
            "SELECT {COLUMNS} FROM schedules
             WHERE is_enabled = 1 AND (next_run IS NULL OR next_run <= ?)
             ORDER BY next_run ASC, id ASC"
        ))
        .bind(fmt_dt(&cutoff))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Move `next_run` forward (or clear it).
    pub async fn advance_schedule(
        &self,
        id: i64,
        next_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE schedules SET next_run = ?, updated_at = ? WHERE id = ?")
            .bind(fmt_opt_dt(&next_run))
            .bind(fmt_dt(&now))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Record the observational outcome of a firing.
    pub async fn record_schedule_run(
        &self,
        id: i64,
        at: DateTime<Utc>,
        status: RunStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE schedules
             SET last_run = ?, last_run_status = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(fmt_dt(&at))
        .bind(status.as_str())
        .bind(fmt_dt(&now))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    /// Turn a schedule off at the end of its life (expiry, one_off done)
    /// or on an invalid definition. An error message marks the run failed.
    #[instrument(skip(self))]
    pub async fn disable_schedule(
        &self,
        id: i64,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE schedules
            SET is_enabled = 0, next_run = NULL,
                error_message = COALESCE(?, error_message),
                last_run_status = CASE WHEN ? IS NULL THEN last_run_status ELSE 'failed' END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(error_message)
        .bind(error_message)
        .bind(fmt_dt(&now))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    pub async fn schedule_stats(&self) -> Result<ScheduleStats> {
        let (total, enabled, with_next_run): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*),
                    COALESCE(SUM(is_enabled), 0),
                    COALESCE(SUM(next_run IS NOT NULL), 0)
             FROM schedules",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(ScheduleStats {
            total,
            enabled,
            disabled: total - enabled,
            with_next_run,
        })
    }

    pub async fn count_schedules(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM schedules")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)
    }
}
