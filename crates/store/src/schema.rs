//! Schema bootstrap. Every statement is idempotent so `migrate` can run
//! on every startup; the uniqueness indexes are load-bearing (at-most-one
//! materialization per firing, at-most-one open event per alert).

use sqlx::SqlitePool;

use rc_domain::Result;

use crate::store_err;

const DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS schedules (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        name            TEXT NOT NULL,
        schedule_type   TEXT NOT NULL,
        cron_expression TEXT,
        interval_seconds INTEGER,
        start_time      TEXT,
        end_time        TEXT,
        timezone        TEXT NOT NULL DEFAULT 'UTC',
        device_ids      TEXT NOT NULL DEFAULT '[]',
        action_type     TEXT NOT NULL,
        action_params   TEXT NOT NULL DEFAULT '{}',
        is_enabled      INTEGER NOT NULL DEFAULT 1,
        next_run        TEXT,
        last_run        TEXT,
        last_run_status TEXT,
        error_message   TEXT,
        created_at      TEXT NOT NULL,
        updated_at      TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_schedules_enabled_next_run
         ON schedules(is_enabled, next_run)",
    r#"
    CREATE TABLE IF NOT EXISTS devices (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        name          TEXT NOT NULL,
        device_type   TEXT NOT NULL,
        address       TEXT NOT NULL DEFAULT '',
        poll_enabled  INTEGER NOT NULL DEFAULT 0,
        poll_interval INTEGER NOT NULL DEFAULT 60,
        is_active     INTEGER NOT NULL DEFAULT 1,
        config        TEXT NOT NULL DEFAULT '{}',
        last_polled   TEXT,
        last_error    TEXT,
        created_at    TEXT NOT NULL,
        updated_at    TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS device_actions (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        schedule_id    INTEGER REFERENCES schedules(id) ON DELETE CASCADE,
        device_id      INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
        action_type    TEXT NOT NULL,
        parameters     TEXT NOT NULL DEFAULT '{}',
        status         TEXT NOT NULL DEFAULT 'pending',
        scheduled_time TEXT NOT NULL,
        executed_time  TEXT,
        result         TEXT,
        error_message  TEXT,
        created_at     TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_device_actions_status_time
         ON device_actions(status, scheduled_time)",
    // At most one row per (schedule, instant, device). NULL schedule_id
    // (manual actions) is exempt, as SQLite treats NULLs as distinct.
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_device_actions_materialization
         ON device_actions(schedule_id, scheduled_time, device_id)",
    r#"
    CREATE TABLE IF NOT EXISTS readings (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id  INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
        timestamp  TEXT NOT NULL,
        value      REAL,
        json_value TEXT,
        metadata   TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_readings_device_time
         ON readings(device_id, timestamp DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS alerts (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id       INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
        metric          TEXT NOT NULL,
        operator        TEXT NOT NULL,
        threshold_value REAL NOT NULL,
        is_enabled      INTEGER NOT NULL DEFAULT 1,
        trend_enabled   INTEGER NOT NULL DEFAULT 0,
        created_at      TEXT NOT NULL,
        updated_at      TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS alert_events (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        alert_id         INTEGER NOT NULL REFERENCES alerts(id) ON DELETE CASCADE,
        device_id        INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
        triggered_at     TEXT NOT NULL,
        current_value    REAL NOT NULL,
        threshold_value  REAL NOT NULL,
        operator         TEXT NOT NULL,
        metric           TEXT NOT NULL,
        is_resolved      INTEGER NOT NULL DEFAULT 0,
        resolved_at      TEXT,
        resolution_value REAL,
        metadata         TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_alert_events_alert_resolved
         ON alert_events(alert_id, is_resolved)",
    // The at-most-one-unresolved-event-per-alert invariant.
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_alert_events_open
         ON alert_events(alert_id) WHERE is_resolved = 0",
];

pub(crate) async fn migrate(pool: &SqlitePool) -> Result<()> {
    for statement in DDL {
        sqlx::query(statement).execute(pool).await.map_err(store_err)?;
    }
    Ok(())
}
