//! Device registry repository. The poller reads `pollable_devices` on
//! every refresh and writes liveness (`last_polled`, `last_error`) after
//! each sample.

use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;

use rc_domain::device::Device;
use rc_domain::{Error, Result};

use crate::{clamp_limit, fmt_dt, parse_dt, parse_json, parse_opt_dt, store_err, Store};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Debug)]
pub struct NewDevice {
    pub name: String,
    pub device_type: String,
    pub address: String,
    pub poll_enabled: bool,
    pub poll_interval: i64,
    pub is_active: bool,
    pub config: serde_json::Value,
}

#[derive(Clone, Debug, Default)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub device_type: Option<String>,
    pub address: Option<String>,
    pub poll_enabled: Option<bool>,
    pub poll_interval: Option<i64>,
    pub is_active: Option<bool>,
    pub config: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default)]
pub struct DeviceFilter {
    pub device_type: Option<String>,
    pub is_active: Option<bool>,
    pub poll_enabled: Option<bool>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const COLUMNS: &str = "id, name, device_type, address, poll_enabled, poll_interval, \
     is_active, config, last_polled, last_error, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct DeviceRow {
    id: i64,
    name: String,
    device_type: String,
    address: String,
    poll_enabled: bool,
    poll_interval: i64,
    is_active: bool,
    config: String,
    last_polled: Option<String>,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<DeviceRow> for Device {
    type Error = Error;

    fn try_from(row: DeviceRow) -> Result<Self> {
        Ok(Device {
            id: row.id,
            name: row.name,
            device_type: row.device_type,
            address: row.address,
            poll_enabled: row.poll_enabled,
            poll_interval: row.poll_interval,
            is_active: row.is_active,
            config: parse_json("config", &row.config)?,
            last_polled: parse_opt_dt("last_polled", row.last_polled)?,
            last_error: row.last_error,
            created_at: parse_dt("created_at", &row.created_at)?,
            updated_at: parse_dt("updated_at", &row.updated_at)?,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Repository
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Store {
    pub async fn create_device(&self, new: &NewDevice, now: DateTime<Utc>) -> Result<Device> {
        let result = sqlx::query(
            r#"
            INSERT INTO devices (
                name, device_type, address, poll_enabled, poll_interval,
                is_active, config, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.name)
        .bind(&new.device_type)
        .bind(&new.address)
        .bind(new.poll_enabled)
        .bind(new.poll_interval)
        .bind(new.is_active)
        .bind(new.config.to_string())
        .bind(fmt_dt(&now))
        .bind(fmt_dt(&now))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        let id = result.last_insert_rowid();
        self.get_device(id)
            .await?
            .ok_or_else(|| Error::not_found("device", id))
    }

    pub async fn get_device(&self, id: i64) -> Result<Option<Device>> {
        let row = sqlx::query_as::<_, DeviceRow>(&format!(
            "SELECT {COLUMNS} FROM devices WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(TryInto::try_into).transpose()
    }

    pub async fn list_devices(&self, filter: &DeviceFilter) -> Result<Vec<Device>> {
        let mut query = QueryBuilder::new(format!("SELECT {COLUMNS} FROM devices WHERE 1=1"));
        if let Some(ref t) = filter.device_type {
            query.push(" AND device_type = ");
            query.push_bind(t.clone());
        }
        if let Some(active) = filter.is_active {
            query.push(" AND is_active = ");
            query.push_bind(active);
        }
        if let Some(poll) = filter.poll_enabled {
            query.push(" AND poll_enabled = ");
            query.push_bind(poll);
        }
        query.push(" ORDER BY id ASC LIMIT ");
        query.push_bind(clamp_limit(filter.limit));
        query.push(" OFFSET ");
        query.push_bind(filter.skip.unwrap_or(0).max(0));

        let rows = query
            .build_query_as::<DeviceRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Devices the poller should be sampling.
    pub async fn pollable_devices(&self) -> Result<Vec<Device>> {
        let rows = sqlx::query_as::<_, DeviceRow>(&format!(
            "SELECT {COLUMNS} FROM devices
             WHERE poll_enabled = 1 AND is_active = 1
             ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn update_device(
        &self,
        id: i64,
        update: DeviceUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Device>> {
        let Some(current) = self.get_device(id).await? else {
            return Ok(None);
        };

        let name = update.name.unwrap_or(current.name);
        let device_type = update.device_type.unwrap_or(current.device_type);
        let address = update.address.unwrap_or(current.address);
        let poll_enabled = update.poll_enabled.unwrap_or(current.poll_enabled);
        let poll_interval = update.poll_interval.unwrap_or(current.poll_interval);
        let is_active = update.is_active.unwrap_or(current.is_active);
        let config = update.config.unwrap_or(current.config);

        sqlx::query(
            r#"
            UPDATE devices
            SET name = ?, device_type = ?, address = ?, poll_enabled = ?,
                poll_interval = ?, is_active = ?, config = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&name)
        .bind(&device_type)
        .bind(&address)
        .bind(poll_enabled)
        .bind(poll_interval)
        .bind(is_active)
        .bind(config.to_string())
        .bind(fmt_dt(&now))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        self.get_device(id).await
    }

    /// Cascades to readings, actions, and alerts via foreign keys.
    pub async fn delete_device(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM devices WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    // ── poller liveness updates ──────────────────────────────────────

    pub async fn mark_poll_success(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE devices SET last_polled = ?, last_error = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(fmt_dt(&at))
        .bind(fmt_dt(&at))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    pub async fn mark_poll_failure(&self, id: i64, at: DateTime<Utc>, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE devices SET last_polled = ?, last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(fmt_dt(&at))
        .bind(error)
        .bind(fmt_dt(&at))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    pub async fn count_devices(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM devices")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
    }

    fn probe(name: &str, poll_enabled: bool) -> NewDevice {
        NewDevice {
            name: name.into(),
            device_type: "temperature_sensor".into(),
            address: "28-0316a2797b1a".into(),
            poll_enabled,
            poll_interval: 10,
            is_active: true,
            config: json!({"units": "C"}),
        }
    }

    #[tokio::test]
    async fn create_and_get_round_trips() {
        let store = Store::memory().await.unwrap();
        let d = store.create_device(&probe("display", true), now()).await.unwrap();
        let fetched = store.get_device(d.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "display");
        assert_eq!(fetched.config, json!({"units": "C"}));
        assert!(fetched.last_polled.is_none());
    }

    #[tokio::test]
    async fn pollable_requires_both_flags() {
        let store = Store::memory().await.unwrap();
        store.create_device(&probe("on", true), now()).await.unwrap();
        store.create_device(&probe("off", false), now()).await.unwrap();
        let inactive = store.create_device(&probe("inactive", true), now()).await.unwrap();
        store
            .update_device(
                inactive.id,
                DeviceUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
                now(),
            )
            .await
            .unwrap();

        let pollable = store.pollable_devices().await.unwrap();
        assert_eq!(pollable.len(), 1);
        assert_eq!(pollable[0].name, "on");
    }

    #[tokio::test]
    async fn poll_success_clears_last_error() {
        let store = Store::memory().await.unwrap();
        let d = store.create_device(&probe("p", true), now()).await.unwrap();

        store
            .mark_poll_failure(d.id, now(), "sensor not responding")
            .await
            .unwrap();
        let failed = store.get_device(d.id).await.unwrap().unwrap();
        assert_eq!(failed.last_error.as_deref(), Some("sensor not responding"));
        assert_eq!(failed.last_polled, Some(now()));

        let later = now() + chrono::Duration::seconds(10);
        store.mark_poll_success(d.id, later).await.unwrap();
        let ok = store.get_device(d.id).await.unwrap().unwrap();
        assert!(ok.last_error.is_none());
        assert_eq!(ok.last_polled, Some(later));
    }

    #[tokio::test]
    async fn list_filters_by_type_and_flags() {
        let store = Store::memory().await.unwrap();
        store.create_device(&probe("t1", true), now()).await.unwrap();
        let mut outlet = probe("o1", false);
        outlet.device_type = "outlet".into();
        store.create_device(&outlet, now()).await.unwrap();

        let outlets = store
            .list_devices(&DeviceFilter {
                device_type: Some("outlet".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(outlets.len(), 1);
        assert_eq!(outlets[0].name, "o1");

        let polling = store
            .list_devices(&DeviceFilter {
                poll_enabled: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(polling.len(), 1);
    }

    #[tokio::test]
    async fn delete_cascades_to_dependents() {
        let store = Store::memory().await.unwrap();
        let d = store.create_device(&probe("doomed", true), now()).await.unwrap();
        store
            .insert_reading(
                &crate::readings::NewReading {
                    device_id: d.id,
                    timestamp: now(),
                    value: Some(25.0),
                    json_value: None,
                    metadata: None,
                },
            )
            .await
            .unwrap();

        assert!(store.delete_device(d.id).await.unwrap());
        let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM readings")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(left, 0);
    }
}
