//! Poller worker — keeps an in-memory registry of pollable devices,
//! runs one ticker task per device at its own interval, writes readings,
//! and maintains device liveness (`last_polled`, `last_error`).
//!
//! A single poll failure never touches other devices: each ticker owns
//! its errors. Registry refreshes diff the store against the running
//! tickers, so enabling/disabling a device takes effect within one
//! refresh cycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;

use rc_domain::device::Device;
use rc_domain::Result;
use rc_drivers::DriverRegistry;
use rc_store::readings::NewReading;
use rc_store::Store;
use rc_timing::Clock;

/// Ceiling on a single driver poll, regardless of interval.
const MAX_POLL_DEADLINE: StdDuration = StdDuration::from_secs(10);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Debug, serde::Serialize)]
pub struct PollerStatus {
    pub registered_devices: usize,
    pub refresh_interval_secs: u64,
    pub retention_days: u64,
    pub last_refresh: Option<DateTime<Utc>>,
}

/// A running per-device ticker. Cancelling the token stops the task.
struct Ticker {
    cancel: CancellationToken,
    poll_interval: i64,
    /// Device revision the ticker was armed with; a change re-arms it.
    updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PollerWorker {
    store: Store,
    drivers: Arc<DriverRegistry>,
    clock: Arc<dyn Clock>,
    refresh_interval: StdDuration,
    retention_days: u64,
    tickers: tokio::sync::Mutex<HashMap<i64, Ticker>>,
    /// Last written timestamp per device, for the monotonic clamp.
    last_stamps: Arc<parking_lot::Mutex<HashMap<i64, DateTime<Utc>>>>,
    last_refresh: parking_lot::Mutex<Option<DateTime<Utc>>>,
}

impl PollerWorker {
    pub fn new(
        store: Store,
        drivers: Arc<DriverRegistry>,
        clock: Arc<dyn Clock>,
        refresh_interval_secs: u64,
        retention_days: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            drivers,
            clock,
            refresh_interval: StdDuration::from_secs(refresh_interval_secs.max(5)),
            retention_days: retention_days.max(1),
            tickers: tokio::sync::Mutex::new(HashMap::new()),
            last_stamps: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            last_refresh: parking_lot::Mutex::new(None),
        })
    }

    pub async fn status(&self) -> PollerStatus {
        PollerStatus {
            registered_devices: self.tickers.lock().await.len(),
            refresh_interval_secs: self.refresh_interval.as_secs(),
            retention_days: self.retention_days,
            last_refresh: *self.last_refresh.lock(),
        }
    }

    /// Refresh-and-sweep loop. Ticker tasks run independently between
    /// refreshes.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!(
            refresh_secs = self.refresh_interval.as_secs(),
            retention_days = self.retention_days,
            "poller worker started"
        );
        loop {
            if let Err(e) = self.refresh().await {
                tracing::warn!(error = %e, "device registry refresh failed");
            }
            if let Err(e) = self.sweep_retention().await {
                tracing::warn!(error = %e, "reading retention sweep failed");
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.refresh_interval) => {}
            }
        }
        self.stop_all().await;
        tracing::info!("poller worker stopped");
    }

    /// Rebuild the registry: add tickers for newly pollable devices,
    /// cancel removed ones, re-arm changed ones.
    pub async fn refresh(self: &Arc<Self>) -> Result<()> {
        let devices = self.store.pollable_devices().await?;
        let mut tickers = self.tickers.lock().await;

        // Drop tickers for devices that disappeared or stopped polling.
        let live_ids: Vec<i64> = devices.iter().map(|d| d.id).collect();
        let stale: Vec<i64> = tickers
            .keys()
            .filter(|id| !live_ids.contains(id))
            .copied()
            .collect();
        for id in stale {
            if let Some(ticker) = tickers.remove(&id) {
                ticker.cancel.cancel();
                tracing::info!(device_id = id, "device unregistered from poller");
            }
        }

        // Add or re-arm.
        for device in devices {
            let rearm = match tickers.get(&device.id) {
                None => true,
                Some(t) => {
                    t.poll_interval != device.poll_interval || t.updated_at != device.updated_at
                }
            };
            if !rearm {
                continue;
            }
            if let Some(old) = tickers.remove(&device.id) {
                old.cancel.cancel();
            }
            let cancel = CancellationToken::new();
            tickers.insert(
                device.id,
                Ticker {
                    cancel: cancel.clone(),
                    poll_interval: device.poll_interval,
                    updated_at: device.updated_at,
                },
            );
            tracing::info!(
                device_id = device.id,
                poll_interval = device.poll_interval,
                "device registered with poller"
            );
            let worker = self.clone();
            tokio::spawn(async move { worker.ticker_loop(device, cancel).await });
        }

        *self.last_refresh.lock() = Some(self.clock.now_utc());
        Ok(())
    }

    async fn stop_all(&self) {
        let mut tickers = self.tickers.lock().await;
        for (_, ticker) in tickers.drain() {
            ticker.cancel.cancel();
        }
    }

    /// One device's polling loop. Fires every `poll_interval` seconds
    /// until cancelled.
    async fn ticker_loop(self: Arc<Self>, device: Device, cancel: CancellationToken) {
        let period = StdDuration::from_secs(device.poll_interval.max(1) as u64);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first `interval` tick is immediate.
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.poll_device(&device).await;
        }
    }

    /// One sample: bounded driver call, then a reading row + liveness
    /// update on success, or `last_error` on failure.
    pub async fn poll_device(&self, device: &Device) {
        let deadline = poll_deadline(device.poll_interval);
        let outcome = match self.drivers.driver_for(&device.device_type) {
            Err(e) => Err(e),
            Ok(driver) => match tokio::time::timeout(deadline, driver.poll(device)).await {
                Ok(result) => result,
                Err(_) => Err(rc_domain::Error::Timeout(format!(
                    "poll exceeded {}ms",
                    deadline.as_millis()
                ))),
            },
        };
        let now = self.clock.now_utc();

        match outcome {
            Ok(sample) => {
                let timestamp = self.clamped_timestamp(device.id, now);
                let reading = NewReading {
                    device_id: device.id,
                    timestamp,
                    value: sample.value,
                    json_value: sample.json_value,
                    metadata: sample.metadata,
                };
                if let Err(e) = self.store.insert_reading(&reading).await {
                    tracing::warn!(device_id = device.id, error = %e, "reading insert failed");
                    return;
                }
                if let Err(e) = self.store.mark_poll_success(device.id, now).await {
                    tracing::warn!(device_id = device.id, error = %e, "liveness update failed");
                }
            }
            Err(e) => {
                let message = e.to_string();
                tracing::debug!(device_id = device.id, error = %message, "poll failed");
                if let Err(e) = self.store.mark_poll_failure(device.id, now, &message).await {
                    tracing::warn!(device_id = device.id, error = %e, "liveness update failed");
                }
            }
        }
    }

    /// Per-device monotonic timestamps: if the wall clock regressed (or
    /// stood still), stamp `previous + 1ms` instead.
    fn clamped_timestamp(&self, device_id: i64, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut stamps = self.last_stamps.lock();
        let stamp = match stamps.get(&device_id) {
            Some(prev) if *prev >= now => *prev + Duration::milliseconds(1),
            _ => now,
        };
        stamps.insert(device_id, stamp);
        stamp
    }

    /// Delete readings older than the retention window.
    pub async fn sweep_retention(&self) -> Result<u64> {
        let cutoff = self.clock.now_utc() - Duration::days(self.retention_days as i64);
        let removed = self.store.prune_readings(cutoff).await?;
        if removed > 0 {
            tracing::info!(removed, retention_days = self.retention_days, "pruned readings");
        }
        Ok(removed)
    }
}

/// Poll deadline: half the interval, never more than 10s.
fn poll_deadline(poll_interval: i64) -> StdDuration {
    let half = StdDuration::from_millis((poll_interval.max(1) as u64 * 1000) / 2);
    half.min(MAX_POLL_DEADLINE)
}
