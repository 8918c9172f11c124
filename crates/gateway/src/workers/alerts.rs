//! Alert evaluator — for every enabled alert, compares the latest fresh
//! reading of the watched metric against the threshold, opening an event
//! on a new breach and resolving the open event when the value recovers.
//!
//! Per-alert failures are isolated: an evaluation error is counted and
//! logged, and the cycle moves on.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;

use rc_domain::alert::Alert;
use rc_domain::Result;
use rc_store::alerts::NewAlertEvent;
use rc_store::Store;
use rc_timing::Clock;

/// Floor of the reading-freshness window in seconds.
const FRESHNESS_FLOOR_SECS: i64 = 300;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cycle summary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct CycleSummary {
    pub evaluated: usize,
    pub triggered: usize,
    pub resolved: usize,
    pub errors: usize,
    pub skipped: usize,
}

/// Outcome of a single alert evaluation.
enum Evaluation {
    Triggered,
    Resolved,
    NoChange,
    Skipped(&'static str),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AlertWorker {
    store: Store,
    clock: Arc<dyn Clock>,
    interval: StdDuration,
}

impl AlertWorker {
    pub fn new(store: Store, clock: Arc<dyn Clock>, interval_secs: u64) -> Self {
        Self {
            store,
            clock,
            interval: StdDuration::from_secs(interval_secs.max(1)),
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(interval_secs = self.interval.as_secs(), "alert worker started");
        loop {
            match self.run_cycle().await {
                Ok(summary) if summary.triggered + summary.resolved + summary.errors > 0 => {
                    tracing::info!(?summary, "alert cycle");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "alert cycle failed"),
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        tracing::info!("alert worker stopped");
    }

    /// Evaluate every enabled alert once.
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let alerts = self.store.enabled_alerts().await?;
        let now = self.clock.now_utc();
        let mut summary = CycleSummary::default();

        for alert in alerts {
            match self.evaluate(&alert, now).await {
                Ok(Evaluation::Triggered) => {
                    summary.evaluated += 1;
                    summary.triggered += 1;
                }
                Ok(Evaluation::Resolved) => {
                    summary.evaluated += 1;
                    summary.resolved += 1;
                }
                Ok(Evaluation::NoChange) => summary.evaluated += 1,
                Ok(Evaluation::Skipped(reason)) => {
                    summary.skipped += 1;
                    tracing::debug!(alert_id = alert.id, reason, "alert skipped");
                }
                Err(e) => {
                    summary.errors += 1;
                    tracing::warn!(alert_id = alert.id, error = %e, "alert evaluation failed");
                }
            }
        }
        Ok(summary)
    }

    async fn evaluate(&self, alert: &Alert, now: DateTime<Utc>) -> Result<Evaluation> {
        let device = match self.store.get_device(alert.device_id).await? {
            Some(d) if d.is_active => d,
            Some(_) => return Ok(Evaluation::Skipped("device inactive")),
            None => return Ok(Evaluation::Skipped("device missing")),
        };

        let reading = match self.store.latest_reading(device.id).await? {
            Some(r) => r,
            None => return Ok(Evaluation::Skipped("no readings")),
        };

        // A polled device must have a recent sample; a stale one neither
        // opens nor closes events. Push-only devices are exempt.
        if device.poll_enabled {
            let freshness = Duration::seconds((5 * device.poll_interval).max(FRESHNESS_FLOOR_SECS));
            if now - reading.timestamp > freshness {
                return Ok(Evaluation::Skipped("reading stale"));
            }
        }

        let value = match reading.metric(&alert.metric) {
            Some(v) => v,
            None => return Ok(Evaluation::Skipped("metric absent")),
        };

        let breached = alert.operator.compare(value, alert.threshold_value);
        let open = self.store.open_event_for_alert(alert.id).await?;

        match (breached, open) {
            (true, None) => {
                let created = self
                    .store
                    .open_alert_event(&NewAlertEvent {
                        alert_id: alert.id,
                        device_id: device.id,
                        triggered_at: now,
                        current_value: value,
                        threshold_value: alert.threshold_value,
                        operator: alert.operator,
                        metric: alert.metric.clone(),
                        metadata: None,
                    })
                    .await?;
                match created {
                    Some(event) => {
                        tracing::info!(
                            alert_id = alert.id,
                            event_id = event.id,
                            value,
                            threshold = alert.threshold_value,
                            "alert triggered"
                        );
                        Ok(Evaluation::Triggered)
                    }
                    // Lost the open race to a concurrent evaluator.
                    None => Ok(Evaluation::NoChange),
                }
            }
            (false, Some(event)) => {
                self.store
                    .resolve_alert_event(event.id, Some(value), now)
                    .await?;
                tracing::info!(
                    alert_id = alert.id,
                    event_id = event.id,
                    value,
                    "alert resolved"
                );
                Ok(Evaluation::Resolved)
            }
            _ => Ok(Evaluation::NoChange),
        }
    }
}
