//! Scheduler worker — recomputes `next_run` for due schedules,
//! materializes device actions, and dispatches pending actions through
//! the device controller.
//!
//! One worker instance per deployment (single writer). Missed windows
//! fire once when late: a schedule that was overdue across an outage
//! materializes one action at the most recent missed instant and then
//! advances past everything else — never a burst of catch-up fires.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;

use rc_domain::action::ActionStatus;
use rc_domain::schedule::{RunStatus, Schedule, ScheduleType};
use rc_domain::{Error, Result};
use rc_drivers::DeviceController;
use rc_store::actions::NewAction;
use rc_store::Store;
use rc_timing::{next_fire, Clock, NextFire};

/// Hard ceiling on a single device-controller call.
const EXECUTE_DEADLINE: StdDuration = StdDuration::from_secs(10);

/// Most-recent-missed-instant walk cap. A schedule overdue by more
/// windows than this fires at the latest instant found inside the cap.
const MAX_MISSED_WALK: usize = 512;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Health snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Debug, serde::Serialize)]
pub struct SchedulerHealth {
    pub uptime_seconds: i64,
    pub total_schedules: i64,
    pub last_check: Option<DateTime<Utc>>,
    pub next_check: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct HealthInner {
    total_schedules: i64,
    last_check: Option<DateTime<Utc>>,
    next_check: Option<DateTime<Utc>>,
}

/// Per-tick counters, returned by [`SchedulerWorker::run_once`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct TickSummary {
    pub due: usize,
    pub materialized: usize,
    pub dispatched: usize,
    pub failed: usize,
    pub disabled: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SchedulerWorker {
    store: Store,
    controller: Arc<dyn DeviceController>,
    clock: Arc<dyn Clock>,
    tick: StdDuration,
    started_at: DateTime<Utc>,
    health: parking_lot::RwLock<HealthInner>,
}

impl SchedulerWorker {
    pub fn new(
        store: Store,
        controller: Arc<dyn DeviceController>,
        clock: Arc<dyn Clock>,
        interval_secs: u64,
    ) -> Self {
        let started_at = clock.now_utc();
        Self {
            store,
            controller,
            clock,
            tick: StdDuration::from_secs(interval_secs.clamp(5, 3600)),
            started_at,
            health: parking_lot::RwLock::new(HealthInner::default()),
        }
    }

    pub fn health(&self) -> SchedulerHealth {
        let inner = self.health.read();
        SchedulerHealth {
            uptime_seconds: (self.clock.now_utc() - self.started_at).num_seconds(),
            total_schedules: inner.total_schedules,
            last_check: inner.last_check,
            next_check: inner.next_check,
        }
    }

    /// Tick loop. A store failure aborts the tick; the next attempt backs
    /// off (jittered, capped at one tick) before resuming the cadence.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(tick_secs = self.tick.as_secs(), "scheduler worker started");
        let mut consecutive_failures: u32 = 0;

        loop {
            match self.run_once().await {
                Ok(summary) => {
                    consecutive_failures = 0;
                    if summary != TickSummary::default() {
                        tracing::debug!(?summary, "scheduler tick");
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    tracing::warn!(error = %e, consecutive_failures, "scheduler tick failed");
                }
            }

            let delay = self.delay_after(consecutive_failures);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        tracing::info!("scheduler worker stopped");
    }

    /// Exponential backoff with jitter after failed ticks, capped at one
    /// tick interval.
    fn delay_after(&self, consecutive_failures: u32) -> StdDuration {
        if consecutive_failures == 0 {
            return self.tick;
        }
        use rand::Rng;
        let base = StdDuration::from_secs(1 << consecutive_failures.min(12));
        let capped = base.min(self.tick);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis().max(1) as u64 / 4);
        capped
            .checked_add(StdDuration::from_millis(jitter_ms))
            .unwrap_or(capped)
            .min(self.tick)
    }

    /// One full tick: due-set selection, recompute/materialize/advance
    /// per schedule, then dispatch of every due pending action.
    pub async fn run_once(&self) -> Result<TickSummary> {
        let now = self.clock.now_utc();
        let delta = Duration::milliseconds(self.tick.as_millis() as i64 / 2);
        let mut summary = TickSummary::default();

        let due = self.store.due_schedules(now + delta).await?;
        summary.due = due.len();

        for schedule in due {
            match self.process_schedule(&schedule, now).await {
                Ok((materialized, disabled)) => {
                    summary.materialized += materialized;
                    summary.disabled += usize::from(disabled);
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(
                        schedule_id = schedule.id,
                        error = %e,
                        "schedule processing failed"
                    );
                }
            }
        }

        let (dispatched, failed) = self.dispatch_due(now).await?;
        summary.dispatched = dispatched;
        summary.failed += failed;

        let total_schedules = self.store.count_schedules().await?;
        {
            let mut inner = self.health.write();
            inner.total_schedules = total_schedules;
            inner.last_check = Some(now);
            inner.next_check =
                Some(now + Duration::from_std(self.tick).unwrap_or_else(|_| Duration::zero()));
        }

        Ok(summary)
    }

    // ── recompute / materialize / advance ────────────────────────────

    /// Returns (actions materialized, schedule disabled this tick).
    async fn process_schedule(&self, schedule: &Schedule, now: DateTime<Utc>) -> Result<(usize, bool)> {
        // A stored due instant fires at the most recent missed window.
        if let Some(t_due) = schedule.next_run {
            if t_due <= now {
                let fire_at = self.most_recent_due(schedule, t_due, now);
                let materialized = self.materialize(schedule, fire_at, now).await?;
                let disabled = self.advance(schedule, fire_at, now).await?;
                return Ok((materialized, disabled));
            }
        }

        // next_run unset (fresh schedule, or cleared by an update):
        // recompute from scratch.
        match next_fire(schedule, now) {
            NextFire::At(t) if t <= now => {
                let materialized = self.materialize(schedule, t, now).await?;
                let disabled = self.advance(schedule, t, now).await?;
                Ok((materialized, disabled))
            }
            NextFire::At(t) => {
                self.store.advance_schedule(schedule.id, Some(t), now).await?;
                Ok((0, false))
            }
            NextFire::Expired => {
                self.store.disable_schedule(schedule.id, None, now).await?;
                tracing::info!(schedule_id = schedule.id, "schedule expired, disabled");
                Ok((0, true))
            }
            NextFire::Invalid(msg) => {
                self.store.disable_schedule(schedule.id, Some(&msg), now).await?;
                tracing::warn!(schedule_id = schedule.id, reason = %msg, "schedule invalid, disabled");
                Ok((0, true))
            }
        }
    }

    /// The latest firing instant `<= now`, starting from the stored due
    /// instant. Bounded walk; intervals use the closed form.
    fn most_recent_due(
        &self,
        schedule: &Schedule,
        t_due: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        if schedule.schedule_type == ScheduleType::Interval {
            if let (Some(start), Some(interval)) = (schedule.start_time, schedule.interval_seconds)
            {
                if interval > 0 && start <= now {
                    let interval_ms = interval * 1000;
                    let k = (now - start).num_milliseconds() / interval_ms;
                    let candidate = start + Duration::milliseconds(k * interval_ms);
                    return candidate.max(t_due);
                }
            }
            return t_due;
        }

        let mut cursor = t_due;
        for _ in 0..MAX_MISSED_WALK {
            match next_fire(schedule, cursor + Duration::milliseconds(1)) {
                NextFire::At(t) if t <= now => cursor = t,
                _ => break,
            }
        }
        cursor
    }

    /// Create one pending action per device id at `fire_at`, snapshotting
    /// the schedule's parameters. Duplicates (retry after a crash) are
    /// silently dropped by the uniqueness guard.
    async fn materialize(
        &self,
        schedule: &Schedule,
        fire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut created = 0;
        for &device_id in &schedule.device_ids {
            let new = NewAction {
                schedule_id: Some(schedule.id),
                device_id,
                action_type: schedule.action_type,
                parameters: schedule.action_params.clone(),
                scheduled_time: fire_at,
            };
            if self.store.materialize_action(&new, now).await?.is_some() {
                created += 1;
            }
        }
        if created > 0 {
            tracing::info!(
                schedule_id = schedule.id,
                fire_at = %fire_at,
                actions = created,
                "materialized schedule firing"
            );
        }
        Ok(created)
    }

    /// Move `next_run` past the fired instant, or disable the schedule
    /// when its life ends (one_off fired, end_time reached, definition
    /// turned invalid). Returns whether the schedule was disabled.
    async fn advance(
        &self,
        schedule: &Schedule,
        fired_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        // One-offs are done after their single materialization.
        if schedule.schedule_type == ScheduleType::OneOff {
            self.store.disable_schedule(schedule.id, None, now).await?;
            return Ok(true);
        }

        let after = fired_at.max(now) + Duration::milliseconds(1);
        match next_fire(schedule, after) {
            NextFire::At(t) => {
                self.store.advance_schedule(schedule.id, Some(t), now).await?;
                Ok(false)
            }
            NextFire::Expired => {
                self.store.disable_schedule(schedule.id, None, now).await?;
                Ok(true)
            }
            NextFire::Invalid(msg) => {
                self.store.disable_schedule(schedule.id, Some(&msg), now).await?;
                Ok(true)
            }
        }
    }

    // ── dispatch ─────────────────────────────────────────────────────

    /// Claim and execute every pending action due at/before `now`, in
    /// `(scheduled_time, id)` order. Returns (dispatched, failed).
    async fn dispatch_due(&self, now: DateTime<Utc>) -> Result<(usize, usize)> {
        let due = self.store.due_pending_actions(now).await?;
        let mut dispatched = 0;
        let mut failed = 0;
        for action in due {
            match self.execute_action(action.id).await {
                Ok(status) => {
                    dispatched += 1;
                    if status == ActionStatus::Failed {
                        failed += 1;
                    }
                }
                Err(Error::Conflict(_)) => {
                    // Lost the claim race; another dispatcher owns it.
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(action_id = action.id, error = %e, "dispatch failed");
                }
            }
        }
        Ok((dispatched, failed))
    }

    /// Claim one action and run it through the controller. Also the
    /// backing for the REST force-execute endpoint. Returns the terminal
    /// status, or `Error::Conflict` when the action was not pending.
    pub async fn execute_action(&self, action_id: i64) -> Result<ActionStatus> {
        if !self.store.claim_action(action_id).await? {
            return Err(Error::Conflict(format!("action {action_id} is not pending")));
        }
        let action = self
            .store
            .get_action(action_id)
            .await?
            .ok_or_else(|| Error::not_found("device_action", action_id))?;

        let outcome = match self.store.get_device(action.device_id).await? {
            None => Err(Error::Driver(format!("device {} not found", action.device_id))),
            Some(device) => {
                match tokio::time::timeout(
                    EXECUTE_DEADLINE,
                    self.controller
                        .execute(&device, action.action_type, &action.parameters),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(format!(
                        "device {} did not answer within {}s",
                        device.id,
                        EXECUTE_DEADLINE.as_secs()
                    ))),
                }
            }
        };

        let executed = self.clock.now_utc();
        let (status, run_status) = match outcome {
            Ok(result) => {
                self.store
                    .complete_action(
                        action_id,
                        ActionStatus::Success,
                        Some(&result),
                        None,
                        executed,
                    )
                    .await?;
                (ActionStatus::Success, RunStatus::Success)
            }
            Err(e) => {
                let message = e.to_string();
                self.store
                    .complete_action(
                        action_id,
                        ActionStatus::Failed,
                        None,
                        Some(&message),
                        executed,
                    )
                    .await?;
                tracing::warn!(action_id, error = %message, "action execution failed");
                (ActionStatus::Failed, RunStatus::Failed)
            }
        };

        if let Some(schedule_id) = action.schedule_id {
            self.store
                .record_schedule_run(schedule_id, action.scheduled_time, run_status, executed)
                .await?;
        }
        Ok(status)
    }

    /// Delete terminal actions older than `days` (accepted range 1..=365).
    pub async fn cleanup(&self, days: i64) -> Result<u64> {
        if !(1..=365).contains(&days) {
            return Err(Error::Validation(format!(
                "days must be within 1..=365 (got {days})"
            )));
        }
        let removed = self.store.cleanup_actions(days, self.clock.now_utc()).await?;
        if removed > 0 {
            tracing::info!(removed, days, "cleaned up terminal device actions");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rc_domain::schedule::ActionType;
    use rc_drivers::ScriptedController;
    use rc_store::actions::ActionFilter;
    use rc_store::devices::NewDevice;
    use rc_store::schedules::NewSchedule;
    use rc_timing::FixedClock;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
    }

    async fn new_device(store: &Store, name: &str) -> i64 {
        store
            .create_device(
                &NewDevice {
                    name: name.into(),
                    device_type: "outlet".into(),
                    address: String::new(),
                    poll_enabled: false,
                    poll_interval: 60,
                    is_active: true,
                    config: json!({}),
                },
                t0(),
            )
            .await
            .unwrap()
            .id
    }

    fn interval_schedule(device_ids: Vec<i64>, start: DateTime<Utc>, secs: i64) -> NewSchedule {
        NewSchedule {
            name: "interval".into(),
            schedule_type: ScheduleType::Interval,
            cron_expression: None,
            interval_seconds: Some(secs),
            start_time: Some(start),
            end_time: None,
            timezone: "UTC".into(),
            device_ids,
            action_type: ActionType::Off,
            action_params: json!({}),
            is_enabled: true,
        }
    }

    struct Harness {
        store: Store,
        clock: Arc<FixedClock>,
        controller: Arc<ScriptedController>,
        worker: SchedulerWorker,
    }

    async fn harness(at: DateTime<Utc>) -> Harness {
        let store = Store::memory().await.unwrap();
        let clock = Arc::new(FixedClock::new(at));
        let controller = Arc::new(ScriptedController::always_ok());
        let worker = SchedulerWorker::new(
            store.clone(),
            controller.clone(),
            clock.clone(),
            30,
        );
        Harness {
            store,
            clock,
            controller,
            worker,
        }
    }

    #[tokio::test]
    async fn interval_schedule_end_to_end() {
        // 60s interval from 00:00:00Z, worker first sees
        // it at 00:02:45 → next_run 00:03:00; at 00:03:00 one action
        // materializes, executes to success, and next_run becomes 00:04:00.
        let h = harness(t0() + Duration::seconds(165)).await; // 00:02:45
        let device_id = new_device(&h.store, "pump").await;
        let schedule = h
            .store
            .create_schedule(interval_schedule(vec![device_id], t0(), 60), t0())
            .await
            .unwrap();

        h.worker.run_once().await.unwrap();
        let s = h.store.get_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(s.next_run, Some(t0() + Duration::seconds(180))); // 00:03:00

        h.clock.set(t0() + Duration::seconds(180)); // 00:03:00
        h.worker.run_once().await.unwrap();

        let actions = h
            .store
            .list_actions(&ActionFilter {
                schedule_id: Some(schedule.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].status, ActionStatus::Success);
        assert_eq!(actions[0].scheduled_time, t0() + Duration::seconds(180));
        assert_eq!(actions[0].executed_time, Some(t0() + Duration::seconds(180)));

        let s = h.store.get_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(s.last_run, Some(t0() + Duration::seconds(180)));
        assert_eq!(s.last_run_status, Some(RunStatus::Success));
        assert_eq!(s.next_run, Some(t0() + Duration::seconds(240))); // 00:04:00
        assert_eq!(h.controller.calls().len(), 1);
    }

    #[tokio::test]
    async fn one_off_fires_all_devices_then_disables() {
        // A one_off at 14:30 with two devices: both rows
        // terminal, schedule disabled, next_run NULL.
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap();
        let h = harness(start).await;
        let d1 = new_device(&h.store, "light-left").await;
        let d2 = new_device(&h.store, "light-right").await;
        let schedule = h
            .store
            .create_schedule(
                NewSchedule {
                    name: "sunrise".into(),
                    schedule_type: ScheduleType::OneOff,
                    cron_expression: None,
                    interval_seconds: None,
                    start_time: Some(start),
                    end_time: None,
                    timezone: "UTC".into(),
                    device_ids: vec![d1, d2],
                    action_type: ActionType::On,
                    action_params: json!({}),
                    is_enabled: true,
                },
                start - Duration::hours(1),
            )
            .await
            .unwrap();
        // Seed next_run as an earlier tick would have.
        h.store
            .advance_schedule(schedule.id, Some(start), start - Duration::minutes(5))
            .await
            .unwrap();

        h.worker.run_once().await.unwrap();

        let actions = h
            .store
            .list_actions(&ActionFilter {
                schedule_id: Some(schedule.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(actions.len(), 2);
        assert!(actions.iter().all(|a| a.status == ActionStatus::Success));

        let s = h.store.get_schedule(schedule.id).await.unwrap().unwrap();
        assert!(!s.is_enabled);
        assert!(s.next_run.is_none());
    }

    #[tokio::test]
    async fn overdue_schedule_fires_once_at_most_recent_instant() {
        // Down for several windows: exactly one action, at the latest
        // missed boundary, and next_run moves past now.
        let h = harness(t0()).await;
        let device_id = new_device(&h.store, "doser").await;
        let schedule = h
            .store
            .create_schedule(interval_schedule(vec![device_id], t0(), 60), t0())
            .await
            .unwrap();
        // Stored next_run is 00:01:00; the process "sleeps" until 00:07:45.
        h.store
            .advance_schedule(schedule.id, Some(t0() + Duration::seconds(60)), t0())
            .await
            .unwrap();
        h.clock.set(t0() + Duration::seconds(465)); // 00:07:45

        h.worker.run_once().await.unwrap();

        let actions = h
            .store
            .list_actions(&ActionFilter {
                schedule_id: Some(schedule.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(actions.len(), 1, "no catch-up burst");
        assert_eq!(actions[0].scheduled_time, t0() + Duration::seconds(420)); // 00:07:00

        let s = h.store.get_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(s.next_run, Some(t0() + Duration::seconds(480))); // 00:08:00
    }

    #[tokio::test]
    async fn rematerialization_after_restart_is_deduplicated() {
        // Crash recovery: an action exists but advancement never
        // committed. The rerun hits the unique index, keeps one row, and
        // still advances next_run.
        let h = harness(t0() + Duration::seconds(180)).await;
        let device_id = new_device(&h.store, "pump").await;
        let schedule = h
            .store
            .create_schedule(interval_schedule(vec![device_id], t0(), 60), t0())
            .await
            .unwrap();
        let fire_at = t0() + Duration::seconds(180);
        h.store
            .advance_schedule(schedule.id, Some(fire_at), t0())
            .await
            .unwrap();
        // The "crashed" tick inserted the action but never advanced.
        h.store
            .materialize_action(
                &NewAction {
                    schedule_id: Some(schedule.id),
                    device_id,
                    action_type: ActionType::Off,
                    parameters: json!({}),
                    scheduled_time: fire_at,
                },
                fire_at,
            )
            .await
            .unwrap();

        h.worker.run_once().await.unwrap();

        let actions = h
            .store
            .list_actions(&ActionFilter {
                schedule_id: Some(schedule.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(actions.len(), 1, "unique index must suppress the duplicate");
        let s = h.store.get_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(s.next_run, Some(fire_at + Duration::seconds(60)));
    }

    #[tokio::test]
    async fn failed_execution_terminates_failed_and_propagates() {
        let h = harness(t0() + Duration::seconds(60)).await;
        let device_id = new_device(&h.store, "heater").await;
        let schedule = h
            .store
            .create_schedule(interval_schedule(vec![device_id], t0(), 60), t0())
            .await
            .unwrap();
        let controller = Arc::new(ScriptedController::new(vec![Err(Error::Driver(
            "outlet unreachable".into(),
        ))]));
        let worker = SchedulerWorker::new(
            h.store.clone(),
            controller,
            h.clock.clone(),
            30,
        );

        worker.run_once().await.unwrap();

        let actions = h
            .store
            .list_actions(&ActionFilter {
                schedule_id: Some(schedule.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].status, ActionStatus::Failed);
        assert!(actions[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("outlet unreachable"));

        let s = h.store.get_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(s.last_run_status, Some(RunStatus::Failed));
        // No automatic retry: the action stays failed, the schedule moves on.
        assert!(s.next_run.unwrap() > h.clock.now_utc());
    }

    #[tokio::test]
    async fn invalid_schedule_is_disabled_with_error() {
        let h = harness(t0()).await;
        let device_id = new_device(&h.store, "x").await;
        let schedule = h
            .store
            .create_schedule(
                NewSchedule {
                    name: "broken".into(),
                    schedule_type: ScheduleType::Cron,
                    cron_expression: Some("not a cron".into()),
                    interval_seconds: None,
                    start_time: None,
                    end_time: None,
                    timezone: "UTC".into(),
                    device_ids: vec![device_id],
                    action_type: ActionType::On,
                    action_params: json!({}),
                    is_enabled: true,
                },
                t0(),
            )
            .await
            .unwrap();

        h.worker.run_once().await.unwrap();

        let s = h.store.get_schedule(schedule.id).await.unwrap().unwrap();
        assert!(!s.is_enabled);
        assert_eq!(s.last_run_status, Some(RunStatus::Failed));
        assert!(s.error_message.unwrap().contains("invalid cron"));
    }

    #[tokio::test]
    async fn expired_schedule_is_disabled_cleanly() {
        let h = harness(t0() + Duration::hours(2)).await;
        let device_id = new_device(&h.store, "x").await;
        let mut new = interval_schedule(vec![device_id], t0(), 60);
        new.end_time = Some(t0() + Duration::hours(1));
        let schedule = h.store.create_schedule(new, t0()).await.unwrap();

        h.worker.run_once().await.unwrap();

        let s = h.store.get_schedule(schedule.id).await.unwrap().unwrap();
        assert!(!s.is_enabled);
        assert!(s.error_message.is_none());
    }

    #[tokio::test]
    async fn execute_action_conflicts_when_not_pending() {
        let h = harness(t0()).await;
        let device_id = new_device(&h.store, "x").await;
        let action = h
            .store
            .create_manual_action(
                &NewAction {
                    schedule_id: None,
                    device_id,
                    action_type: ActionType::On,
                    parameters: json!({}),
                    scheduled_time: t0(),
                },
                t0(),
            )
            .await
            .unwrap();

        assert_eq!(
            h.worker.execute_action(action.id).await.unwrap(),
            ActionStatus::Success
        );
        let err = h.worker.execute_action(action.id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn cleanup_validates_day_range() {
        let h = harness(t0()).await;
        assert!(matches!(
            h.worker.cleanup(0).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            h.worker.cleanup(366).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(h.worker.cleanup(30).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn health_reports_counts_and_checks() {
        let h = harness(t0()).await;
        let device_id = new_device(&h.store, "x").await;
        h.store
            .create_schedule(interval_schedule(vec![device_id], t0(), 60), t0())
            .await
            .unwrap();

        h.worker.run_once().await.unwrap();
        let health = h.worker.health();
        assert_eq!(health.total_schedules, 1);
        assert_eq!(health.last_check, Some(t0()));
        assert_eq!(health.next_check, Some(t0() + Duration::seconds(30)));
    }

    #[tokio::test]
    async fn tick_interval_is_clamped() {
        let h = harness(t0()).await;
        let worker = SchedulerWorker::new(
            h.store.clone(),
            h.controller.clone(),
            h.clock.clone(),
            1,
        );
        assert_eq!(worker.tick, StdDuration::from_secs(5));
    }
}
