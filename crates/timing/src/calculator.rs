//! Schedule calculator — turns a schedule record plus "now" into the next
//! firing instant in UTC, or a terminal verdict.
//!
//! The calculator is pure: same `(schedule, now)` in, same answer out,
//! and `next_fire` is non-decreasing in `now`.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use rc_domain::schedule::{RecurringPattern, Schedule, ScheduleType};

use crate::cron::{parse_tz, CronExpr};

/// Verdict for one schedule at one instant.
#[derive(Clone, Debug, PartialEq)]
pub enum NextFire {
    /// Next firing instant in UTC. May be `<= now` when the schedule is
    /// currently due.
    At(DateTime<Utc>),
    /// No further firings; the schedule should be disabled.
    Expired,
    /// The definition cannot be evaluated (bad cron, unknown zone, ...).
    Invalid(String),
}

/// Compute the next firing instant for `schedule` at `now`.
pub fn next_fire(schedule: &Schedule, now: DateTime<Utc>) -> NextFire {
    let tz = match parse_tz(&schedule.timezone) {
        Ok(tz) => tz,
        Err(msg) => return NextFire::Invalid(msg),
    };

    match schedule.schedule_type {
        ScheduleType::OneOff => one_off_fire(schedule, now),
        ScheduleType::Interval => interval_fire(schedule, now),
        ScheduleType::Cron => cron_fire(schedule, now, tz),
        ScheduleType::Recurring => recurring_fire(schedule, now, tz),
        // Static seeds resolve to recurring semantics when a pattern is
        // stored, one_off semantics otherwise.
        ScheduleType::Static => {
            if RecurringPattern::from_params(&schedule.action_params).is_some() {
                recurring_fire(schedule, now, tz)
            } else {
                one_off_fire(schedule, now)
            }
        }
    }
}

/// Validate the timing-related parts of a definition without computing a
/// fire: timezone, cron grammar, recurring pattern shape. Used at the
/// REST boundary so bad definitions are rejected before they are stored.
pub fn validate_timing(
    schedule_type: ScheduleType,
    cron_expression: Option<&str>,
    timezone: &str,
    action_params: &serde_json::Value,
) -> Result<(), String> {
    parse_tz(timezone)?;

    if schedule_type == ScheduleType::Cron {
        let expr = cron_expression.ok_or("cron schedules require cron_expression")?;
        CronExpr::parse(expr).map_err(|e| format!("invalid cron expression: {e}"))?;
    }

    if schedule_type == ScheduleType::Recurring {
        let pattern = RecurringPattern::from_params(action_params)
            .ok_or("recurring schedules require action_params.recurring_pattern")??;
        pattern.wall_time()?;
        pattern.weekdays()?;
    }

    // A static seed with a pattern must carry a well-formed one.
    if schedule_type == ScheduleType::Static {
        if let Some(parsed) = RecurringPattern::from_params(action_params) {
            let pattern = parsed?;
            pattern.wall_time()?;
            pattern.weekdays()?;
        }
    }

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-type rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn one_off_fire(schedule: &Schedule, now: DateTime<Utc>) -> NextFire {
    if schedule.last_run.is_some() {
        return NextFire::Expired;
    }
    let start = match schedule.start_time {
        Some(t) => t,
        None => return NextFire::Invalid("one_off schedules require start_time".into()),
    };
    if start > now {
        NextFire::At(start)
    } else {
        NextFire::Expired
    }
}

fn interval_fire(schedule: &Schedule, now: DateTime<Utc>) -> NextFire {
    let start = match schedule.start_time {
        Some(t) => t,
        None => return NextFire::Invalid("interval schedules require start_time".into()),
    };
    let interval_ms = match schedule.interval_seconds {
        Some(n) if n > 0 => n * 1000,
        Some(n) => {
            return NextFire::Invalid(format!("interval_seconds must be positive (got {n})"))
        }
        None => return NextFire::Invalid("interval schedules require interval_seconds".into()),
    };

    let candidate = if start > now {
        start
    } else {
        // k = ceil((now - start) / interval); candidate = start + k * interval.
        let elapsed_ms = (now - start).num_milliseconds();
        let k = (elapsed_ms + interval_ms - 1) / interval_ms;
        start + Duration::milliseconds(k * interval_ms)
    };

    match schedule.end_time {
        Some(end) if candidate > end => NextFire::Expired,
        _ => NextFire::At(candidate),
    }
}

fn cron_fire(schedule: &Schedule, now: DateTime<Utc>, tz: Tz) -> NextFire {
    let raw = match schedule.cron_expression.as_deref() {
        Some(e) if !e.is_empty() => e,
        _ => return NextFire::Invalid("cron schedules require cron_expression".into()),
    };
    let expr = match CronExpr::parse(raw) {
        Ok(e) => e,
        Err(msg) => return NextFire::Invalid(format!("invalid cron expression: {msg}")),
    };

    // A future start_time moves the search origin forward so the first
    // fire is not before the schedule opens.
    let after = effective_after(schedule.start_time, now);

    match expr.next_after_tz(&after, tz) {
        Some(next) => clamp_to_end(schedule.end_time, next),
        None => NextFire::Expired,
    }
}

fn recurring_fire(schedule: &Schedule, now: DateTime<Utc>, tz: Tz) -> NextFire {
    let pattern = match RecurringPattern::from_params(&schedule.action_params) {
        Some(Ok(p)) => p,
        Some(Err(msg)) => return NextFire::Invalid(msg),
        None => {
            return NextFire::Invalid(
                "recurring schedules require action_params.recurring_pattern".into(),
            )
        }
    };
    let (hour, minute) = match pattern.wall_time() {
        Ok(t) => t,
        Err(msg) => return NextFire::Invalid(msg),
    };
    let weekdays = match pattern.weekdays() {
        Ok(d) => d,
        Err(msg) => return NextFire::Invalid(msg),
    };

    let after = effective_after(schedule.start_time, now);
    let local_after = after.with_timezone(&tz).naive_local();

    // Probe day by day: the pattern fires at most once per day, so eight
    // days always cover a weekly pattern.
    for offset in 0..8 {
        let date = match local_after.date().checked_add_days(chrono::Days::new(offset)) {
            Some(d) => d,
            None => return NextFire::Expired,
        };
        if !weekdays.contains(&date.weekday()) {
            continue;
        }
        let Some(candidate) = wall_time_on(date, hour, minute) else {
            continue;
        };
        match resolve_local(candidate, tz) {
            Some(instant) if instant > after => {
                return clamp_to_end(schedule.end_time, instant);
            }
            _ => continue,
        }
    }
    NextFire::Expired
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Search origin: `now`, or just before a future `start_time` so the
/// first occurrence at/after the opening is found.
fn effective_after(start_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match start_time {
        Some(start) if start > now => start - Duration::milliseconds(1),
        _ => now,
    }
}

fn clamp_to_end(end_time: Option<DateTime<Utc>>, instant: DateTime<Utc>) -> NextFire {
    match end_time {
        Some(end) if instant > end => NextFire::Expired,
        _ => NextFire::At(instant),
    }
}

fn wall_time_on(date: NaiveDate, hour: u32, minute: u32) -> Option<NaiveDateTime> {
    date.and_hms_opt(hour, minute, 0)
}

/// Map a local wall time to UTC with the same DST policy as the cron
/// evaluator: fold picks the earliest mapping, a gap shifts the time
/// past the transition using the pre-gap offset.
fn resolve_local(local: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    use chrono::Offset;

    match tz.from_local_datetime(&local) {
        chrono::LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        chrono::LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        chrono::LocalResult::None => {
            let mut probe = local;
            for _ in 0..(4 * 60) {
                probe -= Duration::minutes(1);
                match tz.from_local_datetime(&probe) {
                    chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(_, dt) => {
                        let offset_secs = i64::from(dt.offset().fix().local_minus_utc());
                        let utc_naive = local - Duration::seconds(offset_secs);
                        return Some(Utc.from_utc_datetime(&utc_naive));
                    }
                    chrono::LocalResult::None => {}
                }
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rc_domain::schedule::{ActionType, RunStatus};
    use serde_json::json;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn base_schedule(schedule_type: ScheduleType) -> Schedule {
        Schedule {
            id: 1,
            name: "test".into(),
            schedule_type,
            cron_expression: None,
            interval_seconds: None,
            start_time: None,
            end_time: None,
            timezone: "UTC".into(),
            device_ids: vec![1],
            action_type: ActionType::Off,
            action_params: json!({}),
            is_enabled: true,
            next_run: None,
            last_run: None,
            last_run_status: None,
            error_message: None,
            created_at: utc(2024, 1, 1, 0, 0, 0),
            updated_at: utc(2024, 1, 1, 0, 0, 0),
        }
    }

    // ── one_off ───────────────────────────────────────────────────────

    #[test]
    fn one_off_future_start_fires_at_start() {
        let mut s = base_schedule(ScheduleType::OneOff);
        s.start_time = Some(utc(2024, 1, 15, 14, 30, 0));
        let now = utc(2024, 1, 15, 12, 0, 0);
        assert_eq!(next_fire(&s, now), NextFire::At(utc(2024, 1, 15, 14, 30, 0)));
    }

    #[test]
    fn one_off_past_start_is_expired() {
        let mut s = base_schedule(ScheduleType::OneOff);
        s.start_time = Some(utc(2024, 1, 15, 14, 30, 0));
        let now = utc(2024, 1, 15, 15, 0, 0);
        assert_eq!(next_fire(&s, now), NextFire::Expired);
    }

    #[test]
    fn one_off_already_fired_is_expired() {
        let mut s = base_schedule(ScheduleType::OneOff);
        s.start_time = Some(utc(2024, 1, 16, 0, 0, 0));
        s.last_run = Some(utc(2024, 1, 15, 14, 30, 0));
        s.last_run_status = Some(RunStatus::Success);
        let now = utc(2024, 1, 15, 15, 0, 0);
        assert_eq!(next_fire(&s, now), NextFire::Expired);
    }

    #[test]
    fn one_off_without_start_is_invalid() {
        let s = base_schedule(ScheduleType::OneOff);
        assert!(matches!(next_fire(&s, utc(2024, 1, 1, 0, 0, 0)), NextFire::Invalid(_)));
    }

    // ── interval ──────────────────────────────────────────────────────

    #[test]
    fn interval_rounds_up_to_next_boundary() {
        // 60s interval from 00:00:00, now 00:02:45 →
        // next fire 00:03:00.
        let mut s = base_schedule(ScheduleType::Interval);
        s.interval_seconds = Some(60);
        s.start_time = Some(utc(2024, 1, 15, 0, 0, 0));
        let now = utc(2024, 1, 15, 0, 2, 45);
        assert_eq!(next_fire(&s, now), NextFire::At(utc(2024, 1, 15, 0, 3, 0)));
    }

    #[test]
    fn interval_on_boundary_fires_now() {
        let mut s = base_schedule(ScheduleType::Interval);
        s.interval_seconds = Some(60);
        s.start_time = Some(utc(2024, 1, 15, 0, 0, 0));
        let now = utc(2024, 1, 15, 0, 3, 0);
        assert_eq!(next_fire(&s, now), NextFire::At(now));
    }

    #[test]
    fn interval_before_start_fires_at_start() {
        let mut s = base_schedule(ScheduleType::Interval);
        s.interval_seconds = Some(60);
        s.start_time = Some(utc(2024, 1, 15, 0, 0, 0));
        let now = utc(2024, 1, 14, 23, 0, 0);
        assert_eq!(next_fire(&s, now), NextFire::At(utc(2024, 1, 15, 0, 0, 0)));
    }

    #[test]
    fn interval_past_end_is_expired() {
        let mut s = base_schedule(ScheduleType::Interval);
        s.interval_seconds = Some(60);
        s.start_time = Some(utc(2024, 1, 15, 0, 0, 0));
        s.end_time = Some(utc(2024, 1, 15, 0, 5, 0));
        let now = utc(2024, 1, 15, 0, 5, 30);
        assert_eq!(next_fire(&s, now), NextFire::Expired);
    }

    #[test]
    fn interval_far_past_start_yields_single_candidate() {
        // start far in the past, tiny interval: exactly one candidate at or
        // after now — never a burst.
        let mut s = base_schedule(ScheduleType::Interval);
        s.interval_seconds = Some(1);
        s.start_time = Some(utc(2020, 1, 1, 0, 0, 0));
        let now = utc(2024, 6, 15, 12, 0, 0);
        match next_fire(&s, now) {
            NextFire::At(t) => {
                assert!(t >= now);
                assert!(t < now + Duration::seconds(1));
            }
            other => panic!("expected At, got {other:?}"),
        }
    }

    #[test]
    fn interval_zero_is_invalid() {
        let mut s = base_schedule(ScheduleType::Interval);
        s.interval_seconds = Some(0);
        s.start_time = Some(utc(2024, 1, 15, 0, 0, 0));
        assert!(matches!(next_fire(&s, utc(2024, 1, 15, 1, 0, 0)), NextFire::Invalid(_)));
    }

    // ── cron ──────────────────────────────────────────────────────────

    #[test]
    fn cron_spring_forward_la() {
        // "30 2 * * *" America/Los_Angeles; on 2024-03-10
        // the local 02:30 doesn't exist; the fire is 2024-03-10T10:30:00Z.
        let mut s = base_schedule(ScheduleType::Cron);
        s.cron_expression = Some("30 2 * * *".into());
        s.timezone = "America/Los_Angeles".into();
        let now = utc(2024, 3, 10, 7, 0, 0);
        assert_eq!(next_fire(&s, now), NextFire::At(utc(2024, 3, 10, 10, 30, 0)));
    }

    #[test]
    fn cron_fall_back_fires_once() {
        let mut s = base_schedule(ScheduleType::Cron);
        s.cron_expression = Some("30 1 * * *".into());
        s.timezone = "US/Eastern".into();
        let now = utc(2024, 11, 3, 4, 0, 0);
        // 1:30 EDT (first occurrence) = 5:30 UTC.
        assert_eq!(next_fire(&s, now), NextFire::At(utc(2024, 11, 3, 5, 30, 0)));
    }

    #[test]
    fn cron_bad_expression_is_invalid() {
        let mut s = base_schedule(ScheduleType::Cron);
        s.cron_expression = Some("61 * * * *".into());
        assert!(matches!(next_fire(&s, utc(2024, 1, 1, 0, 0, 0)), NextFire::Invalid(_)));
    }

    #[test]
    fn cron_unknown_zone_is_invalid() {
        let mut s = base_schedule(ScheduleType::Cron);
        s.cron_expression = Some("0 * * * *".into());
        s.timezone = "Mars/Olympus_Mons".into();
        assert!(matches!(next_fire(&s, utc(2024, 1, 1, 0, 0, 0)), NextFire::Invalid(_)));
    }

    #[test]
    fn cron_respects_end_time() {
        let mut s = base_schedule(ScheduleType::Cron);
        s.cron_expression = Some("0 12 * * *".into());
        s.end_time = Some(utc(2024, 1, 15, 11, 0, 0));
        let now = utc(2024, 1, 15, 10, 0, 0);
        assert_eq!(next_fire(&s, now), NextFire::Expired);
    }

    #[test]
    fn cron_future_start_time_moves_origin() {
        let mut s = base_schedule(ScheduleType::Cron);
        s.cron_expression = Some("0 12 * * *".into());
        s.start_time = Some(utc(2024, 1, 20, 0, 0, 0));
        let now = utc(2024, 1, 15, 10, 0, 0);
        assert_eq!(next_fire(&s, now), NextFire::At(utc(2024, 1, 20, 12, 0, 0)));
    }

    // ── recurring ─────────────────────────────────────────────────────

    #[test]
    fn recurring_weekly_fires_on_listed_days() {
        let mut s = base_schedule(ScheduleType::Recurring);
        s.timezone = "UTC".into();
        s.action_params = json!({
            "recurring_pattern": {"frequency": "weekly", "at": "08:00", "days": ["mon", "fri"]}
        });
        // 2024-06-15 is a Saturday; next listed day is Monday 06-17.
        let now = utc(2024, 6, 15, 12, 0, 0);
        assert_eq!(next_fire(&s, now), NextFire::At(utc(2024, 6, 17, 8, 0, 0)));
    }

    #[test]
    fn recurring_daily_next_occurrence_today_or_tomorrow() {
        let mut s = base_schedule(ScheduleType::Recurring);
        s.action_params = json!({
            "recurring_pattern": {"frequency": "daily", "at": "08:00"}
        });
        // Before 08:00 → today.
        assert_eq!(
            next_fire(&s, utc(2024, 6, 15, 6, 0, 0)),
            NextFire::At(utc(2024, 6, 15, 8, 0, 0))
        );
        // After 08:00 → tomorrow.
        assert_eq!(
            next_fire(&s, utc(2024, 6, 15, 9, 0, 0)),
            NextFire::At(utc(2024, 6, 16, 8, 0, 0))
        );
    }

    #[test]
    fn recurring_in_zone_converts_to_utc() {
        let mut s = base_schedule(ScheduleType::Recurring);
        s.timezone = "Asia/Tokyo".into();
        s.action_params = json!({
            "recurring_pattern": {"frequency": "daily", "at": "09:00"}
        });
        // 09:00 JST = 00:00 UTC.
        assert_eq!(
            next_fire(&s, utc(2024, 6, 15, 1, 0, 0)),
            NextFire::At(utc(2024, 6, 16, 0, 0, 0))
        );
    }

    #[test]
    fn recurring_missing_pattern_is_invalid() {
        let s = base_schedule(ScheduleType::Recurring);
        assert!(matches!(next_fire(&s, utc(2024, 1, 1, 0, 0, 0)), NextFire::Invalid(_)));
    }

    // ── static ────────────────────────────────────────────────────────

    #[test]
    fn static_with_pattern_behaves_as_recurring() {
        let mut s = base_schedule(ScheduleType::Static);
        s.action_params = json!({
            "recurring_pattern": {"frequency": "daily", "at": "10:00"}
        });
        assert_eq!(
            next_fire(&s, utc(2024, 6, 15, 9, 0, 0)),
            NextFire::At(utc(2024, 6, 15, 10, 0, 0))
        );
    }

    #[test]
    fn static_without_pattern_behaves_as_one_off() {
        let mut s = base_schedule(ScheduleType::Static);
        s.start_time = Some(utc(2024, 6, 16, 0, 0, 0));
        assert_eq!(
            next_fire(&s, utc(2024, 6, 15, 0, 0, 0)),
            NextFire::At(utc(2024, 6, 16, 0, 0, 0))
        );
    }

    // ── laws ──────────────────────────────────────────────────────────

    #[test]
    fn next_fire_is_idempotent() {
        let mut s = base_schedule(ScheduleType::Interval);
        s.interval_seconds = Some(300);
        s.start_time = Some(utc(2024, 1, 15, 0, 0, 0));
        let now = utc(2024, 1, 15, 3, 7, 0);
        assert_eq!(next_fire(&s, now), next_fire(&s, now));
    }

    #[test]
    fn next_fire_is_non_decreasing_in_now() {
        let mut s = base_schedule(ScheduleType::Cron);
        s.cron_expression = Some("*/15 * * * *".into());
        s.timezone = "America/New_York".into();

        let mut prev: Option<DateTime<Utc>> = None;
        let mut now = utc(2024, 3, 9, 0, 0, 0);
        // Step across the spring-forward weekend in 47-minute strides.
        for _ in 0..80 {
            match next_fire(&s, now) {
                NextFire::At(t) => {
                    if let Some(p) = prev {
                        assert!(t >= p, "regressed from {p} to {t} at now={now}");
                    }
                    prev = Some(t);
                }
                other => panic!("unexpected verdict {other:?}"),
            }
            now += Duration::minutes(47);
        }
    }

    #[test]
    fn validate_timing_catches_definition_errors() {
        assert!(validate_timing(ScheduleType::Cron, Some("0 * * * *"), "UTC", &json!({})).is_ok());
        assert!(validate_timing(ScheduleType::Cron, Some("bad"), "UTC", &json!({})).is_err());
        assert!(validate_timing(ScheduleType::Cron, None, "UTC", &json!({})).is_err());
        assert!(
            validate_timing(ScheduleType::OneOff, None, "Not/AZone", &json!({})).is_err()
        );
        assert!(validate_timing(ScheduleType::Recurring, None, "UTC", &json!({})).is_err());
        assert!(validate_timing(
            ScheduleType::Recurring,
            None,
            "UTC",
            &json!({"recurring_pattern": {"frequency": "weekly", "at": "07:00", "days": ["mon"]}})
        )
        .is_ok());
        assert!(validate_timing(
            ScheduleType::Static,
            None,
            "UTC",
            &json!({"recurring_pattern": {"frequency": "daily", "at": "99:00"}})
        )
        .is_err());
    }
}
