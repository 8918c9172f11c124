//! Schedule model — the user-defined timing rules the scheduler worker
//! turns into concrete device actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Enums
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a schedule computes its firing instants.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    /// Fires exactly once at `start_time`.
    OneOff,
    /// Fires every `interval_seconds` starting at `start_time`.
    Interval,
    /// Fires per a 5-field cron expression, evaluated in `timezone`.
    Cron,
    /// Fires per a recurring pattern in `action_params.recurring_pattern`.
    Recurring,
    /// Seed record resolved to one_off or recurring semantics on first run.
    Static,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneOff => "one_off",
            Self::Interval => "interval",
            Self::Cron => "cron",
            Self::Recurring => "recurring",
            Self::Static => "static",
        }
    }
}

impl std::str::FromStr for ScheduleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "one_off" => Ok(Self::OneOff),
            "interval" => Ok(Self::Interval),
            "cron" => Ok(Self::Cron),
            "recurring" => Ok(Self::Recurring),
            "static" => Ok(Self::Static),
            other => Err(format!("unknown schedule_type \"{other}\"")),
        }
    }
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a materialized action asks the device to do.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    On,
    Off,
    Toggle,
    SetPwm,
    SetLevel,
    Ramp,
    Custom,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Toggle => "toggle",
            Self::SetPwm => "set_pwm",
            Self::SetLevel => "set_level",
            Self::Ramp => "ramp",
            Self::Custom => "custom",
        }
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            "toggle" => Ok(Self::Toggle),
            "set_pwm" => Ok(Self::SetPwm),
            "set_level" => Ok(Self::SetLevel),
            "ramp" => Ok(Self::Ramp),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown action_type \"{other}\"")),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the most recent firing, recorded on the schedule.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
    Skipped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown run status \"{other}\"")),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schedule
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Persisted schedule. `next_run` is maintained exclusively by the
/// scheduler worker; REST handlers only touch the user-facing fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub name: String,
    pub schedule_type: ScheduleType,
    /// 5-field cron expression, required iff `schedule_type == cron`.
    pub cron_expression: Option<String>,
    /// Seconds between firings, required iff `schedule_type == interval`.
    pub interval_seconds: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// IANA zone name; cron/recurring fires are computed here, then
    /// converted to UTC.
    pub timezone: String,
    /// Ordered device references; non-empty for actuating schedules.
    pub device_ids: Vec<i64>,
    pub action_type: ActionType,
    /// Opaque parameter bag, semantics per `action_type`.
    pub action_params: serde_json::Value,
    pub is_enabled: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_run_status: Option<RunStatus>,
    /// Set when recomputation finds the definition invalid.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Recurring pattern
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pattern stored under `action_params.recurring_pattern` for
/// `recurring` (and pattern-bearing `static`) schedules.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RecurringPattern {
    pub frequency: Frequency,
    /// Zone-local wall time, "HH:MM".
    pub at: String,
    /// Days of week for weekly patterns ("mon".."sun"); empty = every day.
    #[serde(default)]
    pub days: Vec<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
}

impl RecurringPattern {
    /// Extract the pattern from an `action_params` bag, if present.
    pub fn from_params(params: &serde_json::Value) -> Option<Result<Self, String>> {
        let raw = params.get("recurring_pattern")?;
        Some(serde_json::from_value(raw.clone()).map_err(|e| format!("recurring_pattern: {e}")))
    }

    /// Parse `at` into (hour, minute). "07:30" → (7, 30).
    pub fn wall_time(&self) -> Result<(u32, u32), String> {
        let (h, m) = self
            .at
            .split_once(':')
            .ok_or_else(|| format!("recurring_pattern.at \"{}\" is not HH:MM", self.at))?;
        let hour: u32 = h
            .parse()
            .map_err(|_| format!("recurring_pattern.at hour \"{h}\" is not a number"))?;
        let minute: u32 = m
            .parse()
            .map_err(|_| format!("recurring_pattern.at minute \"{m}\" is not a number"))?;
        if hour > 23 || minute > 59 {
            return Err(format!("recurring_pattern.at \"{}\" out of range", self.at));
        }
        Ok((hour, minute))
    }

    /// Resolve `days` into chrono weekdays. Empty means all seven.
    pub fn weekdays(&self) -> Result<Vec<chrono::Weekday>, String> {
        use chrono::Weekday::*;
        if self.days.is_empty() {
            return Ok(vec![Mon, Tue, Wed, Thu, Fri, Sat, Sun]);
        }
        self.days
            .iter()
            .map(|d| match d.to_ascii_lowercase().as_str() {
                "mon" | "monday" => Ok(Mon),
                "tue" | "tuesday" => Ok(Tue),
                "wed" | "wednesday" => Ok(Wed),
                "thu" | "thursday" => Ok(Thu),
                "fri" | "friday" => Ok(Fri),
                "sat" | "saturday" => Ok(Sat),
                "sun" | "sunday" => Ok(Sun),
                other => Err(format!("recurring_pattern.days: unknown day \"{other}\"")),
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Boundary validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate `action_params` against the action type. Returns `Ok(())` or
/// a message naming the offending field.
///
/// `custom` parameters pass through to the driver verbatim; the only
/// requirement is that they form a JSON object.
pub fn validate_action_params(
    action_type: ActionType,
    params: &serde_json::Value,
) -> Result<(), String> {
    fn numeric_field(params: &serde_json::Value, key: &str) -> Result<f64, String> {
        params
            .get(key)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| format!("action_params.{key} must be a number"))
    }

    match action_type {
        ActionType::On | ActionType::Off | ActionType::Toggle => Ok(()),
        ActionType::SetPwm | ActionType::SetLevel => {
            let target = numeric_field(params, "target")?;
            if !(0.0..=100.0).contains(&target) {
                return Err(format!("action_params.target {target} out of range 0..=100"));
            }
            Ok(())
        }
        ActionType::Ramp => {
            let target = numeric_field(params, "target")?;
            if !(0.0..=100.0).contains(&target) {
                return Err(format!("action_params.target {target} out of range 0..=100"));
            }
            let duration = numeric_field(params, "duration_ms")?;
            if duration < 0.0 {
                return Err("action_params.duration_ms must be non-negative".into());
            }
            Ok(())
        }
        ActionType::Custom => {
            if params.is_object() {
                Ok(())
            } else {
                Err("custom action_params must be a JSON object".into())
            }
        }
    }
}

/// Structural checks on a schedule definition: required fields per type
/// and time-range sanity. Timezone and cron grammar are validated by the
/// timing layer.
pub fn validate_definition(
    schedule_type: ScheduleType,
    cron_expression: Option<&str>,
    interval_seconds: Option<i64>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    device_ids: &[i64],
) -> Result<(), String> {
    match schedule_type {
        ScheduleType::Cron => {
            if cron_expression.map_or(true, str::is_empty) {
                return Err("cron schedules require cron_expression".into());
            }
        }
        ScheduleType::Interval => {
            match interval_seconds {
                None => return Err("interval schedules require interval_seconds".into()),
                Some(n) if n <= 0 => {
                    return Err(format!("interval_seconds must be positive (got {n})"))
                }
                Some(_) => {}
            }
            if start_time.is_none() {
                return Err("interval schedules require start_time".into());
            }
        }
        ScheduleType::OneOff => {
            if start_time.is_none() {
                return Err("one_off schedules require start_time".into());
            }
        }
        ScheduleType::Recurring | ScheduleType::Static => {}
    }

    if let (Some(start), Some(end)) = (start_time, end_time) {
        if end <= start {
            return Err("end_time must be after start_time".into());
        }
    }

    if device_ids.is_empty() {
        return Err("device_ids must not be empty".into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schedule_type_round_trips() {
        for t in [
            ScheduleType::OneOff,
            ScheduleType::Interval,
            ScheduleType::Cron,
            ScheduleType::Recurring,
            ScheduleType::Static,
        ] {
            assert_eq!(t.as_str().parse::<ScheduleType>().unwrap(), t);
        }
    }

    #[test]
    fn action_type_serde_uses_snake_case() {
        let json = serde_json::to_string(&ActionType::SetPwm).unwrap();
        assert_eq!(json, "\"set_pwm\"");
        let back: ActionType = serde_json::from_str("\"ramp\"").unwrap();
        assert_eq!(back, ActionType::Ramp);
    }

    #[test]
    fn set_pwm_requires_target_in_range() {
        assert!(validate_action_params(ActionType::SetPwm, &json!({"target": 55.0})).is_ok());
        assert!(validate_action_params(ActionType::SetPwm, &json!({"target": 101})).is_err());
        assert!(validate_action_params(ActionType::SetPwm, &json!({"target": -1})).is_err());
        assert!(validate_action_params(ActionType::SetPwm, &json!({})).is_err());
    }

    #[test]
    fn ramp_requires_duration() {
        assert!(validate_action_params(
            ActionType::Ramp,
            &json!({"target": 80, "duration_ms": 5000})
        )
        .is_ok());
        assert!(validate_action_params(ActionType::Ramp, &json!({"target": 80})).is_err());
    }

    #[test]
    fn custom_params_pass_verbatim() {
        assert!(validate_action_params(ActionType::Custom, &json!({"anything": [1, 2]})).is_ok());
        assert!(validate_action_params(ActionType::Custom, &json!("not an object")).is_err());
    }

    #[test]
    fn on_off_toggle_need_no_params() {
        for t in [ActionType::On, ActionType::Off, ActionType::Toggle] {
            assert!(validate_action_params(t, &json!({})).is_ok());
        }
    }

    #[test]
    fn definition_requires_type_fields() {
        // cron without expression
        assert!(validate_definition(ScheduleType::Cron, None, None, None, None, &[1]).is_err());
        // interval without interval_seconds
        assert!(
            validate_definition(ScheduleType::Interval, None, None, None, None, &[1]).is_err()
        );
        // interval with non-positive interval
        assert!(validate_definition(
            ScheduleType::Interval,
            None,
            Some(0),
            Some(chrono::Utc::now()),
            None,
            &[1]
        )
        .is_err());
        // one_off without start
        assert!(validate_definition(ScheduleType::OneOff, None, None, None, None, &[1]).is_err());
    }

    #[test]
    fn definition_rejects_inverted_time_range() {
        let start = "2024-01-15T10:00:00Z".parse().unwrap();
        let end = "2024-01-15T09:00:00Z".parse().unwrap();
        let err = validate_definition(
            ScheduleType::Cron,
            Some("0 * * * *"),
            None,
            Some(start),
            Some(end),
            &[1],
        )
        .unwrap_err();
        assert!(err.contains("end_time"));
    }

    #[test]
    fn definition_rejects_empty_devices() {
        let err =
            validate_definition(ScheduleType::Cron, Some("0 * * * *"), None, None, None, &[])
                .unwrap_err();
        assert!(err.contains("device_ids"));
    }

    #[test]
    fn recurring_pattern_parses_from_params() {
        let params = json!({
            "recurring_pattern": {
                "frequency": "weekly",
                "at": "07:30",
                "days": ["mon", "wed", "fri"]
            }
        });
        let pattern = RecurringPattern::from_params(&params).unwrap().unwrap();
        assert_eq!(pattern.frequency, Frequency::Weekly);
        assert_eq!(pattern.wall_time().unwrap(), (7, 30));
        assert_eq!(pattern.weekdays().unwrap().len(), 3);
    }

    #[test]
    fn recurring_pattern_rejects_bad_wall_time() {
        let p = RecurringPattern {
            frequency: Frequency::Daily,
            at: "25:00".into(),
            days: vec![],
        };
        assert!(p.wall_time().is_err());
        let p2 = RecurringPattern {
            frequency: Frequency::Daily,
            at: "seven".into(),
            days: vec![],
        };
        assert!(p2.wall_time().is_err());
    }

    #[test]
    fn recurring_pattern_empty_days_means_all() {
        let p = RecurringPattern {
            frequency: Frequency::Daily,
            at: "00:00".into(),
            days: vec![],
        };
        assert_eq!(p.weekdays().unwrap().len(), 7);
    }
}
