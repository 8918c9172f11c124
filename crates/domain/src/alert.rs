//! Alerts and alert events. An alert compares the latest reading of a
//! device metric against a threshold; breaches open an event, recovery
//! resolves it. At most one unresolved event exists per alert.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Operator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Threshold comparison operator. Serialized with the symbolic form used
/// on the wire (`">"`, `"<="`, ...).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum AlertOperator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "!=")]
    Ne,
}

impl AlertOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Eq => "==",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Ne => "!=",
        }
    }

    /// Evaluate `value <op> threshold`.
    ///
    /// NaN on either side yields `false` for every operator — a NaN
    /// sample neither opens nor resolves an event.
    pub fn compare(&self, value: f64, threshold: f64) -> bool {
        if value.is_nan() || threshold.is_nan() {
            return false;
        }
        match self {
            Self::Gt => value > threshold,
            Self::Lt => value < threshold,
            Self::Eq => value == threshold,
            Self::Ge => value >= threshold,
            Self::Le => value <= threshold,
            Self::Ne => value != threshold,
        }
    }
}

impl std::str::FromStr for AlertOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" => Ok(Self::Gt),
            "<" => Ok(Self::Lt),
            "==" => Ok(Self::Eq),
            ">=" => Ok(Self::Ge),
            "<=" => Ok(Self::Le),
            "!=" => Ok(Self::Ne),
            other => Err(format!("unknown operator \"{other}\"")),
        }
    }
}

impl std::fmt::Display for AlertOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Alert
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub device_id: i64,
    /// Metric key looked up in the reading (see `Reading::metric`).
    pub metric: String,
    pub operator: AlertOperator,
    pub threshold_value: f64,
    pub is_enabled: bool,
    /// Reserved for trend analysis; requires a pollable device.
    pub trend_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Boundary check for alert definitions.
pub fn validate_definition(metric: &str, threshold_value: f64) -> Result<(), String> {
    if metric.is_empty() {
        return Err("metric must not be empty".into());
    }
    if threshold_value.is_nan() {
        return Err("threshold_value must not be NaN".into());
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AlertEvent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One open/close cycle of an alert. Threshold, operator and metric are
/// snapshotted at trigger time so later alert edits don't rewrite
/// history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: i64,
    pub alert_id: i64,
    pub device_id: i64,
    pub triggered_at: DateTime<Utc>,
    pub current_value: f64,
    pub threshold_value: f64,
    pub operator: AlertOperator,
    pub metric: String,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_value: Option<f64>,
    pub metadata: Option<serde_json::Value>,
}
