//! Device actions — the durable queue rows the scheduler materializes
//! and dispatches. Status transitions form a DAG with no regression:
//! `pending → in_progress → {success, failed}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schedule::ActionType;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    InProgress,
    Success,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown action status \"{other}\"")),
        }
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One materialized firing: a concrete intent to change one device's
/// state at one instant. At most one row exists per
/// `(schedule_id, scheduled_time, device_id)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceAction {
    pub id: i64,
    /// `None` for manually created actions.
    pub schedule_id: Option<i64>,
    pub device_id: i64,
    pub action_type: ActionType,
    /// Snapshot of the schedule's `action_params` at materialization time.
    pub parameters: serde_json::Value,
    pub status: ActionStatus,
    pub scheduled_time: DateTime<Utc>,
    /// Set exactly once, on the terminal transition.
    pub executed_time: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}
