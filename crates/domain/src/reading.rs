//! Time-series readings written by the poller. At least one of `value`
//! or `json_value` is non-null; timestamps are monotonic per device.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Reading {
    pub id: i64,
    pub device_id: i64,
    pub timestamp: DateTime<Utc>,
    /// Scalar sample (temperature, pH, ...).
    pub value: Option<f64>,
    /// Structured sample for multi-metric devices.
    pub json_value: Option<serde_json::Value>,
    /// Driver-supplied context (units, raw payloads, ...).
    pub metadata: Option<serde_json::Value>,
}

impl Reading {
    /// Extract a named metric. Lookup order: the scalar `value` when the
    /// metric is literally "value", then `json_value[metric]`, then
    /// `metadata[metric]`.
    pub fn metric(&self, metric: &str) -> Option<f64> {
        if metric == "value" {
            if let Some(v) = self.value {
                return Some(v);
            }
        }
        if let Some(v) = self.json_value.as_ref().and_then(|j| j.get(metric)).and_then(|v| v.as_f64())
        {
            return Some(v);
        }
        self.metadata
            .as_ref()
            .and_then(|m| m.get(metric))
            .and_then(|v| v.as_f64())
    }
}
