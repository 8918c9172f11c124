//! Device registry entries. A device with `poll_enabled && is_active`
//! is picked up by the poller within one refresh cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub name: String,
    /// Driver key, e.g. `temperature_sensor`, `outlet`, `pwm_channel`.
    pub device_type: String,
    /// Driver-specific address (1-wire id, GPIO pin, IP, ...).
    pub address: String,
    pub poll_enabled: bool,
    /// Seconds between polls; minimum 1.
    pub poll_interval: i64,
    pub is_active: bool,
    /// Driver-specific configuration bag.
    pub config: serde_json::Value,
    pub last_polled: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    /// Whether the poller should be sampling this device.
    pub fn pollable(&self) -> bool {
        self.poll_enabled && self.is_active
    }
}

/// Boundary check for device definitions.
pub fn validate_definition(name: &str, device_type: &str, poll_interval: i64) -> Result<(), String> {
    if name.is_empty() {
        return Err("name must not be empty".into());
    }
    if device_type.is_empty() {
        return Err("device_type must not be empty".into());
    }
    if poll_interval < 1 {
        return Err(format!("poll_interval must be >= 1 second (got {poll_interval})"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pollable_requires_both_flags() {
        let mut d = Device {
            id: 1,
            name: "display tank temp".into(),
            device_type: "temperature_sensor".into(),
            address: "28-0316a2797b1a".into(),
            poll_enabled: true,
            poll_interval: 10,
            is_active: true,
            config: serde_json::json!({}),
            last_polled: None,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(d.pollable());
        d.poll_enabled = false;
        assert!(!d.pollable());
        d.poll_enabled = true;
        d.is_active = false;
        assert!(!d.pollable());
    }

    #[test]
    fn definition_rejects_sub_second_interval() {
        assert!(validate_definition("probe", "temperature_sensor", 0).is_err());
        assert!(validate_definition("probe", "temperature_sensor", 1).is_ok());
    }
}
