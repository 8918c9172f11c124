//! Driver seam between the automation core and physical hardware.
//!
//! The core never links hardware libraries; it consumes two async
//! traits. The poller owns [`DeviceDriver`] handles for sensors, the
//! scheduler's executor owns [`DeviceController`] handles for actuators,
//! and a [`DriverRegistry`] maps `device_type` keys to registered
//! implementations.
//!
//! The simulated implementations here back dev deployments and the
//! worker tests; real drivers (1-wire, PCA9685, Kasa, ...) register the
//! same traits from their own crates.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use rc_domain::device::Device;
use rc_domain::schedule::ActionType;
use rc_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One successful sample from a sensor. At least one of `value` and
/// `json_value` must be set; `metadata` carries driver context.
#[derive(Clone, Debug, Default)]
pub struct Sample {
    pub value: Option<f64>,
    pub json_value: Option<Value>,
    pub metadata: Option<Value>,
}

impl Sample {
    pub fn scalar(value: f64) -> Self {
        Self {
            value: Some(value),
            ..Default::default()
        }
    }
}

/// Sensor read. Callers bound each poll with a deadline
/// (`min(poll_interval / 2, 10s)`); implementations should still fail
/// fast on unreachable hardware.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    async fn poll(&self, device: &Device) -> Result<Sample>;
}

/// Actuator call. `parameters` is the snapshot taken at materialization;
/// the returned value lands verbatim in the action's `result` column.
#[async_trait]
pub trait DeviceController: Send + Sync {
    async fn execute(
        &self,
        device: &Device,
        action_type: ActionType,
        parameters: &Value,
    ) -> Result<Value>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Maps `device_type` keys to driver implementations. Built once at
/// startup and shared immutably.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn DeviceDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the simulated driver behind the common sensor types,
    /// for dev deployments with no hardware attached.
    pub fn simulated() -> Self {
        let mut registry = Self::new();
        let sim: Arc<dyn DeviceDriver> = Arc::new(SimulatedDriver);
        for device_type in ["temperature_sensor", "ph_sensor", "salinity_sensor"] {
            registry.register(device_type, sim.clone());
        }
        registry
    }

    pub fn register(&mut self, device_type: &str, driver: Arc<dyn DeviceDriver>) {
        self.drivers.insert(device_type.to_string(), driver);
    }

    pub fn driver_for(&self, device_type: &str) -> Result<Arc<dyn DeviceDriver>> {
        self.drivers
            .get(device_type)
            .cloned()
            .ok_or_else(|| Error::Driver(format!("no driver registered for \"{device_type}\"")))
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Simulated implementations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deterministic sensor: reads `config.sim_value` when present, else
/// derives a stable per-device value. `config.sim_fail = true` makes
/// every poll fail (used to exercise error paths end to end).
pub struct SimulatedDriver;

#[async_trait]
impl DeviceDriver for SimulatedDriver {
    async fn poll(&self, device: &Device) -> Result<Sample> {
        if device
            .config
            .get("sim_fail")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return Err(Error::Driver(format!(
                "simulated failure for device {}",
                device.id
            )));
        }
        let value = device
            .config
            .get("sim_value")
            .and_then(Value::as_f64)
            .unwrap_or_else(|| 25.0 + (device.id % 10) as f64 / 10.0);
        Ok(Sample {
            value: Some(value),
            json_value: None,
            metadata: Some(serde_json::json!({ "driver": "simulated" })),
        })
    }
}

/// Actuator that acknowledges every call, echoing what it was asked to
/// do. Dev stand-in for outlet/PWM controllers.
pub struct SimulatedController;

#[async_trait]
impl DeviceController for SimulatedController {
    async fn execute(
        &self,
        device: &Device,
        action_type: ActionType,
        parameters: &Value,
    ) -> Result<Value> {
        if device
            .config
            .get("sim_fail")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return Err(Error::Driver(format!(
                "simulated failure for device {}",
                device.id
            )));
        }
        tracing::debug!(device_id = device.id, action = %action_type, "simulated execute");
        Ok(serde_json::json!({
            "applied": action_type.as_str(),
            "parameters": parameters,
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted implementations (tests, dry runs)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Driver that replays a fixed sequence of outcomes, then errors.
pub struct ScriptedDriver {
    outcomes: parking_lot::Mutex<VecDeque<Result<Sample>>>,
}

impl ScriptedDriver {
    pub fn new(outcomes: Vec<Result<Sample>>) -> Self {
        Self {
            outcomes: parking_lot::Mutex::new(outcomes.into()),
        }
    }
}

#[async_trait]
impl DeviceDriver for ScriptedDriver {
    async fn poll(&self, _device: &Device) -> Result<Sample> {
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Driver("script exhausted".into())))
    }
}

/// Controller that replays a fixed sequence of outcomes, then errors.
/// Records every call it receives.
pub struct ScriptedController {
    outcomes: parking_lot::Mutex<VecDeque<Result<Value>>>,
    calls: parking_lot::Mutex<Vec<(i64, ActionType)>>,
}

impl ScriptedController {
    pub fn new(outcomes: Vec<Result<Value>>) -> Self {
        Self {
            outcomes: parking_lot::Mutex::new(outcomes.into()),
            calls: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Controller that always succeeds with an empty result.
    pub fn always_ok() -> Self {
        Self {
            outcomes: parking_lot::Mutex::new(VecDeque::new()),
            calls: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(i64, ActionType)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl DeviceController for ScriptedController {
    async fn execute(
        &self,
        device: &Device,
        action_type: ActionType,
        _parameters: &Value,
    ) -> Result<Value> {
        self.calls.lock().push((device.id, action_type));
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(serde_json::json!({ "ok": true })))
    }
}
