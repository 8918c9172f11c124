//! Shared domain types for the ReefCore automation core.
//!
//! Everything that crosses a crate boundary lives here: entity structs,
//! the enums that gate their state machines, the configuration tree, and
//! the shared error type.

pub mod action;
pub mod alert;
pub mod config;
pub mod device;
pub mod error;
pub mod reading;
pub mod schedule;

pub use action::{ActionStatus, DeviceAction};
pub use alert::{Alert, AlertEvent, AlertOperator};
pub use device::Device;
pub use error::{Error, Result};
pub use reading::Reading;
pub use schedule::{ActionType, RecurringPattern, RunStatus, Schedule, ScheduleType};
