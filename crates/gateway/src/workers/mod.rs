//! The three store-coordinated workers. One instance of each per
//! deployment (single writer per resource class).

pub mod alerts;
pub mod poller;
pub mod scheduler;

pub use alerts::{AlertWorker, CycleSummary};
pub use poller::{PollerStatus, PollerWorker};
pub use scheduler::{SchedulerHealth, SchedulerWorker, TickSummary};
