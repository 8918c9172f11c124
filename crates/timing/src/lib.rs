//! Time machinery: the injectable clock, the 5-field cron evaluator, and
//! the schedule calculator that turns a schedule record plus "now" into
//! its next firing instant.
//!
//! All computation is UTC-in, UTC-out; IANA zone arithmetic happens only
//! inside this crate.

pub mod calculator;
pub mod clock;
pub mod cron;

pub use calculator::{next_fire, validate_timing, NextFire};
pub use clock::{Clock, FixedClock, SystemClock};
pub use cron::{parse_tz, CronExpr};
