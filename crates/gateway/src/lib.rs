//! ReefCore gateway: the REST facade and the three store-coordinated
//! workers (scheduler, poller, alert evaluator), wired together by the
//! `reefcored` binary.

pub mod api;
pub mod state;
pub mod workers;
