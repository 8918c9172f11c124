use std::sync::Arc;

use rc_domain::config::Config;
use rc_store::Store;

use crate::workers::{AlertWorker, PollerWorker, SchedulerWorker};

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, store
/// - **Workers** — scheduler, poller, alert evaluator (constructed even
///   when their loops run in another process, so health/execute
///   endpoints always answer)
/// - **Security** — token hashes computed once at startup
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: Store,

    // ── Workers ───────────────────────────────────────────────────────
    pub scheduler: Arc<SchedulerWorker>,
    pub poller: Arc<PollerWorker>,
    pub alerts: Arc<AlertWorker>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
    /// SHA-256 hash of the service-to-service bearer token.
    pub service_token_hash: Option<Vec<u8>>,
}
