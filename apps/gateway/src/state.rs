use std::sync::Arc;

use crate::config::Config;
use crate::gateway::Gateway;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Connection, session and scheduling state plus the inference pool.
    pub gateway: Arc<Gateway>,
}
