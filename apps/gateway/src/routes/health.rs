use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Service version, live gateway counters, analyzer capabilities and the
/// effective pacing settings.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let stats = state.gateway.stats();
    let config = &state.config;
    Json(json!({
        "status": if stats.capabilities.degraded() { "degraded" } else { "ok" },
        "version": env!("CARGO_PKG_VERSION"),
        "service": "analysis-gateway",
        "gateway": stats,
        "settings": {
            "analyzer_configured": config.analyzer_url.is_some(),
            "min_analysis_interval_ms": config.min_analysis_interval.as_millis() as u64,
            "job_timeout_ms": config.job_timeout.as_millis() as u64,
            "smoothing": config.smoothing.as_str(),
        },
    }))
}
