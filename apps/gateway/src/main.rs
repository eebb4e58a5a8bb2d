mod analysis;
mod config;
mod errors;
mod gateway;
mod models;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::analysis::{AudioAnalyzer, RemoteAnalyzer, UnavailableAnalyzer, VisionAnalyzer};
use crate::config::Config;
use crate::gateway::Gateway;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting analysis gateway v{}", env!("CARGO_PKG_VERSION"));

    let (vision, audio) = build_analyzers(&config).await;
    let settings = config.gateway_settings();
    info!(
        "Inference pool: {} workers, queue {}, job timeout {:?}, min interval {:?}",
        settings.executor.workers,
        settings.executor.queue_capacity,
        settings.executor.job_timeout,
        settings.scheduler.min_interval
    );
    if let Some(dir) = &config.debug_sample_dir {
        info!(
            "Debug sampling every {} frames into {}",
            config.debug_sample_every,
            dir.display()
        );
    }

    let gateway = Gateway::start(settings, vision, audio);
    let state = AppState {
        config: config.clone(),
        gateway,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Connects to the analysis sidecar. Any failure leaves the gateway running
/// degraded instead of refusing to start.
async fn build_analyzers(config: &Config) -> (Arc<dyn VisionAnalyzer>, Arc<dyn AudioAnalyzer>) {
    let Some(url) = config.analyzer_url.as_deref() else {
        warn!("ANALYZER_URL not set; vision and audio analysis are unavailable");
        return (Arc::new(UnavailableAnalyzer), Arc::new(UnavailableAnalyzer));
    };

    match RemoteAnalyzer::connect(url, config.analyzer_timeout).await {
        Ok(remote) => {
            let remote = Arc::new(remote);
            let vision: Arc<dyn VisionAnalyzer> = remote.clone();
            let audio: Arc<dyn AudioAnalyzer> = remote;
            (vision, audio)
        }
        Err(e) => {
            warn!("Analyzer sidecar at {url} unusable: {e}");
            (Arc::new(UnavailableAnalyzer), Arc::new(UnavailableAnalyzer))
        }
    }
}
