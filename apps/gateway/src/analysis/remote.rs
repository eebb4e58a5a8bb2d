//! Remote analyzer: the vision/audio models run in a sidecar service reached over HTTP.
//!
//! Endpoints (relative to `ANALYZER_URL`):
//! - `GET  /health`: checked once at startup; failure marks the gateway degraded
//! - `POST /vision/analyze`: raw image bytes in, `VisionObservation` JSON out
//! - `POST /audio/analyze`: raw audio bytes in, `AudioObservation` JSON out
//!
//! No retries: a frame that fails is simply superseded by the next one.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{AnalyzerError, AudioAnalyzer, AudioObservation, VisionAnalyzer, VisionObservation};

const VISION_PATH: &str = "/vision/analyze";
const AUDIO_PATH: &str = "/audio/analyze";
const HEALTH_PATH: &str = "/health";

#[derive(Debug, Deserialize)]
struct BackendError {
    error: String,
}

#[derive(Clone)]
pub struct RemoteAnalyzer {
    client: Client,
    base_url: String,
    available: bool,
}

impl RemoteAnalyzer {
    /// Builds the client and checks the sidecar's health endpoint.
    pub async fn connect(base_url: &str, timeout: Duration) -> Result<Self, AnalyzerError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let available = match client.get(format!("{base_url}{HEALTH_PATH}")).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!("Analyzer health check at {base_url} returned {}", resp.status());
                false
            }
            Err(e) => {
                warn!("Analyzer health check at {base_url} failed: {e}");
                false
            }
        };

        info!("Remote analyzer at {base_url} (available: {available})");

        Ok(Self {
            client,
            base_url,
            available,
        })
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Bytes) -> Result<T, AnalyzerError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("content-type", "application/octet-stream")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<BackendError>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(AnalyzerError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        let parsed = response.json::<T>().await?;
        debug!("Analyzer call {path} succeeded");
        Ok(parsed)
    }
}

#[async_trait]
impl VisionAnalyzer for RemoteAnalyzer {
    fn name(&self) -> &str {
        "remote"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn analyze_frame(&self, image: Bytes) -> Result<VisionObservation, AnalyzerError> {
        if image.is_empty() {
            return Err(AnalyzerError::Decode("empty image payload".to_string()));
        }
        self.post(VISION_PATH, image).await
    }
}

#[async_trait]
impl AudioAnalyzer for RemoteAnalyzer {
    fn name(&self) -> &str {
        "remote"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn analyze_chunk(&self, audio: Bytes) -> Result<AudioObservation, AnalyzerError> {
        if audio.is_empty() {
            return Err(AnalyzerError::Decode("empty audio payload".to_string()));
        }
        self.post(AUDIO_PATH, audio).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_backend_is_marked_unavailable() {
        // Port 9 (discard) on localhost is not expected to serve HTTP.
        let analyzer = RemoteAnalyzer::connect("http://127.0.0.1:9/", Duration::from_millis(200))
            .await
            .unwrap();
        assert!(!VisionAnalyzer::is_available(&analyzer));
        assert_eq!(analyzer.base_url, "http://127.0.0.1:9");
    }

    #[tokio::test]
    async fn test_empty_payload_is_rejected_locally() {
        let analyzer = RemoteAnalyzer::connect("http://127.0.0.1:9", Duration::from_millis(200))
            .await
            .unwrap();
        let err = analyzer.analyze_frame(Bytes::new()).await.unwrap_err();
        assert!(matches!(err, AnalyzerError::Decode(_)));
    }
}
