//! Wire messages exchanged over the analysis WebSocket.
//!
//! Inbound JSON is `{"type": "...", ...fields}`; outbound JSON is
//! `{"type": "...", "data": {...}}`. Both are tagged unions so dispatch is a
//! single `match`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::Capabilities;
use crate::errors::ErrorEvent;
use crate::models::frame::Modality;
use crate::models::snapshot::AnalysisSnapshot;

// ────────────────────────────────────────────────────────────────────────────
// Inbound
// ────────────────────────────────────────────────────────────────────────────

/// Control messages as they arrive in text frames. Media payloads are base64
/// (optionally as a `data:` URL).
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth {
        session_id: String,
        #[serde(default)]
        user_id: Option<String>,
    },
    VideoFrame {
        data: String,
        #[serde(default)]
        timestamp: Option<f64>,
    },
    AudioChunk {
        data: String,
        #[serde(default)]
        timestamp: Option<f64>,
    },
    Ping {
        #[serde(default)]
        timestamp: Option<f64>,
    },
    GetStatus,
}

// ────────────────────────────────────────────────────────────────────────────
// Outbound
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    VisualAnalysis(AnalysisPush),
    AudioAnalysis(AnalysisPush),
    AnalysisError(AnalysisErrorEvent),
    Status(StatusReport),
    Error(ErrorEvent),
    Pong(Pong),
}

impl ServerMessage {
    pub fn analysis(modality: Modality, push: AnalysisPush) -> Self {
        match modality {
            Modality::Video => ServerMessage::VisualAnalysis(push),
            Modality::Audio => ServerMessage::AudioAnalysis(push),
        }
    }
}

/// How current the pushed snapshot is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Produced by an inference pass that just completed.
    Fresh,
    /// Inside the debounce window; last known state.
    Cached,
    /// A pass is in flight or the worker pool is saturated; last known state.
    Busy,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisPush {
    pub session_id: String,
    pub freshness: Freshness,
    pub sequence_id: Option<u64>,
    /// Inference time of the pass that produced this push.
    pub duration_ms: Option<f64>,
    /// Server receive of the analyzed record to push.
    pub latency_ms: Option<f64>,
    /// Echo of the analyzed record's client capture time.
    pub client_timestamp: Option<f64>,
    pub snapshot: AnalysisSnapshot,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisErrorEvent {
    pub session_id: String,
    pub modality: Modality,
    pub sequence_id: u64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pong {
    pub timestamp: Option<f64>,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub connection_id: Uuid,
    pub connected_at: Option<DateTime<Utc>>,
    pub authenticated: bool,
    pub session_id: Option<String>,
    pub capabilities: Capabilities,
    pub degraded: bool,
    pub session: Option<SessionStatus>,
}

/// Point-in-time view of one session, shared by `get_status` and the REST API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub connected: bool,
    pub frames_received: u64,
    pub buffered_video: usize,
    pub buffered_audio: usize,
    pub dropped_frames: u64,
    pub in_flight_video: bool,
    pub in_flight_audio: bool,
    pub snapshot: AnalysisSnapshot,
    pub suggestions: Vec<String>,
}

/// Items on a connection's outbound channel.
#[derive(Debug, Clone)]
pub enum Outbound {
    Message(ServerMessage),
    Close { reason: &'static str },
}
