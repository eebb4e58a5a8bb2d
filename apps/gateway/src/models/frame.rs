use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Input channel category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Video,
    Audio,
}

impl Modality {
    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Video => "video",
            Modality::Audio => "audio",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single video frame or audio chunk waiting to be analyzed.
///
/// Records are transient: they live in a session's ingestion buffer until
/// the scheduler moves the newest one into an analysis job.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub payload: Bytes,
    pub modality: Modality,
    /// Server-side receive time.
    pub timestamp: Instant,
    /// Capture time reported by the client, if any (seconds, client clock).
    pub client_timestamp: Option<f64>,
    /// Per-session monotonic counter assigned at ingestion.
    pub sequence_id: u64,
}

impl FrameRecord {
    pub fn new(modality: Modality, payload: Bytes, sequence_id: u64) -> Self {
        Self {
            payload,
            modality,
            timestamp: Instant::now(),
            client_timestamp: None,
            sequence_id,
        }
    }

    pub fn with_client_timestamp(mut self, ts: Option<f64>) -> Self {
        self.client_timestamp = ts.filter(|t| t.is_finite());
        self
    }
}
