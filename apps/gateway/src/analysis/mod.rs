//! Analysis capabilities: the seam between the gateway and the vision/audio models.
//!
//! The gateway never runs face-landmark geometry or pitch extraction itself. It
//! talks to an `Arc<dyn VisionAnalyzer>` and an `Arc<dyn AudioAnalyzer>`, swapped
//! at startup via config (`ANALYZER_URL` set → `RemoteAnalyzer`, unset →
//! `UnavailableAnalyzer`).
//!
//! Contract shared by both capabilities: every observation field is optional.
//! "No face detected" or "silence" is an `Ok` with empty fields, never an `Err`.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod remote;

pub use remote::RemoteAnalyzer;

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("analysis backend is not available")]
    Unavailable,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend error (status {status}): {message}")]
    Backend { status: u16, message: String },

    #[error("could not decode input: {0}")]
    Decode(String),
}

// ────────────────────────────────────────────────────────────────────────────
// Vision observation
// ────────────────────────────────────────────────────────────────────────────

/// Head orientation in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
}

/// Gaze offset from the camera axis, in pixel-equivalent units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GazeSample {
    pub x: f64,
    pub y: f64,
    /// Reported by some backends; computed as `hypot(x, y)` when absent.
    #[serde(default)]
    pub magnitude: Option<f64>,
}

impl GazeSample {
    pub fn magnitude(&self) -> f64 {
        self.magnitude.unwrap_or_else(|| self.x.hypot(self.y))
    }
}

/// Per-emotion confidences on a 0–100 scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionScores {
    pub angry: f64,
    pub disgust: f64,
    pub fear: f64,
    pub happy: f64,
    pub sad: f64,
    pub surprise: f64,
    pub neutral: f64,
}

impl EmotionScores {
    /// (angry + fear + sad) / 100, clamped to [0, 1].
    pub fn negative_affect(&self) -> f64 {
        ((self.angry + self.fear + self.sad) / 100.0).clamp(0.0, 1.0)
    }

    /// (happy + neutral) / 100, clamped to [0, 1].
    pub fn positive_affect(&self) -> f64 {
        ((self.happy + self.neutral) / 100.0).clamp(0.0, 1.0)
    }

    /// Highest-scoring emotion and its raw (0–100) score. `None` when no
    /// emotion scored above zero.
    pub fn dominant(&self) -> Option<(&'static str, f64)> {
        [
            ("angry", self.angry),
            ("disgust", self.disgust),
            ("fear", self.fear),
            ("happy", self.happy),
            ("sad", self.sad),
            ("surprise", self.surprise),
            ("neutral", self.neutral),
        ]
        .into_iter()
        .filter(|(_, score)| score.is_finite())
        .fold(None, |best: Option<(&'static str, f64)>, (label, score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((label, score)),
        })
        .filter(|(_, score)| *score > 0.0)
    }

    pub fn is_finite(&self) -> bool {
        [
            self.angry,
            self.disgust,
            self.fear,
            self.happy,
            self.sad,
            self.surprise,
            self.neutral,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PostureSample {
    /// 0.0 (slouched) – 1.0 (upright).
    pub score: f64,
    /// Shoulder-line angle in degrees.
    pub angle: f64,
    /// 0.0 – 1.0 shoulder tension estimate.
    pub tension: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GestureSample {
    /// 0.0 – 1.0 hand movement intensity.
    pub activity: f64,
    #[serde(rename = "type")]
    pub gesture_type: String,
}

/// Result of one `analyze_frame` call. Absent field = not detected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionObservation {
    pub head_pose: Option<HeadPose>,
    pub gaze: Option<GazeSample>,
    pub emotion: Option<EmotionScores>,
    pub posture: Option<PostureSample>,
    pub gesture: Option<GestureSample>,
}

impl VisionObservation {
    /// Whether the frame contained a face at all.
    pub fn face_detected(&self) -> bool {
        self.head_pose.is_some() || self.gaze.is_some() || self.emotion.is_some()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Audio observation
// ────────────────────────────────────────────────────────────────────────────

/// Result of one `analyze_chunk` call. Absent field = not detected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioObservation {
    pub speech_emotion: Option<String>,
    pub pitch_hz: Option<f64>,
    pub volume_db: Option<f64>,
    pub clarity: Option<f64>,
}

// ────────────────────────────────────────────────────────────────────────────
// Capability traits
// ────────────────────────────────────────────────────────────────────────────
//
// Analyzer futures run on the shared runtime's I/O threads. Implementations
// must not block: in-process, CPU-bound inference belongs in
// `tokio::task::spawn_blocking`, awaited from the async method.

#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    /// `false` when the backing model is not loaded; checked once at startup.
    fn is_available(&self) -> bool {
        true
    }

    async fn analyze_frame(&self, image: Bytes) -> Result<VisionObservation, AnalyzerError>;
}

#[async_trait]
pub trait AudioAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool {
        true
    }

    async fn analyze_chunk(&self, audio: Bytes) -> Result<AudioObservation, AnalyzerError>;
}

/// Which capabilities are backed by a live model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub vision: bool,
    pub audio: bool,
}

impl Capabilities {
    pub fn detect(vision: &dyn VisionAnalyzer, audio: &dyn AudioAnalyzer) -> Self {
        Self {
            vision: vision.is_available(),
            audio: audio.is_available(),
        }
    }

    pub fn degraded(&self) -> bool {
        !(self.vision && self.audio)
    }

    pub fn supports(&self, modality: crate::models::frame::Modality) -> bool {
        match modality {
            crate::models::frame::Modality::Video => self.vision,
            crate::models::frame::Modality::Audio => self.audio,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// UnavailableAnalyzer: used when no backend is configured
// ────────────────────────────────────────────────────────────────────────────

/// Stand-in for both capabilities when `ANALYZER_URL` is unset.
/// Sessions still work; clients are told the gateway is degraded.
pub struct UnavailableAnalyzer;

#[async_trait]
impl VisionAnalyzer for UnavailableAnalyzer {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn analyze_frame(&self, _image: Bytes) -> Result<VisionObservation, AnalyzerError> {
        Err(AnalyzerError::Unavailable)
    }
}

#[async_trait]
impl AudioAnalyzer for UnavailableAnalyzer {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn analyze_chunk(&self, _audio: Bytes) -> Result<AudioObservation, AnalyzerError> {
        Err(AnalyzerError::Unavailable)
    }
}
