use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analysis::{GestureSample, HeadPose, PostureSample};

/// Latest gaze sample plus its eye-contact indicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GazeState {
    pub x: f64,
    pub y: f64,
    pub magnitude: f64,
    /// 1.0 when the sample counts as eye contact, else 0.0.
    pub eye_contact_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AudioState {
    pub pitch: Option<f64>,
    pub volume: Option<f64>,
    pub clarity: Option<f64>,
    pub speech_emotion: Option<String>,
}

/// Fused, smoothed analysis state for one session.
///
/// Written only by `ResultAggregator`. `None` means "never observed"; once a
/// field has a value it is only ever replaced, never cleared.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisSnapshot {
    pub dominant_emotion: Option<String>,
    pub emotion_confidence: Option<f64>,
    pub head_pose: Option<HeadPose>,
    pub gaze: Option<GazeState>,
    pub posture: Option<PostureSample>,
    pub gesture: Option<GestureSample>,
    pub audio: AudioState,
    pub face_detected: bool,

    // Derived fields
    pub tension_level: Option<f64>,
    pub confidence_score: Option<f64>,
    pub eye_contact_ratio: Option<f64>,
    pub head_pose_stability: Option<f64>,

    pub version: u64,
    pub last_updated: Option<DateTime<Utc>>,
}
