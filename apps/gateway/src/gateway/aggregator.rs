//! Result aggregation: fuses completed analysis jobs into a session's
//! `AnalysisSnapshot`.
//!
//! Fusion rules:
//! - Emotion: tension = (angry+fear+sad)/100, confidence = (happy+neutral)/100,
//!   both clamped to [0, 1]. `Simple` mode stores them directly; `Continuous`
//!   mode smooths with `state = (1-α)·state + α·obs`.
//! - Gaze: eye contact = 1 if magnitude < 5.0 else 0; `eye_contact_ratio` is
//!   the α-EMA of that indicator in both modes.
//! - Head: stability = max(0, 1 - (|yaw|+|pitch|+|roll|)/90).
//! - Fields missing from a result keep their previous value. Non-finite
//!   numbers count as missing.
//! - The first observation of a smoothed field seeds it directly.
//!
//! Every successful result bumps `version` and `last_updated`; failures and
//! stale results (older generation than the last applied one) change nothing.

use chrono::Utc;

use crate::analysis::{AudioObservation, VisionObservation};
use crate::gateway::executor::{AnalysisPayload, JobOutcome};
use crate::models::frame::Modality;
use crate::models::snapshot::{AnalysisSnapshot, GazeState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmoothingMode {
    Simple,
    Continuous,
}

impl SmoothingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SmoothingMode::Simple => "simple",
            SmoothingMode::Continuous => "continuous",
        }
    }
}

impl std::str::FromStr for SmoothingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(SmoothingMode::Simple),
            "continuous" => Ok(SmoothingMode::Continuous),
            other => Err(format!("unknown smoothing mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatorSettings {
    pub smoothing: SmoothingMode,
    pub alpha: f64,
    pub eye_contact_threshold: f64,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            smoothing: SmoothingMode::Continuous,
            alpha: 0.1,
            eye_contact_threshold: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { version: u64 },
    Failed,
    Stale,
}

#[derive(Debug)]
pub struct ResultAggregator {
    settings: AggregatorSettings,
    snapshot: AnalysisSnapshot,
    last_video_generation: Option<u64>,
    last_audio_generation: Option<u64>,
}

impl ResultAggregator {
    pub fn new(settings: AggregatorSettings) -> Self {
        Self {
            settings,
            snapshot: AnalysisSnapshot::default(),
            last_video_generation: None,
            last_audio_generation: None,
        }
    }

    pub fn snapshot(&self) -> &AnalysisSnapshot {
        &self.snapshot
    }

    pub fn apply(&mut self, outcome: &JobOutcome) -> ApplyOutcome {
        let last = match outcome.modality {
            Modality::Video => &mut self.last_video_generation,
            Modality::Audio => &mut self.last_audio_generation,
        };
        if matches!(*last, Some(applied) if outcome.generation < applied) {
            return ApplyOutcome::Stale;
        }

        let payload = match &outcome.result {
            Ok(payload) => payload,
            Err(_) => return ApplyOutcome::Failed,
        };
        *last = Some(outcome.generation);

        match payload {
            AnalysisPayload::Vision(obs) => self.apply_vision(obs),
            AnalysisPayload::Audio(obs) => self.apply_audio(obs),
        }

        self.snapshot.version += 1;
        self.snapshot.last_updated = Some(Utc::now());
        ApplyOutcome::Applied {
            version: self.snapshot.version,
        }
    }

    fn apply_vision(&mut self, obs: &VisionObservation) {
        let snap = &mut self.snapshot;
        snap.face_detected = obs.face_detected();

        if let Some(emotion) = obs.emotion.filter(|e| e.is_finite()) {
            let tension = emotion.negative_affect();
            let confidence = emotion.positive_affect();
            match self.settings.smoothing {
                SmoothingMode::Simple => {
                    snap.tension_level = Some(tension);
                    snap.confidence_score = Some(confidence);
                }
                SmoothingMode::Continuous => {
                    snap.tension_level = Some(ema(snap.tension_level, tension, self.settings.alpha));
                    snap.confidence_score =
                        Some(ema(snap.confidence_score, confidence, self.settings.alpha));
                }
            }
            if let Some((label, score)) = emotion.dominant() {
                snap.dominant_emotion = Some(label.to_string());
                snap.emotion_confidence = Some((score / 100.0).clamp(0.0, 1.0));
            }
        }

        if let Some(gaze) = obs.gaze {
            let magnitude = gaze.magnitude();
            if gaze.x.is_finite() && gaze.y.is_finite() && magnitude.is_finite() {
                let indicator = if magnitude < self.settings.eye_contact_threshold {
                    1.0
                } else {
                    0.0
                };
                snap.gaze = Some(GazeState {
                    x: gaze.x,
                    y: gaze.y,
                    magnitude,
                    eye_contact_score: indicator,
                });
                snap.eye_contact_ratio =
                    Some(ema(snap.eye_contact_ratio, indicator, self.settings.alpha));
            }
        }

        if let Some(pose) = obs.head_pose {
            if pose.yaw.is_finite() && pose.pitch.is_finite() && pose.roll.is_finite() {
                snap.head_pose = Some(pose);
                snap.head_pose_stability = Some(head_stability(pose.yaw, pose.pitch, pose.roll));
            }
        }

        if let Some(posture) = obs.posture {
            if posture.score.is_finite() && posture.angle.is_finite() && posture.tension.is_finite()
            {
                snap.posture = Some(posture);
            }
        }

        if let Some(gesture) = obs.gesture.as_ref().filter(|g| g.activity.is_finite()) {
            snap.gesture = Some(gesture.clone());
        }
    }

    fn apply_audio(&mut self, obs: &AudioObservation) {
        let audio = &mut self.snapshot.audio;
        if let Some(pitch) = obs.pitch_hz.filter(|v| v.is_finite()) {
            audio.pitch = Some(pitch);
        }
        if let Some(volume) = obs.volume_db.filter(|v| v.is_finite()) {
            audio.volume = Some(volume);
        }
        if let Some(clarity) = obs.clarity.filter(|v| v.is_finite()) {
            audio.clarity = Some(clarity);
        }
        if let Some(emotion) = obs.speech_emotion.as_ref() {
            audio.speech_emotion = Some(emotion.clone());
        }
    }
}

fn ema(state: Option<f64>, observation: f64, alpha: f64) -> f64 {
    match state {
        Some(s) => (1.0 - alpha) * s + alpha * observation,
        None => observation,
    }
}

pub fn head_stability(yaw: f64, pitch: f64, roll: f64) -> f64 {
    (1.0 - (yaw.abs() + pitch.abs() + roll.abs()) / 90.0).max(0.0)
}
