//! Coaching hints derived from the current snapshot.
//!
//! Pure function, fixed thresholds, at most three hints in priority order.
//! The list is never empty: with nothing to flag the candidate gets one
//! encouraging message.

use crate::models::snapshot::AnalysisSnapshot;

pub const MAX_SUGGESTIONS: usize = 3;

const TENSION_HIGH: f64 = 0.3;
const EYE_CONTACT_LOW: f64 = 0.6;
const STABILITY_LOW: f64 = 0.7;
const POSTURE_LOW: f64 = 0.6;
const VOLUME_LOW_DB: f64 = -35.0;
const CONFIDENCE_HIGH: f64 = 0.8;

const RELAX: &str = "Take a slow breath and relax your shoulders.";
const EYE_CONTACT: &str = "Try to look at the camera more often.";
const STILLNESS: &str = "Keep your head steady while you answer.";
const POSTURE: &str = "Sit up straight to project confidence.";
const SPEAK_UP: &str = "Speak a little louder and more clearly.";
const POSITIVE: &str = "Great composure. Keep it up!";
const DEFAULT: &str = "You're doing well. Keep going.";

pub fn suggest(snapshot: &AnalysisSnapshot) -> Vec<String> {
    let above = |v: Option<f64>, t: f64| v.map(|v| v > t).unwrap_or(false);
    let below = |v: Option<f64>, t: f64| v.map(|v| v < t).unwrap_or(false);

    let candidates = [
        (above(snapshot.tension_level, TENSION_HIGH), RELAX),
        (below(snapshot.eye_contact_ratio, EYE_CONTACT_LOW), EYE_CONTACT),
        (below(snapshot.head_pose_stability, STABILITY_LOW), STILLNESS),
        (below(snapshot.posture.map(|p| p.score), POSTURE_LOW), POSTURE),
        (below(snapshot.audio.volume, VOLUME_LOW_DB), SPEAK_UP),
        (above(snapshot.confidence_score, CONFIDENCE_HIGH), POSITIVE),
    ];

    let mut hints: Vec<String> = candidates
        .iter()
        .filter(|(triggered, _)| *triggered)
        .take(MAX_SUGGESTIONS)
        .map(|(_, hint)| hint.to_string())
        .collect();

    if hints.is_empty() {
        hints.push(DEFAULT.to_string());
    }
    hints
}
