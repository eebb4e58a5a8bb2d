//! Analysis admission: decides whether a (session, modality) pair may start
//! an inference pass right now.
//!
//! Policy, in order:
//! 1. Single-flight: a pair with an outstanding job is `InFlight`.
//! 2. Debounce: a pair whose last pass completed less than `min_interval`
//!    ago is `Debounced`.
//! 3. Otherwise `Admitted` with a fresh generation.
//!
//! Inference throughput is therefore bounded by `min_interval`, not by how
//! fast clients send frames.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::models::frame::Modality;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub min_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey {
    pub session_id: String,
    pub modality: Modality,
}

impl PairKey {
    pub fn new(session_id: impl Into<String>, modality: Modality) -> Self {
        Self {
            session_id: session_id.into(),
            modality,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { generation: u64 },
    InFlight,
    Debounced,
}

#[derive(Debug, Default)]
struct PairState {
    in_flight: Option<u64>,
    last_completed: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct AnalysisScheduler {
    settings: SchedulerSettings,
    pairs: HashMap<PairKey, PairState>,
    /// Scheduler-wide so a re-created session never reuses a generation.
    next_generation: u64,
}

impl AnalysisScheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self {
            settings,
            pairs: HashMap::new(),
            next_generation: 0,
        }
    }

    pub fn try_admit(&mut self, key: &PairKey, now: Instant) -> Admission {
        let min_interval = self.settings.min_interval;
        let state = self.pairs.entry(key.clone()).or_default();

        if state.in_flight.is_some() {
            return Admission::InFlight;
        }

        if let Some(last) = state.last_completed {
            if now.saturating_duration_since(last) < min_interval {
                return Admission::Debounced;
            }
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        state.in_flight = Some(generation);
        Admission::Admitted { generation }
    }

    /// Releases an admission that did no work (empty buffer, pool saturated).
    /// The debounce window is left as it was.
    pub fn abandon(&mut self, key: &PairKey, generation: u64) {
        if let Some(state) = self.pairs.get_mut(key) {
            if state.in_flight == Some(generation) {
                state.in_flight = None;
            }
        }
    }

    /// Marks `generation` complete. Returns `false` if it is not the pair's
    /// outstanding job (stale or cancelled); the caller must discard its result.
    pub fn complete(&mut self, key: &PairKey, generation: u64, now: Instant) -> bool {
        match self.pairs.get_mut(key) {
            Some(state) if state.in_flight == Some(generation) => {
                state.in_flight = None;
                state.last_completed = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Forgets every pair of the session; outstanding jobs become stale.
    pub fn cancel_session(&mut self, session_id: &str) {
        self.pairs.retain(|key, _| key.session_id != session_id);
    }

    pub fn in_flight(&self, key: &PairKey) -> bool {
        self.pairs
            .get(key)
            .map(|s| s.in_flight.is_some())
            .unwrap_or(false)
    }

    pub fn tracked_pairs(&self) -> usize {
        self.pairs.len()
    }
}
