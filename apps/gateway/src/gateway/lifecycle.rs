//! Session lifecycle: one state bundle (session, buffers, snapshot) per session id.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::info;
use uuid::Uuid;

use crate::gateway::aggregator::{AggregatorSettings, ResultAggregator};
use crate::gateway::buffer::{BufferSettings, StreamIngestionBuffer};
use crate::models::session::{Session, SessionHandle};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LifecycleSettings {
    pub buffer: BufferSettings,
    pub aggregator: AggregatorSettings,
}

#[derive(Debug)]
pub struct SessionState {
    pub session: Session,
    pub buffer: StreamIngestionBuffer,
    pub aggregator: ResultAggregator,
}

#[derive(Debug, Default)]
pub struct SessionLifecycleManager {
    settings: LifecycleSettings,
    sessions: HashMap<String, SessionState>,
}

impl SessionLifecycleManager {
    pub fn new(settings: LifecycleSettings) -> Self {
        Self {
            settings,
            sessions: HashMap::new(),
        }
    }

    /// Returns the existing session for `session_id`, or creates one.
    /// A missing or blank id gets a fresh UUID. The flag is `true` on creation.
    pub fn create_or_get(&mut self, session_id: Option<&str>, user_id: &str) -> (SessionHandle, bool) {
        let session_id = match session_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };

        if let Some(existing) = self.sessions.get(&session_id) {
            return (existing.session.handle(), false);
        }

        let session = Session::new(session_id.clone(), user_id.to_string());
        let handle = session.handle();
        self.sessions.insert(
            session_id.clone(),
            SessionState {
                session,
                buffer: StreamIngestionBuffer::new(self.settings.buffer),
                aggregator: ResultAggregator::new(self.settings.aggregator),
            },
        );
        info!("Created session {session_id} for user {user_id}");
        (handle, true)
    }

    pub fn get(&self, session_id: &str) -> Option<&SessionState> {
        self.sessions.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut SessionState> {
        self.sessions.get_mut(session_id)
    }

    /// Flags the session inactive and evicts its buffers and snapshot.
    /// Safe while jobs are in flight: their results find no session and are dropped.
    pub fn close(&mut self, session_id: &str) -> Option<SessionState> {
        let mut state = self.sessions.remove(session_id)?;
        state.session.deactivate();
        state.buffer.clear();
        info!(
            "Closed session {session_id} after {} frames",
            state.session.frame_counter
        );
        Some(state)
    }

    /// Sessions with no activity for at least `ttl`.
    pub fn expired(&self, now: Instant, ttl: Duration) -> Vec<String> {
        self.sessions
            .values()
            .filter(|s| now.saturating_duration_since(s.session.last_activity) >= ttl)
            .map(|s| s.session.session_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
