use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A logical interview run. Spans one or more connections over time.
#[derive(Debug)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub frame_counter: u64,
    pub last_activity: Instant,
    active: bool,
}

impl Session {
    pub fn new(session_id: String, user_id: String) -> Self {
        Self {
            session_id,
            user_id,
            created_at: Utc::now(),
            frame_counter: 0,
            last_activity: Instant::now(),
            active: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Assigns the next sequence id and records activity.
    pub fn next_sequence(&mut self) -> u64 {
        self.frame_counter += 1;
        self.last_activity = Instant::now();
        self.frame_counter
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            created_at: self.created_at,
        }
    }
}

/// Identity of a session as returned to callers of `create_or_get`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionHandle {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}
