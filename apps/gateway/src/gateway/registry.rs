//! Connection registry: every live WebSocket, its session binding and its
//! outbound channel.
//!
//! Owned by the gateway core and only touched under its lock. The registry
//! keeps a reverse `session → connection` map so completions can be routed;
//! both directions are updated together so neither can dangle.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::models::messages::Outbound;

pub type ConnectionId = Uuid;

#[derive(Debug)]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
    pub authenticated: bool,
    pub bound_session_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_seen: Instant,
    pub outbound: mpsc::Sender<Outbound>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ConnectionInfo>,
    session_bindings: HashMap<String, ConnectionId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, outbound: mpsc::Sender<Outbound>) -> ConnectionId {
        let connection_id = Uuid::new_v4();
        self.connections.insert(
            connection_id,
            ConnectionInfo {
                connection_id,
                authenticated: false,
                bound_session_id: None,
                connected_at: Utc::now(),
                last_seen: Instant::now(),
                outbound,
            },
        );
        connection_id
    }

    /// Binds `connection_id` to `session_id`. Last writer wins: the
    /// connection's previous session and the session's previous connection
    /// are both detached. Returns `false` only for an unknown connection.
    pub fn authenticate(&mut self, connection_id: ConnectionId, session_id: &str) -> bool {
        if !self.connections.contains_key(&connection_id) {
            return false;
        }

        if let Some(previous) = self
            .session_bindings
            .insert(session_id.to_string(), connection_id)
        {
            if previous != connection_id {
                if let Some(other) = self.connections.get_mut(&previous) {
                    debug!(
                        "Session {session_id} rebound from connection {previous} to {connection_id}"
                    );
                    other.bound_session_id = None;
                    other.authenticated = false;
                }
            }
        }

        let Some(conn) = self.connections.get_mut(&connection_id) else {
            return false;
        };
        if let Some(old_session) = conn.bound_session_id.replace(session_id.to_string()) {
            if old_session != session_id
                && self.session_bindings.get(&old_session) == Some(&connection_id)
            {
                self.session_bindings.remove(&old_session);
            }
        }
        conn.authenticated = true;
        true
    }

    pub fn lookup(&self, connection_id: ConnectionId) -> Option<&ConnectionInfo> {
        self.connections.get(&connection_id)
    }

    /// Removes the connection and its session binding. Unknown ids are a no-op.
    pub fn unregister(&mut self, connection_id: ConnectionId) -> Option<ConnectionInfo> {
        let info = self.connections.remove(&connection_id)?;
        if let Some(session_id) = info.bound_session_id.as_deref() {
            if self.session_bindings.get(session_id) == Some(&connection_id) {
                self.session_bindings.remove(session_id);
            }
        }
        Some(info)
    }

    pub fn touch(&mut self, connection_id: ConnectionId, now: Instant) {
        if let Some(conn) = self.connections.get_mut(&connection_id) {
            conn.last_seen = now;
        }
    }

    pub fn connection_for_session(&self, session_id: &str) -> Option<&ConnectionInfo> {
        self.session_bindings
            .get(session_id)
            .and_then(|id| self.connections.get(id))
    }

    /// Detaches whatever connection is bound to `session_id` (session closed).
    pub fn unbind_session(&mut self, session_id: &str) {
        if let Some(connection_id) = self.session_bindings.remove(session_id) {
            if let Some(conn) = self.connections.get_mut(&connection_id) {
                conn.bound_session_id = None;
                conn.authenticated = false;
            }
        }
    }

    pub fn is_session_bound(&self, session_id: &str) -> bool {
        self.session_bindings.contains_key(session_id)
    }

    pub fn idle_connections(&self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| now.saturating_duration_since(c.last_seen) >= timeout)
            .map(|c| c.connection_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(n: usize) -> (ConnectionRegistry, Vec<ConnectionId>, Vec<mpsc::Receiver<Outbound>>) {
        let mut registry = ConnectionRegistry::new();
        let mut ids = Vec::new();
        let mut rxs = Vec::new();
        for _ in 0..n {
            let (tx, rx) = mpsc::channel(4);
            ids.push(registry.register(tx));
            rxs.push(rx);
        }
        (registry, ids, rxs)
    }

    #[test]
    fn test_register_starts_unauthenticated() {
        let (registry, ids, _rx) = registry_with(1);
        let info = registry.lookup(ids[0]).unwrap();
        assert!(!info.authenticated);
        assert!(info.bound_session_id.is_none());
    }

    #[test]
    fn test_authenticate_binds_session() {
        let (mut registry, ids, _rx) = registry_with(1);
        assert!(registry.authenticate(ids[0], "s1"));
        let info = registry.lookup(ids[0]).unwrap();
        assert!(info.authenticated);
        assert_eq!(info.bound_session_id.as_deref(), Some("s1"));
        assert_eq!(registry.connection_for_session("s1").unwrap().connection_id, ids[0]);
    }

    #[test]
    fn test_authenticate_unknown_connection_fails() {
        let mut registry = ConnectionRegistry::new();
        assert!(!registry.authenticate(Uuid::new_v4(), "s1"));
        assert!(!registry.is_session_bound("s1"));
    }

    #[test]
    fn test_reauthenticate_overwrites_binding() {
        let (mut registry, ids, _rx) = registry_with(1);
        registry.authenticate(ids[0], "s1");
        assert!(registry.authenticate(ids[0], "s2"));
        assert_eq!(registry.lookup(ids[0]).unwrap().bound_session_id.as_deref(), Some("s2"));
        assert!(!registry.is_session_bound("s1"));
        assert!(registry.is_session_bound("s2"));
    }

    #[test]
    fn test_second_connection_takes_over_session() {
        let (mut registry, ids, _rx) = registry_with(2);
        registry.authenticate(ids[0], "s1");
        registry.authenticate(ids[1], "s1");

        assert_eq!(registry.connection_for_session("s1").unwrap().connection_id, ids[1]);
        let first = registry.lookup(ids[0]).unwrap();
        assert!(first.bound_session_id.is_none());
        assert!(!first.authenticated);

        // Tearing down the displaced connection must not drop the new binding.
        registry.unregister(ids[0]);
        assert_eq!(registry.connection_for_session("s1").unwrap().connection_id, ids[1]);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let (mut registry, ids, _rx) = registry_with(1);
        registry.authenticate(ids[0], "s1");
        assert!(registry.unregister(ids[0]).is_some());
        assert!(registry.unregister(ids[0]).is_none());
        assert!(registry.unregister(Uuid::new_v4()).is_none());
        assert_eq!(registry.len(), 0);
        assert!(!registry.is_session_bound("s1"));
    }

    #[test]
    fn test_idle_connections() {
        let (mut registry, ids, _rx) = registry_with(2);
        let start = Instant::now();
        registry.touch(ids[1], start + Duration::from_secs(100));

        let idle = registry.idle_connections(start + Duration::from_secs(120), Duration::from_secs(60));
        assert_eq!(idle, vec![ids[0]]);
    }

    #[test]
    fn test_unbind_session_clears_both_sides() {
        let (mut registry, ids, _rx) = registry_with(1);
        registry.authenticate(ids[0], "s1");
        registry.unbind_session("s1");
        assert!(!registry.is_session_bound("s1"));
        assert!(!registry.lookup(ids[0]).unwrap().authenticated);
    }
}
