// Real-time analysis gateway.
// The coordinator owns connection, session and scheduling state behind one
// coarse lock. Inference runs in the executor; completions come back over a
// channel drained by a single loop, so workers never touch shared state.

pub mod aggregator;
pub mod buffer;
pub mod codec;
pub mod executor;
pub mod frontend;
pub mod handlers;
pub mod lifecycle;
pub mod registry;
pub mod sampler;
pub mod scheduler;
pub mod suggestions;

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::analysis::{AudioAnalyzer, Capabilities, VisionAnalyzer};
use crate::errors::GatewayError;
use crate::models::frame::{FrameRecord, Modality};
use crate::models::messages::{
    AnalysisErrorEvent, AnalysisPush, Freshness, Outbound, ServerMessage, SessionStatus,
    StatusReport,
};
use crate::models::session::SessionHandle;

use self::aggregator::ApplyOutcome;
use self::executor::{AnalysisJob, ExecutorSettings, InferenceExecutor, JobOutcome, SubmitError};
use self::lifecycle::{LifecycleSettings, SessionLifecycleManager, SessionState};
use self::registry::{ConnectionId, ConnectionInfo, ConnectionRegistry};
use self::sampler::DebugSampler;
use self::scheduler::{Admission, AnalysisScheduler, PairKey, SchedulerSettings};

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub lifecycle: LifecycleSettings,
    pub scheduler: SchedulerSettings,
    pub executor: ExecutorSettings,
    pub idle_timeout: Duration,
    pub session_ttl: Duration,
    pub cleanup_interval: Duration,
    pub debug_sampler: Option<DebugSampler>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleSettings::default(),
            scheduler: SchedulerSettings::default(),
            executor: ExecutorSettings::default(),
            idle_timeout: Duration::from_secs(120),
            session_ttl: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(30),
            debug_sampler: None,
        }
    }
}

/// What happened to an ingested frame or chunk.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// An analysis job was queued; its result will be pushed when it completes.
    Submitted { generation: u64, sequence_id: u64 },
    /// No new pass now; here is the last known state (`Cached` or `Busy`).
    Skipped(AnalysisPush),
    /// The capability for this modality is down (reported once at auth).
    Unsupported,
    /// Admitted but nothing to analyze.
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionResult {
    Applied { version: u64 },
    Failed,
    Discarded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub closed_connections: usize,
    pub expired_sessions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    pub connections: usize,
    pub sessions: usize,
    pub queued_jobs: usize,
    pub tracked_pairs: usize,
    pub workers: usize,
    pub capabilities: Capabilities,
}

struct GatewayState {
    registry: ConnectionRegistry,
    sessions: SessionLifecycleManager,
    scheduler: AnalysisScheduler,
}

pub struct Gateway {
    state: Mutex<GatewayState>,
    executor: InferenceExecutor,
    capabilities: Capabilities,
    settings: GatewaySettings,
}

impl Gateway {
    /// Builds the gateway and its worker pool without background loops.
    /// The caller owns the completion receiver.
    pub fn with_completions(
        settings: GatewaySettings,
        vision: Arc<dyn VisionAnalyzer>,
        audio: Arc<dyn AudioAnalyzer>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<JobOutcome>) {
        let capabilities = Capabilities::detect(vision.as_ref(), audio.as_ref());
        if capabilities.degraded() {
            warn!(
                "Gateway starting degraded: vision={} ({}), audio={} ({})",
                capabilities.vision,
                vision.name(),
                capabilities.audio,
                audio.name()
            );
        }

        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let executor = InferenceExecutor::spawn(settings.executor, vision, audio, completions_tx);

        let gateway = Arc::new(Self {
            state: Mutex::new(GatewayState {
                registry: ConnectionRegistry::new(),
                sessions: SessionLifecycleManager::new(settings.lifecycle),
                scheduler: AnalysisScheduler::new(settings.scheduler),
            }),
            executor,
            capabilities,
            settings,
        });
        (gateway, completions_rx)
    }

    /// Builds the gateway and spawns the completion loop and cleanup sweeper.
    pub fn start(
        settings: GatewaySettings,
        vision: Arc<dyn VisionAnalyzer>,
        audio: Arc<dyn AudioAnalyzer>,
    ) -> Arc<Self> {
        let (gateway, completions) = Self::with_completions(settings, vision, audio);
        tokio::spawn(run_completion_loop(Arc::downgrade(&gateway), completions));
        tokio::spawn(run_sweeper(
            Arc::downgrade(&gateway),
            gateway.settings.cleanup_interval,
        ));
        gateway
    }

    pub fn stats(&self) -> GatewayStats {
        let state = self.state.lock();
        GatewayStats {
            connections: state.registry.len(),
            sessions: state.sessions.len(),
            queued_jobs: self.executor.queued(),
            tracked_pairs: state.scheduler.tracked_pairs(),
            workers: self.executor.settings().workers,
            capabilities: self.capabilities,
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Sessions
    // ────────────────────────────────────────────────────────────────────

    pub fn create_session(&self, user_id: &str, session_id: Option<&str>) -> (SessionHandle, bool) {
        self.state.lock().sessions.create_or_get(session_id, user_id)
    }

    /// Closes the session, cancels its scheduler state and detaches its
    /// connection (which is told to re-authenticate).
    pub fn close_session(&self, session_id: &str) -> bool {
        let mut guard = self.state.lock();
        let GatewayState {
            registry,
            sessions,
            scheduler,
        } = &mut *guard;

        if sessions.close(session_id).is_none() {
            return false;
        }
        scheduler.cancel_session(session_id);
        if let Some(conn) = registry.connection_for_session(session_id) {
            deliver(
                conn,
                ServerMessage::Error(GatewayError::SessionNotFound(session_id.to_string()).to_event()),
            );
        }
        registry.unbind_session(session_id);
        true
    }

    pub fn session_status(&self, session_id: &str) -> Option<SessionStatus> {
        let state = self.state.lock();
        session_status(&state, session_id)
    }

    // ────────────────────────────────────────────────────────────────────
    // Connections
    // ────────────────────────────────────────────────────────────────────

    pub fn connect(&self, outbound: mpsc::Sender<Outbound>) -> ConnectionId {
        let connection_id = self.state.lock().registry.register(outbound);
        info!("Connection {connection_id} opened");
        connection_id
    }

    /// Idempotent; teardown may race with the sweeper.
    pub fn disconnect(&self, connection_id: ConnectionId) {
        if let Some(info) = self.state.lock().registry.unregister(connection_id) {
            info!(
                "Connection {connection_id} closed (session: {})",
                info.bound_session_id.as_deref().unwrap_or("-")
            );
        }
    }

    pub fn touch(&self, connection_id: ConnectionId) {
        self.state.lock().registry.touch(connection_id, Instant::now());
    }

    /// Binds the connection to an existing session. The returned status
    /// carries the capability flags, which is how clients learn the gateway
    /// is degraded.
    pub fn authenticate(
        &self,
        connection_id: ConnectionId,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<StatusReport, GatewayError> {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let GatewayState {
            registry, sessions, ..
        } = &mut *guard;

        registry.touch(connection_id, now);
        let session = sessions
            .get_mut(session_id)
            .filter(|s| s.session.is_active())
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.to_string()))?;

        if let Some(user_id) = user_id {
            if user_id != session.session.user_id {
                return Err(GatewayError::SessionMismatch(session_id.to_string()));
            }
        }

        if !registry.authenticate(connection_id, session_id) {
            return Err(GatewayError::UnknownConnection);
        }
        session.session.last_activity = now;
        info!("Connection {connection_id} authenticated for session {session_id}");

        Ok(self.status_report(&guard, connection_id))
    }

    pub fn status(&self, connection_id: ConnectionId) -> Result<StatusReport, GatewayError> {
        let mut guard = self.state.lock();
        guard.registry.touch(connection_id, Instant::now());
        if guard.registry.lookup(connection_id).is_none() {
            return Err(GatewayError::UnknownConnection);
        }
        Ok(self.status_report(&guard, connection_id))
    }

    fn status_report(&self, state: &GatewayState, connection_id: ConnectionId) -> StatusReport {
        let conn = state.registry.lookup(connection_id);
        let session_id = conn.and_then(|c| c.bound_session_id.clone());
        StatusReport {
            connection_id,
            connected_at: conn.map(|c| c.connected_at),
            authenticated: conn.map(|c| c.authenticated).unwrap_or(false),
            session: session_id
                .as_deref()
                .and_then(|id| session_status(state, id)),
            session_id,
            capabilities: self.capabilities,
            degraded: self.capabilities.degraded(),
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Ingestion
    // ────────────────────────────────────────────────────────────────────

    /// Buffers one frame/chunk and, if the scheduler admits it, hands the
    /// newest buffered record to the executor. Never waits on inference.
    pub fn ingest(
        &self,
        connection_id: ConnectionId,
        modality: Modality,
        payload: Bytes,
        client_timestamp: Option<f64>,
    ) -> Result<IngestOutcome, GatewayError> {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let GatewayState {
            registry,
            sessions,
            scheduler,
        } = &mut *guard;

        registry.touch(connection_id, now);
        let conn = registry
            .lookup(connection_id)
            .ok_or(GatewayError::UnknownConnection)?;
        let session_id = match (&conn.bound_session_id, conn.authenticated) {
            (Some(id), true) => id.clone(),
            _ => return Err(GatewayError::NotAuthenticated),
        };
        let state = sessions
            .get_mut(&session_id)
            .filter(|s| s.session.is_active())
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.clone()))?;

        let sequence_id = state.session.next_sequence();
        if modality == Modality::Video {
            if let Some(sampler) = &self.settings.debug_sampler {
                sampler.maybe_sample(&session_id, sequence_id, &payload);
            }
        }

        if !self.capabilities.supports(modality) {
            return Ok(IngestOutcome::Unsupported);
        }

        let record =
            FrameRecord::new(modality, payload, sequence_id).with_client_timestamp(client_timestamp);
        let pushed = state.buffer.push_frame(record);
        if let Some(evicted) = pushed.evicted_sequence {
            debug!(
                "Session {session_id}: {modality} buffer full ({}), evicted record {evicted}",
                state.buffer.capacity(modality)
            );
        }

        let key = PairKey::new(session_id.clone(), modality);
        let generation = match scheduler.try_admit(&key, now) {
            Admission::Admitted { generation } => generation,
            Admission::InFlight => {
                return Ok(IngestOutcome::Skipped(cached_push(&session_id, state, Freshness::Busy)))
            }
            Admission::Debounced => {
                return Ok(IngestOutcome::Skipped(cached_push(
                    &session_id,
                    state,
                    Freshness::Cached,
                )))
            }
        };

        let Some(record) = state.buffer.pop_latest(modality) else {
            scheduler.abandon(&key, generation);
            return Ok(IngestOutcome::Idle);
        };
        let sequence_id = record.sequence_id;

        let job = AnalysisJob {
            session_id: session_id.clone(),
            modality,
            generation,
            record,
        };
        match self.executor.try_submit(job) {
            Ok(()) => Ok(IngestOutcome::Submitted {
                generation,
                sequence_id,
            }),
            Err(e) => {
                scheduler.abandon(&key, generation);
                match e {
                    SubmitError::Saturated => {
                        debug!("Inference queue saturated; {modality} for {session_id} is busy")
                    }
                    SubmitError::ShutDown => error!("Inference executor is gone: {e}"),
                }
                Ok(IngestOutcome::Skipped(cached_push(&session_id, state, Freshness::Busy)))
            }
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Completions
    // ────────────────────────────────────────────────────────────────────

    /// Merges one finished job into its session and pushes the result to the
    /// session's connection. Results for closed sessions, cancelled pairs or
    /// superseded generations are dropped.
    pub fn apply_outcome(&self, outcome: JobOutcome) -> CompletionResult {
        let key = PairKey::new(outcome.session_id.clone(), outcome.modality);
        let mut guard = self.state.lock();
        let GatewayState {
            registry,
            sessions,
            scheduler,
        } = &mut *guard;

        if !scheduler.complete(&key, outcome.generation, Instant::now()) {
            debug!(
                "Discarding stale {} result {} for session {}",
                outcome.modality, outcome.generation, outcome.session_id
            );
            return CompletionResult::Discarded;
        }

        let Some(state) = sessions
            .get_mut(&outcome.session_id)
            .filter(|s| s.session.is_active())
        else {
            return CompletionResult::Discarded;
        };

        let (result, message) = match state.aggregator.apply(&outcome) {
            ApplyOutcome::Applied { version } => {
                let snapshot = state.aggregator.snapshot().clone();
                let push = AnalysisPush {
                    session_id: outcome.session_id.clone(),
                    freshness: Freshness::Fresh,
                    sequence_id: Some(outcome.sequence_id),
                    duration_ms: Some(outcome.duration.as_secs_f64() * 1000.0),
                    latency_ms: Some(outcome.received_at.elapsed().as_secs_f64() * 1000.0),
                    client_timestamp: outcome.client_timestamp,
                    suggestions: suggestions::suggest(&snapshot),
                    snapshot,
                };
                (
                    CompletionResult::Applied { version },
                    ServerMessage::analysis(outcome.modality, push),
                )
            }
            ApplyOutcome::Failed => {
                let message = match &outcome.result {
                    Err(failure) => failure.to_string(),
                    Ok(_) => String::new(),
                };
                warn!(
                    "{} analysis failed for session {} (record {}): {message}",
                    outcome.modality, outcome.session_id, outcome.sequence_id
                );
                (
                    CompletionResult::Failed,
                    ServerMessage::AnalysisError(AnalysisErrorEvent {
                        session_id: outcome.session_id.clone(),
                        modality: outcome.modality,
                        sequence_id: outcome.sequence_id,
                        message,
                    }),
                )
            }
            ApplyOutcome::Stale => return CompletionResult::Discarded,
        };

        if let Some(conn) = registry.connection_for_session(&outcome.session_id) {
            deliver(conn, message);
        }
        result
    }

    // ────────────────────────────────────────────────────────────────────
    // Cleanup
    // ────────────────────────────────────────────────────────────────────

    /// Closes idle connections and expires sessions that have been unbound
    /// and inactive for longer than the session TTL.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let mut guard = self.state.lock();
        let GatewayState {
            registry,
            sessions,
            scheduler,
        } = &mut *guard;
        let mut report = SweepReport::default();

        for connection_id in registry.idle_connections(now, self.settings.idle_timeout) {
            if let Some(info) = registry.unregister(connection_id) {
                let _ = info.outbound.try_send(Outbound::Close {
                    reason: "idle timeout",
                });
                info!("Connection {connection_id} closed after idle timeout");
                report.closed_connections += 1;
            }
        }

        for session_id in sessions.expired(now, self.settings.session_ttl) {
            if registry.is_session_bound(&session_id) {
                continue;
            }
            if sessions.close(&session_id).is_some() {
                scheduler.cancel_session(&session_id);
                report.expired_sessions += 1;
            }
        }

        report
    }
}

fn session_status(state: &GatewayState, session_id: &str) -> Option<SessionStatus> {
    let s = state.sessions.get(session_id)?;
    let snapshot = s.aggregator.snapshot().clone();
    Some(SessionStatus {
        session_id: s.session.session_id.clone(),
        user_id: s.session.user_id.clone(),
        created_at: s.session.created_at,
        connected: state.registry.is_session_bound(session_id),
        frames_received: s.session.frame_counter,
        buffered_video: s.buffer.len(Modality::Video),
        buffered_audio: s.buffer.len(Modality::Audio),
        dropped_frames: s.buffer.dropped(),
        in_flight_video: state
            .scheduler
            .in_flight(&PairKey::new(session_id, Modality::Video)),
        in_flight_audio: state
            .scheduler
            .in_flight(&PairKey::new(session_id, Modality::Audio)),
        suggestions: suggestions::suggest(&snapshot),
        snapshot,
    })
}

fn cached_push(session_id: &str, state: &SessionState, freshness: Freshness) -> AnalysisPush {
    let snapshot = state.aggregator.snapshot().clone();
    AnalysisPush {
        session_id: session_id.to_string(),
        freshness,
        sequence_id: None,
        duration_ms: None,
        latency_ms: None,
        client_timestamp: None,
        suggestions: suggestions::suggest(&snapshot),
        snapshot,
    }
}

/// Non-blocking send to a connection's writer. A slow client loses messages
/// rather than stalling everyone else.
fn deliver(conn: &ConnectionInfo, message: ServerMessage) -> bool {
    match conn.outbound.try_send(Outbound::Message(message)) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(
                "Outbound queue full for connection {}; dropping message",
                conn.connection_id
            );
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("Connection {} already closed", conn.connection_id);
            false
        }
    }
}

async fn run_completion_loop(
    gateway: Weak<Gateway>,
    mut completions: mpsc::UnboundedReceiver<JobOutcome>,
) {
    while let Some(outcome) = completions.recv().await {
        let Some(gateway) = gateway.upgrade() else { break };
        gateway.apply_outcome(outcome);
    }
    debug!("Completion loop stopped");
}

async fn run_sweeper(gateway: Weak<Gateway>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(100)));
    // Skip the immediate first tick
    let _ = ticker.tick().await;
    loop {
        let _ = ticker.tick().await;
        let Some(gateway) = gateway.upgrade() else { break };
        let report = gateway.sweep(Instant::now());
        if report != SweepReport::default() {
            info!(
                "Cleanup sweep: {} idle connections closed, {} sessions expired",
                report.closed_connections, report.expired_sessions
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{
        AnalyzerError, AudioObservation, EmotionScores, GazeSample, UnavailableAnalyzer,
        VisionObservation,
    };
    use crate::gateway::aggregator::{AggregatorSettings, SmoothingMode};
    use async_trait::async_trait;
    use tokio::sync::{Notify, Semaphore};

    /// Returns a fixed observation, optionally waiting on a gate first.
    /// A payload starting with 0xFF fails.
    struct TestVision {
        gate: Option<Arc<Semaphore>>,
        started: Arc<Notify>,
    }

    impl TestVision {
        fn open() -> Arc<Self> {
            Arc::new(Self {
                gate: None,
                started: Arc::new(Notify::new()),
            })
        }

        fn gated() -> Arc<Self> {
            Arc::new(Self {
                gate: Some(Arc::new(Semaphore::new(0))),
                started: Arc::new(Notify::new()),
            })
        }

        fn release(&self) {
            if let Some(gate) = &self.gate {
                gate.add_permits(16);
            }
        }
    }

    #[async_trait]
    impl VisionAnalyzer for TestVision {
        fn name(&self) -> &str {
            "test"
        }

        async fn analyze_frame(&self, image: Bytes) -> Result<VisionObservation, AnalyzerError> {
            self.started.notify_one();
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await;
            }
            if image.first() == Some(&0xFF) {
                return Err(AnalyzerError::Decode("corrupt frame".to_string()));
            }
            Ok(VisionObservation {
                emotion: Some(EmotionScores {
                    angry: 10.0,
                    fear: 5.0,
                    sad: 5.0,
                    happy: 70.0,
                    neutral: 10.0,
                    ..Default::default()
                }),
                gaze: Some(GazeSample {
                    x: 3.2,
                    y: 0.0,
                    magnitude: Some(3.2),
                }),
                ..Default::default()
            })
        }
    }

    struct TestAudio;

    #[async_trait]
    impl AudioAnalyzer for TestAudio {
        fn name(&self) -> &str {
            "test"
        }

        async fn analyze_chunk(&self, _audio: Bytes) -> Result<AudioObservation, AnalyzerError> {
            Ok(AudioObservation {
                volume_db: Some(-20.0),
                ..Default::default()
            })
        }
    }

    fn settings(min_interval: Duration) -> GatewaySettings {
        GatewaySettings {
            lifecycle: LifecycleSettings {
                aggregator: AggregatorSettings {
                    smoothing: SmoothingMode::Simple,
                    ..Default::default()
                },
                ..Default::default()
            },
            scheduler: SchedulerSettings { min_interval },
            executor: ExecutorSettings {
                workers: 2,
                queue_capacity: 8,
                job_timeout: Duration::from_secs(5),
            },
            ..Default::default()
        }
    }

    fn frame() -> Bytes {
        Bytes::from_static(b"frame")
    }

    /// Creates a session and an authenticated connection bound to it.
    fn join(
        gateway: &Gateway,
        session_id: &str,
    ) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        gateway.create_session("u1", Some(session_id));
        let (tx, rx) = mpsc::channel(32);
        let conn = gateway.connect(tx);
        gateway.authenticate(conn, session_id, Some("u1")).unwrap();
        (conn, rx)
    }

    fn expect_message(rx: &mut mpsc::Receiver<Outbound>) -> ServerMessage {
        match rx.try_recv() {
            Ok(Outbound::Message(m)) => m,
            other => panic!("expected a message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_frame_flows_through_to_visual_analysis_push() {
        let gateway = Gateway::start(settings(Duration::ZERO), TestVision::open(), Arc::new(TestAudio));
        let (conn, mut rx) = join(&gateway, "s1");

        let outcome = gateway.ingest(conn, Modality::Video, frame(), Some(1.0)).unwrap();
        assert!(matches!(outcome, IngestOutcome::Submitted { sequence_id: 1, .. }));

        let msg = match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(Outbound::Message(m))) => m,
            other => panic!("no push: {other:?}"),
        };
        let ServerMessage::VisualAnalysis(push) = msg else {
            panic!("expected visual_analysis, got {msg:?}");
        };
        assert_eq!(push.freshness, Freshness::Fresh);
        assert_eq!(push.snapshot.version, 1);
        assert_eq!(push.client_timestamp, Some(1.0));
        assert!(push.latency_ms.unwrap() >= push.duration_ms.unwrap());
        assert!((push.snapshot.tension_level.unwrap() - 0.2).abs() < 1e-9);
        assert!((push.snapshot.confidence_score.unwrap() - 0.8).abs() < 1e-9);
        assert_eq!(push.snapshot.gaze.unwrap().eye_contact_score, 1.0);
        assert!(!push.suggestions.is_empty() && push.suggestions.len() <= 3);
    }

    #[tokio::test]
    async fn test_unauthenticated_connection_cannot_ingest() {
        let (gateway, _rx) =
            Gateway::with_completions(settings(Duration::ZERO), TestVision::open(), Arc::new(TestAudio));
        let (tx, _out) = mpsc::channel(4);
        let conn = gateway.connect(tx);
        assert_eq!(
            gateway.ingest(conn, Modality::Video, frame(), None).unwrap_err(),
            GatewayError::NotAuthenticated
        );
    }

    #[tokio::test]
    async fn test_auth_against_unknown_session() {
        let (gateway, _rx) =
            Gateway::with_completions(settings(Duration::ZERO), TestVision::open(), Arc::new(TestAudio));
        let (tx, _out) = mpsc::channel(4);
        let conn = gateway.connect(tx);
        let err = gateway.authenticate(conn, "missing", None).unwrap_err();
        assert_eq!(err, GatewayError::SessionNotFound("missing".to_string()));
        assert_eq!(err.action(), Some("reauthenticate"));
    }

    #[tokio::test]
    async fn test_auth_rejects_other_users_session() {
        let (gateway, _rx) =
            Gateway::with_completions(settings(Duration::ZERO), TestVision::open(), Arc::new(TestAudio));
        gateway.create_session("owner", Some("s1"));
        let (tx, _out) = mpsc::channel(4);
        let conn = gateway.connect(tx);
        assert_eq!(
            gateway.authenticate(conn, "s1", Some("intruder")).unwrap_err(),
            GatewayError::SessionMismatch("s1".to_string())
        );
    }

    #[tokio::test]
    async fn test_second_request_inside_debounce_window_returns_cached() {
        let (gateway, mut completions) = Gateway::with_completions(
            settings(Duration::from_secs(60)),
            TestVision::open(),
            Arc::new(TestAudio),
        );
        let (conn, mut rx) = join(&gateway, "s1");

        gateway.ingest(conn, Modality::Video, frame(), None).unwrap();
        let done = completions.recv().await.unwrap();
        assert_eq!(gateway.apply_outcome(done), CompletionResult::Applied { version: 1 });
        let fresh = expect_message(&mut rx);
        assert!(matches!(fresh, ServerMessage::VisualAnalysis(_)));

        match gateway.ingest(conn, Modality::Video, frame(), None).unwrap() {
            IngestOutcome::Skipped(push) => {
                assert_eq!(push.freshness, Freshness::Cached);
                assert_eq!(push.snapshot.version, 1);
            }
            other => panic!("expected cached, got {other:?}"),
        }
        assert_eq!(gateway.session_status("s1").unwrap().snapshot.version, 1);
    }

    #[tokio::test]
    async fn test_outstanding_job_makes_pair_busy() {
        let vision = TestVision::gated();
        let (gateway, _completions) =
            Gateway::with_completions(settings(Duration::ZERO), vision.clone(), Arc::new(TestAudio));
        let (conn, _rx) = join(&gateway, "s1");

        assert!(matches!(
            gateway.ingest(conn, Modality::Video, frame(), None).unwrap(),
            IngestOutcome::Submitted { .. }
        ));
        match gateway.ingest(conn, Modality::Video, frame(), None).unwrap() {
            IngestOutcome::Skipped(push) => assert_eq!(push.freshness, Freshness::Busy),
            other => panic!("expected busy, got {other:?}"),
        }
        // Audio is an independent pair.
        assert!(matches!(
            gateway.ingest(conn, Modality::Audio, frame(), None).unwrap(),
            IngestOutcome::Submitted { .. }
        ));

        let status = gateway.session_status("s1").unwrap();
        assert!(status.in_flight_video);
        assert_eq!(status.buffered_video, 1);
        vision.release();
    }

    #[tokio::test]
    async fn test_saturated_pool_reports_busy_without_error() {
        let vision = TestVision::gated();
        let mut s = settings(Duration::ZERO);
        s.executor = ExecutorSettings {
            workers: 1,
            queue_capacity: 1,
            job_timeout: Duration::from_secs(30),
        };
        let (gateway, _completions) =
            Gateway::with_completions(s, vision.clone(), Arc::new(TestAudio));
        let (c1, _r1) = join(&gateway, "s1");
        let (c2, _r2) = join(&gateway, "s2");
        let (c3, _r3) = join(&gateway, "s3");

        gateway.ingest(c1, Modality::Video, frame(), None).unwrap();
        vision.started.notified().await;
        gateway.ingest(c2, Modality::Video, frame(), None).unwrap();

        match gateway.ingest(c3, Modality::Video, frame(), None).unwrap() {
            IngestOutcome::Skipped(push) => assert_eq!(push.freshness, Freshness::Busy),
            other => panic!("expected busy, got {other:?}"),
        }
        // The rejected pair is free to retry on the next frame.
        assert!(!gateway.session_status("s3").unwrap().in_flight_video);
        vision.release();
    }

    #[tokio::test]
    async fn test_closed_session_is_not_resurrected_by_late_result() {
        let vision = TestVision::gated();
        let (gateway, mut completions) =
            Gateway::with_completions(settings(Duration::ZERO), vision.clone(), Arc::new(TestAudio));
        let (conn, mut rx) = join(&gateway, "s1");

        gateway.ingest(conn, Modality::Video, frame(), None).unwrap();
        assert!(gateway.close_session("s1"));
        assert!(matches!(
            expect_message(&mut rx),
            ServerMessage::Error(ref e) if e.code == "SESSION_NOT_FOUND"
        ));

        vision.release();
        let late = completions.recv().await.unwrap();
        assert_eq!(gateway.apply_outcome(late.clone()), CompletionResult::Discarded);
        assert!(gateway.session_status("s1").is_none());

        // Even a session re-created under the same id ignores the old job.
        gateway.create_session("u1", Some("s1"));
        assert_eq!(gateway.apply_outcome(late), CompletionResult::Discarded);
        assert_eq!(gateway.session_status("s1").unwrap().snapshot.version, 0);

        // And the connection must re-authenticate.
        assert_eq!(
            gateway.ingest(conn, Modality::Video, frame(), None).unwrap_err(),
            GatewayError::NotAuthenticated
        );
    }

    #[tokio::test]
    async fn test_failed_analysis_sends_analysis_error_only() {
        let (gateway, mut completions) =
            Gateway::with_completions(settings(Duration::ZERO), TestVision::open(), Arc::new(TestAudio));
        let (conn, mut rx) = join(&gateway, "s1");
        let (other_conn, mut other_rx) = join(&gateway, "s2");

        gateway
            .ingest(conn, Modality::Video, Bytes::from_static(&[0xFF, 1]), None)
            .unwrap();
        let done = completions.recv().await.unwrap();
        assert_eq!(gateway.apply_outcome(done), CompletionResult::Failed);

        match expect_message(&mut rx) {
            ServerMessage::AnalysisError(e) => {
                assert_eq!(e.modality, Modality::Video);
                assert!(e.message.contains("corrupt frame"));
            }
            other => panic!("expected analysis_error, got {other:?}"),
        }
        assert_eq!(gateway.session_status("s1").unwrap().snapshot.version, 0);

        // The other connection is unaffected and keeps working.
        assert!(other_rx.try_recv().is_err());
        assert!(matches!(
            gateway.ingest(other_conn, Modality::Video, frame(), None).unwrap(),
            IngestOutcome::Submitted { .. }
        ));
    }

    #[tokio::test]
    async fn test_push_follows_rebinding() {
        let (gateway, mut completions) =
            Gateway::with_completions(settings(Duration::ZERO), TestVision::open(), Arc::new(TestAudio));
        let (old_conn, mut old_rx) = join(&gateway, "s1");
        let (tx, mut new_rx) = mpsc::channel(8);
        let new_conn = gateway.connect(tx);
        gateway.authenticate(new_conn, "s1", None).unwrap();

        assert_eq!(
            gateway.ingest(old_conn, Modality::Video, frame(), None).unwrap_err(),
            GatewayError::NotAuthenticated
        );
        gateway.ingest(new_conn, Modality::Video, frame(), None).unwrap();
        let done = completions.recv().await.unwrap();
        gateway.apply_outcome(done);

        assert!(matches!(expect_message(&mut new_rx), ServerMessage::VisualAnalysis(_)));
        assert!(old_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_degraded_capability_is_reported_once() {
        let (gateway, _rx) = Gateway::with_completions(
            settings(Duration::ZERO),
            Arc::new(UnavailableAnalyzer),
            Arc::new(TestAudio),
        );
        gateway.create_session("u1", Some("s1"));
        let (tx, mut out) = mpsc::channel(4);
        let conn = gateway.connect(tx);

        let status = gateway.authenticate(conn, "s1", None).unwrap();
        assert!(status.degraded);
        assert!(!status.capabilities.vision);
        assert!(status.capabilities.audio);

        assert!(matches!(
            gateway.ingest(conn, Modality::Video, frame(), None).unwrap(),
            IngestOutcome::Unsupported
        ));
        assert!(out.try_recv().is_err());
        assert!(matches!(
            gateway.ingest(conn, Modality::Audio, frame(), None).unwrap(),
            IngestOutcome::Submitted { .. }
        ));
    }

    #[tokio::test]
    async fn test_sweep_closes_idle_connections_and_expired_sessions() {
        let mut s = settings(Duration::ZERO);
        s.idle_timeout = Duration::from_secs(60);
        s.session_ttl = Duration::from_secs(600);
        let (gateway, _rx) = Gateway::with_completions(s, TestVision::open(), Arc::new(TestAudio));

        let (_conn, mut rx) = join(&gateway, "bound");
        gateway.create_session("u2", Some("orphan"));

        let report = gateway.sweep(Instant::now() + Duration::from_secs(61));
        assert_eq!(report.closed_connections, 1);
        assert_eq!(report.expired_sessions, 0);
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close { .. })));
        assert_eq!(gateway.stats().connections, 0);

        // After disconnect the formerly bound session can expire too.
        let report = gateway.sweep(Instant::now() + Duration::from_secs(601));
        assert_eq!(report.expired_sessions, 2);
        assert_eq!(gateway.stats().sessions, 0);
    }

    #[tokio::test]
    async fn test_disconnect_releases_binding() {
        let (gateway, _rx) =
            Gateway::with_completions(settings(Duration::ZERO), TestVision::open(), Arc::new(TestAudio));
        let (conn, _out) = join(&gateway, "s1");
        assert!(gateway.session_status("s1").unwrap().connected);

        gateway.disconnect(conn);
        gateway.disconnect(conn);
        assert!(!gateway.session_status("s1").unwrap().connected);
        assert_eq!(gateway.status(conn).unwrap_err(), GatewayError::UnknownConnection);
    }

    #[tokio::test]
    async fn test_status_reports_session_details() {
        let (gateway, _rx) =
            Gateway::with_completions(settings(Duration::ZERO), TestVision::open(), Arc::new(TestAudio));
        let (conn, _out) = join(&gateway, "s1");
        gateway.ingest(conn, Modality::Audio, frame(), None).unwrap();

        let status = gateway.status(conn).unwrap();
        assert!(status.authenticated);
        assert!(status.connected_at.is_some());
        assert_eq!(status.session_id.as_deref(), Some("s1"));
        let session = status.session.unwrap();
        assert_eq!(session.frames_received, 1);
        assert!(session.in_flight_audio);
        assert!(!status.degraded);
    }

    #[tokio::test]
    async fn test_ingest_samples_every_nth_video_frame() {
        let dir = tempfile::tempdir().unwrap();
        let sampler = DebugSampler::new(dir.path(), 2);
        let mut s = settings(Duration::from_secs(60));
        s.debug_sampler = Some(sampler.clone());
        let (gateway, _rx) = Gateway::with_completions(s, TestVision::open(), Arc::new(TestAudio));
        let (conn, _out) = join(&gateway, "s1");

        for _ in 0..4 {
            gateway.ingest(conn, Modality::Video, frame(), None).unwrap();
        }
        // Audio is never sampled, and it advances the shared sequence.
        gateway.ingest(conn, Modality::Audio, frame(), None).unwrap();
        gateway.ingest(conn, Modality::Video, frame(), None).unwrap();

        let second = sampler.path_for("s1", 2);
        let fourth = sampler.path_for("s1", 4);
        let written = |p: &std::path::Path| std::fs::read(p).map(|b| b == b"frame").unwrap_or(false);
        for _ in 0..200 {
            if written(&second) && written(&fourth) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(written(&second));
        assert!(written(&fourth));
        assert!(!sampler.path_for("s1", 1).exists());
        assert!(!sampler.path_for("s1", 3).exists());
        assert!(!sampler.path_for("s1", 5).exists());
    }
}
