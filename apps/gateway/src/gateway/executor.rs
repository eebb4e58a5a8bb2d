//! Inference executor: a fixed pool of workers draining one bounded job queue.
//!
//! # Flow
//! - `try_submit` never waits: a full queue is reported as `Saturated` and the
//!   caller treats the pair as busy.
//! - Each worker runs the analyzer call in its own task under a soft timeout.
//!   On timeout the task is aborted (best effort; a blocking backend call may
//!   keep running) and the worker moves on.
//! - Every job produces exactly one `JobOutcome` on the completion channel.
//!   Workers never touch sessions, buffers or the registry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::analysis::{AudioAnalyzer, AudioObservation, VisionAnalyzer, VisionObservation};
use crate::models::frame::{FrameRecord, Modality};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub job_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            queue_capacity: 200,
            job_timeout: Duration::from_secs(5),
        }
    }
}

pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(6)
}

#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub session_id: String,
    pub modality: Modality,
    pub generation: u64,
    pub record: FrameRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisPayload {
    Vision(VisionObservation),
    Audio(AudioObservation),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisFailure {
    #[error("analysis timed out after {0:?}")]
    TimedOut(Duration),

    #[error("analyzer failed: {0}")]
    Analyzer(String),

    #[error("analysis task panicked")]
    Panicked,
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub session_id: String,
    pub modality: Modality,
    pub generation: u64,
    pub sequence_id: u64,
    /// Server receive time of the analyzed record.
    pub received_at: Instant,
    pub client_timestamp: Option<f64>,
    pub result: Result<AnalysisPayload, AnalysisFailure>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("inference queue is full")]
    Saturated,

    #[error("inference executor has shut down")]
    ShutDown,
}

pub struct InferenceExecutor {
    jobs: mpsc::Sender<AnalysisJob>,
    settings: ExecutorSettings,
}

impl InferenceExecutor {
    /// Starts `settings.workers` worker tasks. Must be called inside a Tokio runtime.
    pub fn spawn(
        settings: ExecutorSettings,
        vision: Arc<dyn VisionAnalyzer>,
        audio: Arc<dyn AudioAnalyzer>,
        completions: mpsc::UnboundedSender<JobOutcome>,
    ) -> Self {
        let settings = ExecutorSettings {
            workers: settings.workers.max(1),
            queue_capacity: settings.queue_capacity.max(1),
            ..settings
        };
        let (tx, rx) = mpsc::channel(settings.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));

        for worker_id in 0..settings.workers {
            tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&rx),
                Arc::clone(&vision),
                Arc::clone(&audio),
                settings.job_timeout,
                completions.clone(),
            ));
        }

        info!(
            "Inference executor started: {} workers, queue {}, timeout {:?}",
            settings.workers, settings.queue_capacity, settings.job_timeout
        );

        Self { jobs: tx, settings }
    }

    pub fn try_submit(&self, job: AnalysisJob) -> Result<(), SubmitError> {
        self.jobs.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::Saturated,
            mpsc::error::TrySendError::Closed(_) => SubmitError::ShutDown,
        })
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.settings.queue_capacity - self.jobs.capacity()
    }

    pub fn settings(&self) -> ExecutorSettings {
        self.settings
    }
}

async fn worker_loop(
    worker_id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<AnalysisJob>>>,
    vision: Arc<dyn VisionAnalyzer>,
    audio: Arc<dyn AudioAnalyzer>,
    timeout: Duration,
    completions: mpsc::UnboundedSender<JobOutcome>,
) {
    loop {
        let job = {
            let mut rx = jobs.lock().await;
            rx.recv().await
        };
        let Some(job) = job else { break };

        let outcome = run_job(job, &vision, &audio, timeout).await;
        if completions.send(outcome).is_err() {
            break;
        }
    }
    debug!("Inference worker {worker_id} stopped");
}

async fn run_job(
    job: AnalysisJob,
    vision: &Arc<dyn VisionAnalyzer>,
    audio: &Arc<dyn AudioAnalyzer>,
    timeout: Duration,
) -> JobOutcome {
    let started = Instant::now();
    let payload = job.record.payload.clone();

    let handle = match job.modality {
        Modality::Video => {
            let vision = Arc::clone(vision);
            tokio::spawn(async move {
                vision
                    .analyze_frame(payload)
                    .await
                    .map(AnalysisPayload::Vision)
            })
        }
        Modality::Audio => {
            let audio = Arc::clone(audio);
            tokio::spawn(async move {
                audio
                    .analyze_chunk(payload)
                    .await
                    .map(AnalysisPayload::Audio)
            })
        }
    };
    let abort = handle.abort_handle();

    let result = match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(Ok(payload))) => Ok(payload),
        Ok(Ok(Err(e))) => Err(AnalysisFailure::Analyzer(e.to_string())),
        Ok(Err(join_err)) if join_err.is_panic() => Err(AnalysisFailure::Panicked),
        Ok(Err(join_err)) => Err(AnalysisFailure::Analyzer(join_err.to_string())),
        Err(_) => {
            abort.abort();
            warn!(
                "{} analysis for session {} timed out after {:?}",
                job.modality, job.session_id, timeout
            );
            Err(AnalysisFailure::TimedOut(timeout))
        }
    };

    JobOutcome {
        session_id: job.session_id,
        modality: job.modality,
        generation: job.generation,
        sequence_id: job.record.sequence_id,
        received_at: job.record.timestamp,
        client_timestamp: job.record.client_timestamp,
        result,
        duration: started.elapsed(),
    }
}
