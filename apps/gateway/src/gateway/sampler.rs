//! Debug sampling: writes every Nth video frame of a session to disk.
//!
//! Off unless `DEBUG_SAMPLE_DIR` is set. Writes happen on a detached task so
//! ingestion never waits on the filesystem; failures are logged and ignored.

use std::path::PathBuf;

use bytes::Bytes;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct DebugSampler {
    dir: PathBuf,
    every: u64,
}

impl DebugSampler {
    pub fn new(dir: impl Into<PathBuf>, every: u64) -> Self {
        Self {
            dir: dir.into(),
            every: every.max(1),
        }
    }

    pub fn should_sample(&self, sequence_id: u64) -> bool {
        sequence_id % self.every == 0
    }

    pub fn path_for(&self, session_id: &str, sequence_id: u64) -> PathBuf {
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(safe).join(format!("{sequence_id:08}.bin"))
    }

    /// Spawns the write if `sequence_id` is due. Returns whether it was.
    pub fn maybe_sample(&self, session_id: &str, sequence_id: u64, payload: &Bytes) -> bool {
        if !self.should_sample(sequence_id) {
            return false;
        }
        let path = self.path_for(session_id, sequence_id);
        let payload = payload.clone();
        tokio::spawn(async move {
            if let Err(e) = write_sample(&path, &payload).await {
                warn!("Debug sample write to {} failed: {e}", path.display());
            } else {
                debug!("Wrote debug sample {}", path.display());
            }
        });
        true
    }
}

async fn write_sample(path: &std::path::Path, payload: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, payload).await
}
