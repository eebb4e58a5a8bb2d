//! Per-session ingestion buffers.
//!
//! Bounded FIFO queues with a drop-oldest policy: a full buffer evicts its
//! oldest unconsumed record and accepts the new one. Freshness beats
//! completeness for live feedback. Records handed to an analysis job have
//! already left the buffer, so eviction can never touch in-flight work.

use std::collections::VecDeque;

use crate::models::frame::{FrameRecord, Modality};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSettings {
    pub video_capacity: usize,
    pub audio_capacity: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            video_capacity: 30,
            audio_capacity: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushOutcome {
    pub accepted: bool,
    pub evicted_sequence: Option<u64>,
}

#[derive(Debug)]
struct BoundedQueue {
    items: VecDeque<FrameRecord>,
    capacity: usize,
}

impl BoundedQueue {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, record: FrameRecord) -> Option<FrameRecord> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(record);
        evicted
    }
}

/// Video and audio queues for one session.
#[derive(Debug)]
pub struct StreamIngestionBuffer {
    video: BoundedQueue,
    audio: BoundedQueue,
    dropped: u64,
}

impl StreamIngestionBuffer {
    pub fn new(settings: BufferSettings) -> Self {
        Self {
            video: BoundedQueue::new(settings.video_capacity),
            audio: BoundedQueue::new(settings.audio_capacity),
            dropped: 0,
        }
    }

    fn queue(&self, modality: Modality) -> &BoundedQueue {
        match modality {
            Modality::Video => &self.video,
            Modality::Audio => &self.audio,
        }
    }

    fn queue_mut(&mut self, modality: Modality) -> &mut BoundedQueue {
        match modality {
            Modality::Video => &mut self.video,
            Modality::Audio => &mut self.audio,
        }
    }

    pub fn push_frame(&mut self, record: FrameRecord) -> PushOutcome {
        let evicted = self.queue_mut(record.modality).push(record);
        if evicted.is_some() {
            self.dropped += 1;
        }
        PushOutcome {
            accepted: true,
            evicted_sequence: evicted.map(|r| r.sequence_id),
        }
    }

    /// Takes the newest record. Older records are stale once a newer one is
    /// analyzed, so they are discarded and counted as dropped.
    pub fn pop_latest(&mut self, modality: Modality) -> Option<FrameRecord> {
        let queue = self.queue_mut(modality);
        let latest = queue.items.pop_back()?;
        let stale = queue.items.len() as u64;
        queue.items.clear();
        self.dropped += stale;
        Some(latest)
    }

    pub fn len(&self, modality: Modality) -> usize {
        self.queue(modality).items.len()
    }

    pub fn capacity(&self, modality: Modality) -> usize {
        self.queue(modality).capacity
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.video.items.clear();
        self.audio.items.clear();
    }
}
