//! Bounded FIFO of responses waiting for the speaker.

use crate::config::QueueConfig;
use std::collections::VecDeque;
use std::time::Instant;

/// A response waiting to be spoken.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// Text for the speech-output port.
    pub text: String,
    /// When the entry was queued.
    pub enqueued_at: Instant,
}

/// What [`SpeechOutputQueue::enqueue`] did with the incoming text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueAction {
    /// Appended behind the existing entries.
    Enqueued,
    /// The queue was full; this many stale entries were discarded first.
    ClearedBacklog(usize),
    /// Blank text, nothing to say.
    DroppedEmpty,
}

/// Pending spoken responses, strictly in enqueue order.
///
/// A full queue is cleared rather than trimmed: by the time a backlog builds
/// up, its answers describe a scene the user has already moved on from.
#[derive(Debug)]
pub struct SpeechOutputQueue {
    max_depth: usize,
    pending: VecDeque<QueueEntry>,
}

impl SpeechOutputQueue {
    /// Create a queue using the configured depth.
    pub fn new(config: &QueueConfig) -> Self {
        Self::with_max_depth(config.max_depth)
    }

    /// Create a queue holding at most `max_depth` entries (minimum 1).
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
            pending: VecDeque::new(),
        }
    }

    /// Maximum number of entries held at once.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop everything; returns how many entries were discarded.
    pub fn clear(&mut self) -> usize {
        let cleared = self.pending.len();
        self.pending.clear();
        cleared
    }

    /// Append `text`, clearing a full queue first.
    pub fn enqueue(&mut self, text: impl Into<String>) -> EnqueueAction {
        let text = text.into();
        if text.trim().is_empty() {
            return EnqueueAction::DroppedEmpty;
        }

        let action = if self.pending.len() >= self.max_depth {
            EnqueueAction::ClearedBacklog(self.clear())
        } else {
            EnqueueAction::Enqueued
        };
        self.pending.push_back(QueueEntry {
            text,
            enqueued_at: Instant::now(),
        });
        action
    }

    /// Take the oldest pending entry.
    pub fn dequeue_next(&mut self) -> Option<QueueEntry> {
        self.pending.pop_front()
    }
}
