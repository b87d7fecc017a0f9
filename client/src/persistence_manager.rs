//! Serializes access to the application's persistence slot.

use std::collections::VecDeque;

/// Queues state writes and hands them out one at a time, so at most one write
/// is ever outstanding against the storage layer.
///
/// Each queued payload carries a caller-supplied tag identifying what the
/// write was for; the orchestrator dispatches the completion on it.
pub struct PersistenceManager<T> {
    pending_writes: VecDeque<(Vec<u8>, T)>,
    write_in_progress: bool,
}

impl<T> PersistenceManager<T> {
    pub fn new() -> Self {
        Self {
            pending_writes: VecDeque::new(),
            write_in_progress: false,
        }
    }

    /// Queues `payload` to be written. The write is issued by a later call to
    /// [`PersistenceManager::next_write`], typically from the periodic check.
    pub fn queue_write(&mut self, payload: Vec<u8>, tag: T) {
        self.pending_writes.push_back((payload, tag));
    }

    /// Takes the oldest queued write if no write is currently in flight,
    /// marking one in flight. The caller must follow up with
    /// [`PersistenceManager::write_completed`] when the storage layer reports
    /// back.
    pub fn next_write(&mut self) -> Option<(Vec<u8>, T)> {
        if self.write_in_progress {
            return None;
        }
        let record = self.pending_writes.pop_front()?;
        self.write_in_progress = true;
        Some(record)
    }

    /// Records that the in-flight write finished (successfully or not).
    pub fn write_completed(&mut self) {
        self.write_in_progress = false;
    }
}

impl<T> Default for PersistenceManager<T> {
    fn default() -> Self {
        Self::new()
    }
}
