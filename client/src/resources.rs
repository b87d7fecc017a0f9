//! Abstractions over the system resources the embedding application provides.

use std::time::{Duration, SystemTime};

/// A unit of work to run on one of the executors provided by the resources.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Completion callback for a state write; the argument reports whether the
/// write committed.
pub type StorageCallback = Box<dyn FnOnce(bool) + Send + 'static>;

/// System resources needed by the client: a clock, two executors, and a
/// persistence slot. An implementation needs two distinct execution contexts
/// so that work inside the client is scheduled separately from callbacks into
/// the application.
pub trait SystemResources: Send + Sync + 'static {
    /// Returns the current wall-clock time.
    fn current_time(&self) -> SystemTime;

    /// Runs `task` on the internal executor after `delay` has elapsed.
    fn schedule_with_delay(&self, delay: Duration, task: Task);

    /// Runs `task` on the internal executor as soon as possible. Tasks
    /// scheduled this way run in the order they were scheduled.
    fn schedule_immediately(&self, task: Task);

    /// Runs `task` on the listener executor, which must be distinct from the
    /// internal executor.
    fn schedule_on_listener_thread(&self, task: Task);

    /// Returns whether the calling thread is the internal executor.
    fn is_running_on_internal_thread(&self) -> bool;

    /// Persists the client's state blob. The implementation must invoke
    /// `callback` on the internal executor with `true` once the write has
    /// committed, or `false` if it failed. In-memory deployments may report
    /// success immediately.
    fn write_state(&self, state: Vec<u8>, callback: StorageCallback);
}
