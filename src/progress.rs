//! Progress reporting seam between the download core and its front end.
//!
//! The core only talks to a [`ProgressSink`]. The binary plugs in an
//! `indicatif` view; headless runs and the library default use
//! [`TracingProgress`], which turns every event into a `tracing` record.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{info, trace};

/// Opaque handle of a per-file progress task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Progress payload of a task update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TaskProgress {
    /// Absolute completion percentage in `0..=100`.
    Completed(f64),
    /// Relative advance in percentage points.
    Advance(f64),
}

/// A single task update; either half may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TaskUpdate {
    /// New progress value, if any.
    pub progress: Option<TaskProgress>,
    /// New visibility, if it changes.
    pub visible: Option<bool>,
}

impl TaskUpdate {
    /// Sets the absolute completion percentage.
    #[must_use]
    pub fn completed(percentage: f64) -> Self {
        Self {
            progress: Some(TaskProgress::Completed(percentage)),
            visible: None,
        }
    }

    /// Moves the task forward by `delta` percentage points.
    #[must_use]
    pub fn advanced(delta: f64) -> Self {
        Self {
            progress: Some(TaskProgress::Advance(delta)),
            visible: None,
        }
    }

    /// Marks the task finished and removes it from view.
    #[must_use]
    pub fn finished_hidden() -> Self {
        Self {
            progress: Some(TaskProgress::Completed(100.0)),
            visible: Some(false),
        }
    }

    /// Removes the task from view without touching its progress.
    #[must_use]
    pub fn hidden() -> Self {
        Self {
            progress: None,
            visible: Some(false),
        }
    }

    /// Absolute percentage carried by this update, if any.
    #[must_use]
    pub fn completed_percentage(&self) -> Option<f64> {
        match self.progress {
            Some(TaskProgress::Completed(value)) => Some(value),
            _ => None,
        }
    }
}

/// Receiver of per-file progress and human-readable events.
///
/// Implementations are shared across concurrent downloads and must be cheap
/// to call from the streaming hot path.
pub trait ProgressSink: Send + Sync {
    /// Registers a new task labelled `label` and returns its handle.
    fn add_task(&self, label: &str) -> TaskId;

    /// Applies an update to an existing task.
    fn update_task(&self, task: TaskId, update: TaskUpdate);

    /// Emits a human-readable event.
    fn log(&self, event: &str, details: &str);
}

/// Headless sink that forwards everything to `tracing`.
#[derive(Debug, Default)]
pub struct TracingProgress {
    next_id: AtomicU64,
}

impl TracingProgress {
    /// Creates a new headless sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for TracingProgress {
    fn add_task(&self, label: &str) -> TaskId {
        let task = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        trace!(%task, label, "task added");
        task
    }

    fn update_task(&self, task: TaskId, update: TaskUpdate) {
        trace!(%task, ?update, "task updated");
    }

    fn log(&self, event: &str, details: &str) {
        info!(event, "{details}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_progress_hands_out_distinct_ids() {
        let sink = TracingProgress::new();
        let first = sink.add_task("a.mp4");
        let second = sink.add_task("b.mp4");
        assert_ne!(first, second);
    }

    #[test]
    fn test_finished_hidden_update() {
        let update = TaskUpdate::finished_hidden();
        assert_eq!(update.completed_percentage(), Some(100.0));
        assert_eq!(update.visible, Some(false));
    }

    #[test]
    fn test_advanced_update_is_relative() {
        let update = TaskUpdate::advanced(12.5);
        assert_eq!(update.progress, Some(TaskProgress::Advance(12.5)));
        assert_eq!(update.completed_percentage(), None);
        assert_eq!(update.visible, None);
    }

    #[test]
    fn test_hidden_update_carries_no_progress() {
        let update = TaskUpdate::hidden();
        assert_eq!(update.completed_percentage(), None);
        assert_eq!(update.visible, Some(false));
    }
}
