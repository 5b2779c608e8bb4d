//! Run-wide state shared by every file download.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use super::transport::Transport;
use crate::config::DownloadConfig;
use crate::progress::ProgressSink;
use crate::session_log::SessionLog;
use crate::status::ServerStatusCache;

/// Cooperative cancellation flag that can also be awaited.
#[derive(Debug, Default)]
pub struct InterruptFlag {
    flag: AtomicBool,
    notify: Notify,
}

impl InterruptFlag {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every waiter.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// True once [`trigger`](Self::trigger) was called.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Raw flag for hot loops that only poll.
    #[must_use]
    pub fn as_atomic(&self) -> &AtomicBool {
        &self.flag
    }

    /// Resolves once the flag is set.
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        if self.is_set() {
            return;
        }
        notified.await;
    }
}

/// Collaborators and settings for one run.
#[derive(Clone)]
pub struct DownloadContext {
    /// HTTP capability.
    pub transport: Arc<dyn Transport>,
    /// Shared host status map.
    pub status: Arc<ServerStatusCache>,
    /// Where unreachable links and maintenance sightings are recorded.
    pub session_log: Arc<dyn SessionLog>,
    /// Progress and event reporting.
    pub sink: Arc<dyn ProgressSink>,
    /// Run settings.
    pub config: DownloadConfig,
    /// Destination directory for finished files.
    pub download_dir: PathBuf,
    /// Set when the user asks the run to stop.
    pub interrupt: Arc<InterruptFlag>,
}

impl std::fmt::Debug for DownloadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadContext")
            .field("config", &self.config)
            .field("download_dir", &self.download_dir)
            .field("interrupted", &self.interrupt.is_set())
            .finish_non_exhaustive()
    }
}
