//! In-memory collaborators shared by unit tests.

pub(crate) mod fake_transport;
pub(crate) mod socket_guard;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::config::DownloadConfig;
use crate::download::{DownloadContext, InterruptFlag};
use crate::progress::{ProgressSink, TaskId, TaskUpdate};
use crate::session_log::SessionLog;
use crate::status::{ServerStatusCache, StatusSource};
use fake_transport::FakeTransport;

/// Fully wired run context over in-memory collaborators and a temp directory.
pub(crate) struct TestRun {
    pub ctx: Arc<DownloadContext>,
    pub sink: Arc<RecordingSink>,
    pub session_log: Arc<MemorySessionLog>,
    pub transport: Arc<FakeTransport>,
    pub source: Arc<StaticStatusSource>,
    pub dir: TempDir,
}

impl TestRun {
    #[allow(clippy::unwrap_used)]
    pub(crate) fn new(
        transport: FakeTransport,
        statuses: &[(&str, &str)],
        config: DownloadConfig,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(transport);
        let source = Arc::new(StaticStatusSource::new(statuses));
        let sink = Arc::new(RecordingSink::new());
        let session_log = Arc::new(MemorySessionLog::new());
        let ctx = Arc::new(DownloadContext {
            transport: transport.clone(),
            status: Arc::new(ServerStatusCache::new(source.clone())),
            session_log: session_log.clone(),
            sink: sink.clone(),
            config,
            download_dir: dir.path().to_path_buf(),
            interrupt: Arc::new(InterruptFlag::new()),
        });
        Self {
            ctx,
            sink,
            session_log,
            transport,
            source,
            dir,
        }
    }
}

/// Sink that records every update and event for later assertions.
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    next_id: AtomicU64,
    updates: Mutex<Vec<(TaskId, TaskUpdate)>>,
    events: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Absolute percentages reported for `task`, in order.
    pub(crate) fn completed_history(&self, task: TaskId) -> Vec<f64> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(id, _)| *id == task)
            .filter_map(|(_, update)| update.completed_percentage())
            .collect()
    }

    /// Last visibility set for `task`.
    pub(crate) fn visibility(&self, task: TaskId) -> Option<bool> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .filter(|(id, _)| *id == task)
            .find_map(|(_, update)| update.visible)
    }

    pub(crate) fn events(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn event_names(&self) -> Vec<String> {
        self.events().into_iter().map(|(event, _)| event).collect()
    }

    pub(crate) fn count_event(&self, name: &str) -> usize {
        self.events()
            .iter()
            .filter(|(event, _)| event == name)
            .count()
    }
}

impl ProgressSink for RecordingSink {
    fn add_task(&self, _label: &str) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn update_task(&self, task: TaskId, update: TaskUpdate) {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((task, update));
    }

    fn log(&self, event: &str, details: &str) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event.to_string(), details.to_string()));
    }
}

/// Session log kept in memory.
#[derive(Debug, Default)]
pub(crate) struct MemorySessionLog {
    lines: Mutex<Vec<String>>,
}

impl MemorySessionLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SessionLog for MemorySessionLog {
    async fn append(&self, line: &str) -> std::io::Result<()> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
        Ok(())
    }
}

/// Status page stand-in returning a fixed map and counting fetches.
#[derive(Debug, Default)]
pub(crate) struct StaticStatusSource {
    statuses: Mutex<HashMap<String, String>>,
    fetches: AtomicUsize,
}

impl StaticStatusSource {
    pub(crate) fn new(entries: &[(&str, &str)]) -> Self {
        let source = Self::default();
        source.set(entries);
        source
    }

    pub(crate) fn set(&self, entries: &[(&str, &str)]) {
        *self.statuses.lock().unwrap_or_else(PoisonError::into_inner) = entries
            .iter()
            .map(|(name, status)| ((*name).to_string(), (*status).to_string()))
            .collect();
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusSource for StaticStatusSource {
    async fn fetch_all(&self) -> HashMap<String, String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
