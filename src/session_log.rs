//! Append-only session log of links that could not be downloaded.
//!
//! One line per entry. Unreachable links are written bare so the file can be
//! fed back to the CLI; maintenance sightings carry a timestamp, the host, and
//! its reported status.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Default session log location.
pub const DEFAULT_SESSION_LOG: &str = "session.log";

/// Sink for session log lines.
#[async_trait]
pub trait SessionLog: Send + Sync {
    /// Appends one line (without trailing newline).
    async fn append(&self, line: &str) -> std::io::Result<()>;
}

/// Formats a maintenance entry: `<http-date> MAINTENANCE <host> "<status>" <link>`.
#[must_use]
pub fn maintenance_line(subdomain: &str, status: &str, download_link: &str) -> String {
    format!(
        "{} MAINTENANCE {subdomain} \"{status}\" {download_link}",
        httpdate::fmt_http_date(SystemTime::now())
    )
}

/// Session log backed by a file on disk.
#[derive(Debug)]
pub struct FileSessionLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSessionLog {
    /// Opens a session log at `path`, appending to existing content.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Truncates (or creates) the file at `path` and returns a log over it.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error if the file cannot be created.
    pub async fn fresh(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let log = Self::new(path);
        if let Some(parent) = log.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::File::create(&log.path).await?;
        Ok(log)
    }

    /// Location of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SessionLog for FileSessionLog {
    async fn append(&self, line: &str) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        debug!(path = %self.path.display(), "session log entry written");
        Ok(())
    }
}
