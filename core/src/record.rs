use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier handed out by [`crate::DownloadManager::allocate_id`].
pub type DownloadId = u64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadStatus {
    Requested,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Requested => "requested",
            DownloadStatus::InProgress => "in-progress",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Failed | DownloadStatus::Cancelled
        )
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata and status for one transfer. Owned by [`crate::store::RecordStore`].
#[derive(Debug, Clone)]
pub struct Record {
    pub id: DownloadId,
    pub url: String,
    pub display_name: String,
    /// Empty unless a file was created and has not been removed again.
    pub path: PathBuf,
    /// `-1` when the engine did not announce a length.
    pub expected_bytes: i64,
    pub received_bytes: i64,
    pub status: DownloadStatus,
    pub started_at: SystemTime,
    pub finished_at: Option<SystemTime>,
    pub error: String,
    /// Assigned on a successful begin; `0` until then.
    pub sequence: u64,
}

impl Record {
    pub fn new(id: DownloadId) -> Self {
        Self {
            id,
            url: String::new(),
            display_name: String::new(),
            path: PathBuf::new(),
            expected_bytes: -1,
            received_bytes: 0,
            status: DownloadStatus::Requested,
            started_at: SystemTime::now(),
            finished_at: None,
            error: String::new(),
            sequence: 0,
        }
    }

    pub fn has_file(&self) -> bool {
        !self.path.as_os_str().is_empty()
    }

    pub fn can_open(&self) -> bool {
        self.status == DownloadStatus::Completed && self.has_file()
    }

    pub fn can_reveal(&self) -> bool {
        self.has_file()
    }

    /// Moves the record into a terminal status. Returns false when it already
    /// was terminal, in which case nothing is touched.
    pub fn terminate(&mut self, status: DownloadStatus, error: &str) -> bool {
        debug_assert!(status.is_terminal());
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.error = error.to_string();
        self.finished_at = Some(SystemTime::now());
        true
    }
}

pub fn epoch_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
