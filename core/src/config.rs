use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_FILENAME: &str = "download";
pub const DOWNLOADS_FOLDER_NAME: &str = "downloads";

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Explicit download directory. `None` falls back to
    /// [`crate::filename::default_download_dir`].
    pub download_dir: Option<PathBuf>,
    /// How long a record may sit in `Requested` before the pruner fails it.
    pub stale_request_timeout: Duration,
    pub max_collision_probes: u32,
    pub default_filename: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            download_dir: None,
            stale_request_timeout: Duration::from_secs(30),
            max_collision_probes: 999,
            default_filename: DEFAULT_FILENAME.to_string(),
        }
    }
}

impl ManagerConfig {
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    pub fn with_stale_request_timeout(mut self, timeout: Duration) -> Self {
        self.stale_request_timeout = timeout;
        self
    }
}
