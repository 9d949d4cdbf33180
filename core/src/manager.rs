use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::error::CoreResult;
use crate::filename::{
    default_download_dir, derive_filename, ensure_dir, resolve_target, sanitize_filename,
};
use crate::launcher::{Launcher, SystemLauncher};
use crate::listener::DownloadListener;
use crate::notify::{ChangeCallback, ChangeNotifier};
use crate::record::{DownloadId, DownloadStatus};
use crate::snapshot::{self, DownloadDocument};
use crate::store::{ActiveDownload, ActiveTable, RecordStore};

pub const OPEN_FAILED_ERROR: &str = "Failed to open file for writing";
pub const WRITE_FAILED_ERROR: &str = "Failed to write to file";
pub const DOWNLOAD_FAILED_ERROR: &str = "Download failed";
pub const REQUEST_TIMED_OUT_ERROR: &str = "Request timed out";

#[derive(Debug)]
struct ManagerState {
    next_id: DownloadId,
    records: RecordStore,
    active: ActiveTable,
    start_sequence: u64,
    last_started_sequence: u64,
    notifier: ChangeNotifier,
}

impl Default for ManagerState {
    fn default() -> Self {
        Self {
            next_id: 1,
            records: RecordStore::default(),
            active: ActiveTable::default(),
            start_sequence: 0,
            last_started_sequence: 0,
            notifier: ChangeNotifier::default(),
        }
    }
}

impl ManagerState {
    fn request(&mut self, id: DownloadId, url: &str, default_name: &str) -> bool {
        if let Some(existing) = self.records.get(id) {
            if existing.status != DownloadStatus::Requested {
                debug!(id, status = %existing.status, "request for started download ignored");
                return false;
            }
        }
        let record = self.records.get_or_create(id);
        record.url = url.to_string();
        record.status = DownloadStatus::Requested;
        record.error.clear();
        record.finished_at = None;
        record.path = PathBuf::new();
        record.expected_bytes = -1;
        record.received_bytes = 0;
        if record.display_name.is_empty() {
            record.display_name =
                sanitize_filename(&derive_filename(url, "", default_name), default_name);
        }
        record.started_at = SystemTime::now();
        info!(id, url, "download requested");
        true
    }

    fn begin(
        &mut self,
        id: DownloadId,
        url: &str,
        suggested_name: &str,
        expected_bytes: i64,
        dir: &Path,
        config: &ManagerConfig,
    ) -> bool {
        if self.active.contains(id) {
            debug!(id, "duplicate begin ignored");
            return false;
        }
        let record = self.records.get_or_create(id);
        if record.status.is_terminal() {
            debug!(id, status = %record.status, "begin for finished download ignored");
            return false;
        }
        if record.url.is_empty() {
            record.url = url.to_string();
        }
        record.status = DownloadStatus::InProgress;
        record.expected_bytes = if expected_bytes < 0 { -1 } else { expected_bytes };
        record.received_bytes = 0;
        record.started_at = SystemTime::now();
        record.error.clear();
        record.finished_at = None;

        ensure_dir(dir);
        let path = resolve_target(
            dir,
            &record.url,
            suggested_name,
            &config.default_filename,
            config.max_collision_probes,
        );
        if let Some(name) = path.file_name() {
            record.display_name = name.to_string_lossy().to_string();
        }

        match File::create(&path) {
            Ok(file) => {
                self.start_sequence += 1;
                record.sequence = self.start_sequence;
                record.path = path.clone();
                self.last_started_sequence = self.start_sequence;
                info!(id, path = %path.display(), expected_bytes, "download started");
                self.active.insert(ActiveDownload::new(id, path, file));
            }
            Err(err) => {
                warn!(id, path = %path.display(), error = %err, "failed to open download target");
                record.path = PathBuf::new();
                record.terminate(DownloadStatus::Failed, OPEN_FAILED_ERROR);
            }
        }
        true
    }

    fn data(&mut self, id: DownloadId, bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            return false;
        }
        let written = match self.active.get_mut(id) {
            Some(active) => active.write(bytes),
            None => return false,
        };
        if let Err(err) = written {
            warn!(id, error = %err, "failed to write download data");
            self.terminate_transfer(id, DownloadStatus::Failed, WRITE_FAILED_ERROR);
            return true;
        }
        if let Some(record) = self.records.get_mut(id) {
            if record.status == DownloadStatus::Requested {
                record.status = DownloadStatus::InProgress;
            }
            record.received_bytes = record.received_bytes.saturating_add(bytes.len() as i64);
        }
        true
    }

    fn finish(&mut self, id: DownloadId) -> bool {
        let mut changed = false;
        if let Some(record) = self.records.get_mut(id) {
            if record.terminate(DownloadStatus::Completed, "") {
                if record.expected_bytes >= 0 && record.received_bytes < record.expected_bytes {
                    record.received_bytes = record.expected_bytes;
                }
                info!(id, received = record.received_bytes, "download completed");
                changed = true;
            }
        }
        if let Some(active) = self.active.take(id) {
            if let Err(err) = active.close() {
                warn!(id, error = %err, "failed to flush finished download");
            }
            changed = true;
        }
        changed
    }

    /// Shared exit path for engine failures, write errors and user
    /// cancellation: mark the record terminal, drop the handle and remove
    /// the partial file.
    fn terminate_transfer(&mut self, id: DownloadId, status: DownloadStatus, error: &str) -> bool {
        let active = self.active.take(id);
        let had_active = active.is_some();
        let mut partial: Option<PathBuf> = None;

        match self.records.get_mut(id) {
            Some(record) => {
                if !record.terminate(status, error) {
                    if let Some(active) = active {
                        // Terminal record with a live handle: close, keep the file.
                        let _ = active.close();
                    }
                    return had_active;
                }
                if record.has_file() {
                    partial = Some(std::mem::take(&mut record.path));
                }
                info!(id, status = %status, "download stopped");
            }
            None if !had_active => return false,
            None => {}
        }

        if let Some(active) = active {
            partial.get_or_insert_with(|| active.path.clone());
            drop(active);
        }
        if let Some(path) = partial {
            remove_partial(id, &path);
        }
        true
    }

    fn cancel(&mut self, id: DownloadId) -> bool {
        if !self.active.contains(id) {
            return false;
        }
        self.terminate_transfer(id, DownloadStatus::Cancelled, "")
    }

    fn remove(&mut self, id: DownloadId) -> bool {
        match self.records.get(id) {
            Some(record) if record.status.is_terminal() => {}
            _ => return false,
        }
        self.records.remove(id);
        if let Some(active) = self.active.take(id) {
            let _ = active.close();
        }
        debug!(id, "download record removed");
        true
    }

    fn clear_finished(&mut self) -> usize {
        let active = &self.active;
        let removed = self
            .records
            .retain(|record| !(record.status.is_terminal() && !active.contains(record.id)));
        if removed > 0 {
            debug!(removed, "cleared finished downloads");
        }
        removed
    }

    fn prune_stale_requests(&mut self, now: SystemTime, timeout: Duration) -> usize {
        let mut stale = Vec::new();
        for record in self.records.iter_mut() {
            if record.status != DownloadStatus::Requested {
                continue;
            }
            let expired = now
                .duration_since(record.started_at)
                .map(|elapsed| elapsed > timeout)
                .unwrap_or(false);
            if expired {
                stale.push(record.id);
            }
        }
        for id in &stale {
            warn!(id = *id, "download request timed out");
            self.terminate_transfer(*id, DownloadStatus::Failed, REQUEST_TIMED_OUT_ERROR);
        }
        stale.len()
    }

    fn has_active_transfers(&self) -> bool {
        !self.active.is_empty()
            || self
                .records
                .iter_newest_first()
                .any(|record| record.status == DownloadStatus::Requested)
    }
}

fn remove_partial(id: DownloadId, path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(id, path = %path.display(), "removed partial file"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            warn!(id, path = %path.display(), error = %err, "failed to remove partial file")
        }
    }
}

/// Tracks downloads handed over by the content engine and serves the UI.
///
/// All state sits behind one mutex. The change callback is always invoked
/// after that mutex has been released.
pub struct DownloadManager {
    config: ManagerConfig,
    download_dir: PathBuf,
    launcher: Arc<dyn Launcher>,
    state: Mutex<ManagerState>,
}

impl DownloadManager {
    pub fn new(config: ManagerConfig) -> Self {
        let download_dir = config
            .download_dir
            .clone()
            .unwrap_or_else(default_download_dir);
        ensure_dir(&download_dir);
        Self {
            config,
            download_dir,
            launcher: Arc::new(SystemLauncher),
            state: Mutex::new(ManagerState::default()),
        }
    }

    pub fn with_launcher(mut self, launcher: Box<dyn Launcher>) -> Self {
        self.launcher = Arc::from(launcher);
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn set_on_change<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let callback: ChangeCallback = Arc::new(callback);
        self.state().notifier = ChangeNotifier::new(callback);
    }

    pub fn clear_on_change(&self) {
        self.state().notifier = ChangeNotifier::default();
    }

    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("download state lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Runs `f` under the lock. When it reports a change the callback is
    /// copied out, the lock dropped, and only then the callback invoked.
    fn mutate<R>(&self, f: impl FnOnce(&mut ManagerState) -> (R, bool)) -> R {
        let mut state = self.state();
        let (result, changed) = f(&mut state);
        let notifier = changed.then(|| state.notifier.clone());
        drop(state);
        if let Some(notifier) = notifier {
            notifier.fire();
        }
        result
    }

    pub fn allocate_id(&self) -> DownloadId {
        let mut state = self.state();
        let id = state.next_id;
        state.next_id += 1;
        id
    }

    pub fn notify_requested(&self, id: DownloadId, url: &str) {
        let default_name = &self.config.default_filename;
        self.mutate(|state| ((), state.request(id, url, default_name)));
    }

    pub fn notify_begin(
        &self,
        id: DownloadId,
        url: &str,
        suggested_name: &str,
        expected_bytes: i64,
    ) {
        self.mutate(|state| {
            let changed = state.begin(
                id,
                url,
                suggested_name,
                expected_bytes,
                &self.download_dir,
                &self.config,
            );
            ((), changed)
        });
    }

    pub fn notify_data(&self, id: DownloadId, bytes: &[u8]) {
        self.mutate(|state| ((), state.data(id, bytes)));
    }

    pub fn notify_finish(&self, id: DownloadId) {
        self.mutate(|state| ((), state.finish(id)));
    }

    pub fn notify_fail(&self, id: DownloadId) {
        self.mutate(|state| {
            let changed =
                state.terminate_transfer(id, DownloadStatus::Failed, DOWNLOAD_FAILED_ERROR);
            ((), changed)
        });
    }

    /// Stops a transfer that still has an open file and deletes the partial
    /// output. False when nothing is being written for `id`.
    pub fn cancel(&self, id: DownloadId) -> bool {
        self.mutate(|state| {
            let cancelled = state.cancel(id);
            (cancelled, cancelled)
        })
    }

    /// Drops one terminal record. Files of completed downloads stay on disk.
    pub fn remove(&self, id: DownloadId) -> bool {
        self.mutate(|state| {
            let removed = state.remove(id);
            (removed, removed)
        })
    }

    pub fn clear_finished(&self) -> usize {
        self.mutate(|state| {
            let removed = state.clear_finished();
            (removed, removed > 0)
        })
    }

    pub fn prune_stale_requests(&self) -> usize {
        self.prune_stale_requests_at(SystemTime::now())
    }

    pub fn prune_stale_requests_at(&self, now: SystemTime) -> usize {
        let timeout = self.config.stale_request_timeout;
        self.mutate(|state| {
            let pruned = state.prune_stale_requests(now, timeout);
            (pruned, pruned > 0)
        })
    }

    /// Newest first, fully built before the lock is released.
    pub fn snapshot(&self) -> Vec<DownloadDocument> {
        let state = self.state();
        state
            .records
            .iter_newest_first()
            .map(DownloadDocument::from)
            .collect()
    }

    pub fn snapshot_json(&self) -> CoreResult<String> {
        snapshot::to_json(&self.snapshot())
    }

    /// The UI poll: fail stale requests, then return a fresh snapshot.
    pub fn poll(&self) -> Vec<DownloadDocument> {
        self.prune_stale_requests();
        self.snapshot()
    }

    pub fn get(&self, id: DownloadId) -> Option<DownloadDocument> {
        self.state().records.get(id).map(DownloadDocument::from)
    }

    pub fn open(&self, id: DownloadId) -> bool {
        let path = {
            let state = self.state();
            match state.records.get(id) {
                Some(record) if record.can_open() => record.path.clone(),
                _ => return false,
            }
        };
        match self.launcher.open(&path) {
            Ok(()) => true,
            Err(err) => {
                warn!(id, path = %path.display(), error = %err, "failed to open download");
                false
            }
        }
    }

    pub fn reveal(&self, id: DownloadId) -> bool {
        let path = {
            let state = self.state();
            match state.records.get(id) {
                Some(record) if record.can_reveal() => record.path.clone(),
                _ => return false,
            }
        };
        match self.launcher.reveal(&path) {
            Ok(()) => true,
            Err(err) => {
                warn!(id, path = %path.display(), error = %err, "failed to reveal download");
                false
            }
        }
    }

    /// True while any transfer is requested or still writing.
    pub fn has_active_transfers(&self) -> bool {
        self.state().has_active_transfers()
    }

    pub fn last_started_sequence(&self) -> u64 {
        self.state().last_started_sequence
    }
}

impl DownloadListener for DownloadManager {
    fn next_download_id(&self) -> DownloadId {
        self.allocate_id()
    }

    fn on_request_download(&self, id: DownloadId, url: &str) {
        self.notify_requested(id, url);
    }

    fn on_begin_download(
        &self,
        id: DownloadId,
        url: &str,
        suggested_name: &str,
        expected_bytes: i64,
    ) {
        self.notify_begin(id, url, suggested_name, expected_bytes);
    }

    fn on_receive_data(&self, id: DownloadId, data: &[u8]) {
        self.notify_data(id, data);
    }

    fn on_finish_download(&self, id: DownloadId) {
        self.notify_finish(id);
    }

    fn on_fail_download(&self, id: DownloadId) {
        self.notify_fail(id);
    }
}

impl Drop for DownloadManager {
    // Shutdown closes handles but keeps partial files, unlike cancel.
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let mut interrupted = 0usize;
        for active in state.active.drain() {
            interrupted += 1;
            let id = active.id;
            if let Err(err) = active.close() {
                warn!(id, error = %err, "failed to flush download on shutdown");
            }
        }
        if interrupted > 0 {
            info!(interrupted, "download manager shut down with open transfers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_finished_skips_records_with_live_handles() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ManagerConfig::default();
        let mut state = ManagerState::default();

        assert!(state.begin(1, "https://x/a.bin", "a.bin", -1, dir.path(), &config));
        state
            .records
            .get_mut(1)
            .expect("record")
            .status = DownloadStatus::Completed;

        assert_eq!(state.clear_finished(), 0);
        assert!(state.records.get(1).is_some());
        assert!(state.has_active_transfers());

        assert!(state.finish(1));
        assert_eq!(state.clear_finished(), 1);
        assert!(state.records.is_empty());
        assert!(dir.path().join("a.bin").exists());
    }

    #[test]
    fn fail_on_terminal_record_keeps_file_but_closes_handle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ManagerConfig::default();
        let mut state = ManagerState::default();

        assert!(state.begin(1, "https://x/a.bin", "a.bin", -1, dir.path(), &config));
        state
            .records
            .get_mut(1)
            .expect("record")
            .status = DownloadStatus::Completed;

        assert!(state.terminate_transfer(1, DownloadStatus::Failed, DOWNLOAD_FAILED_ERROR));
        assert!(state.active.is_empty());
        assert_eq!(
            state.records.get(1).expect("record").status,
            DownloadStatus::Completed
        );
        assert!(dir.path().join("a.bin").exists());
    }

    #[test]
    fn write_error_fails_transfer_and_removes_partial() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ManagerConfig::default();
        let mut state = ManagerState::default();

        assert!(state.begin(1, "https://x/a.bin", "a.bin", 10, dir.path(), &config));
        let path = dir.path().join("a.bin");
        let read_only = File::open(&path).expect("open read-only");
        state.active.insert(ActiveDownload::new(1, path.clone(), read_only));

        assert!(state.data(1, b"bytes"));
        let record = state.records.get(1).expect("record");
        assert_eq!(record.status, DownloadStatus::Failed);
        assert_eq!(record.error, WRITE_FAILED_ERROR);
        assert_eq!(record.received_bytes, 0);
        assert!(record.finished_at.is_some());
        assert!(state.active.is_empty());
        assert!(!path.exists());

        assert!(!state.data(1, b"late"));
    }
}
