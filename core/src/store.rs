use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use crate::error::CoreResult;
use crate::record::{DownloadId, Record};

/// System of record for every transfer the manager has seen, keyed by id so
/// iteration order follows allocation order.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: BTreeMap<DownloadId, Record>,
}

impl RecordStore {
    pub fn get_or_create(&mut self, id: DownloadId) -> &mut Record {
        self.records.entry(id).or_insert_with(|| Record::new(id))
    }

    pub fn get(&self, id: DownloadId) -> Option<&Record> {
        self.records.get(&id)
    }

    pub fn get_mut(&mut self, id: DownloadId) -> Option<&mut Record> {
        self.records.get_mut(&id)
    }

    pub fn remove(&mut self, id: DownloadId) -> Option<Record> {
        self.records.remove(&id)
    }

    /// Newest id first.
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &Record> {
        self.records.values().rev()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Record> {
        self.records.values_mut()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&Record) -> bool) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| keep(record));
        before - self.records.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// An open output file for a transfer that may still receive bytes.
#[derive(Debug)]
pub struct ActiveDownload {
    pub id: DownloadId,
    pub path: PathBuf,
    file: File,
}

impl ActiveDownload {
    pub fn new(id: DownloadId, path: PathBuf, file: File) -> Self {
        Self { id, path, file }
    }

    pub fn write(&mut self, bytes: &[u8]) -> CoreResult<()> {
        self.file.write_all(bytes)?;
        Ok(())
    }

    /// Flushes and drops the handle. The file stays on disk.
    pub fn close(mut self) -> CoreResult<()> {
        self.file.flush()?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ActiveTable {
    entries: HashMap<DownloadId, ActiveDownload>,
}

impl ActiveTable {
    pub fn insert(&mut self, active: ActiveDownload) -> Option<ActiveDownload> {
        self.entries.insert(active.id, active)
    }

    pub fn get_mut(&mut self, id: DownloadId) -> Option<&mut ActiveDownload> {
        self.entries.get_mut(&id)
    }

    pub fn take(&mut self, id: DownloadId) -> Option<ActiveDownload> {
        self.entries.remove(&id)
    }

    pub fn contains(&self, id: DownloadId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn drain(&mut self) -> impl Iterator<Item = ActiveDownload> + '_ {
        self.entries.drain().map(|(_, active)| active)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DownloadStatus;

    #[test]
    fn newest_first_ordering() {
        let mut store = RecordStore::default();
        store.get_or_create(2);
        store.get_or_create(10);
        store.get_or_create(5);
        let ids: Vec<DownloadId> = store.iter_newest_first().map(|r| r.id).collect();
        assert_eq!(ids, vec![10, 5, 2]);
    }

    #[test]
    fn get_or_create_keeps_existing_record() {
        let mut store = RecordStore::default();
        store.get_or_create(3).url = "https://x/y".to_string();
        assert_eq!(store.get_or_create(3).url, "https://x/y");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn retain_reports_removed_count() {
        let mut store = RecordStore::default();
        store.get_or_create(1).status = DownloadStatus::Completed;
        store.get_or_create(2);
        assert_eq!(store.retain(|r| !r.status.is_terminal()), 1);
        assert!(store.get(1).is_none());
        assert!(store.get(2).is_some());
    }
}
