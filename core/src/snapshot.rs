use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::record::{epoch_millis, DownloadId, DownloadStatus, Record};

/// One entry of the UI-facing download list. Field names are part of the
/// wire contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadDocument {
    pub id: DownloadId,
    pub url: String,
    pub filename: String,
    pub path: String,
    pub status: DownloadStatus,
    pub received: i64,
    pub total: i64,
    pub can_open: bool,
    pub can_reveal: bool,
    pub started_at: i64,
    pub finished_at: i64,
    pub error: String,
}

impl From<&Record> for DownloadDocument {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id,
            url: record.url.clone(),
            filename: record.display_name.clone(),
            path: record.path.to_string_lossy().to_string(),
            status: record.status,
            received: record.received_bytes,
            total: record.expected_bytes,
            can_open: record.can_open(),
            can_reveal: record.can_reveal(),
            started_at: epoch_millis(record.started_at),
            finished_at: record.finished_at.map(epoch_millis).unwrap_or(0),
            error: record.error.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    items: &'a [DownloadDocument],
}

/// Renders `{"items":[...]}`.
pub fn to_json(items: &[DownloadDocument]) -> CoreResult<String> {
    serde_json::to_string(&Envelope { items }).map_err(|err| CoreError::Serialize(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn document_uses_wire_field_names() {
        let mut record = Record::new(4);
        record.url = "https://x/\"q\".bin".to_string();
        record.display_name = "q.bin".to_string();
        record.path = PathBuf::from("/tmp/q.bin");
        record.status = DownloadStatus::Completed;
        record.expected_bytes = 10;
        record.received_bytes = 10;
        record.started_at = UNIX_EPOCH + Duration::from_millis(1_500);
        record.finished_at = Some(UNIX_EPOCH + Duration::from_millis(2_750));

        let value = serde_json::to_value(DownloadDocument::from(&record)).expect("serialize");
        assert_eq!(
            value,
            json!({
                "id": 4,
                "url": "https://x/\"q\".bin",
                "filename": "q.bin",
                "path": "/tmp/q.bin",
                "status": "completed",
                "received": 10,
                "total": 10,
                "canOpen": true,
                "canReveal": true,
                "startedAt": 1500,
                "finishedAt": 2750,
                "error": ""
            })
        );
    }

    #[test]
    fn unset_finish_and_unknown_total() {
        let record = Record::new(1);
        let doc = DownloadDocument::from(&record);
        assert_eq!(doc.finished_at, 0);
        assert_eq!(doc.total, -1);
        assert!(!doc.can_open);
        assert!(!doc.can_reveal);
        assert_eq!(doc.status, DownloadStatus::Requested);
    }

    #[test]
    fn envelope_wraps_items() {
        let docs = vec![DownloadDocument::from(&Record::new(2))];
        let text = to_json(&docs).expect("to_json");
        let value: serde_json::Value = serde_json::from_str(&text).expect("parse");
        assert_eq!(value["items"][0]["id"], 2);
        assert_eq!(value["items"][0]["status"], "requested");
        assert_eq!(to_json(&[]).expect("to_json"), "{\"items\":[]}");
    }
}
