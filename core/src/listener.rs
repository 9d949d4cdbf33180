use crate::record::DownloadId;

/// Inbound port for the content engine. Events for one id normally arrive
/// as request, begin, data*, then finish or fail, but implementations must
/// accept any order and any duplicates.
pub trait DownloadListener: Send + Sync {
    fn next_download_id(&self) -> DownloadId;
    fn on_request_download(&self, id: DownloadId, url: &str);
    fn on_begin_download(
        &self,
        id: DownloadId,
        url: &str,
        suggested_name: &str,
        expected_bytes: i64,
    );
    fn on_receive_data(&self, id: DownloadId, data: &[u8]);
    fn on_finish_download(&self, id: DownloadId);
    fn on_fail_download(&self, id: DownloadId);
}
