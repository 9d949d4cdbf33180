use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::path::PathBuf;
use std::ptr;
use std::time::Duration;

use dlm_core::{DownloadManager, ManagerConfig};
use tracing::warn;

fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().to_string())
}

pub struct ManagerHandle {
    manager: DownloadManager,
}

/// C change callback. `user_data` is passed back untouched.
pub type ChangeFn = extern "C" fn(user_data: *mut c_void);

struct UserData(*mut c_void);

impl UserData {
    fn get(&self) -> *mut c_void {
        self.0
    }
}

// The embedder owns `user_data` and promises it may be used from any thread.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

fn handle<'a>(ptr: *mut ManagerHandle) -> Option<&'a ManagerHandle> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { &*ptr })
    }
}

/// `download_dir` may be null to use the default directory.
#[no_mangle]
pub extern "C" fn dlm_manager_new(download_dir: *const c_char) -> *mut ManagerHandle {
    dlm_manager_new_with_options(download_dir, 0)
}

/// Like [`dlm_manager_new`]; a `stale_timeout_ms` of 0 keeps the default
/// request timeout.
#[no_mangle]
pub extern "C" fn dlm_manager_new_with_options(
    download_dir: *const c_char,
    stale_timeout_ms: u64,
) -> *mut ManagerHandle {
    let mut config = ManagerConfig::default();
    if let Some(dir) = cstr_to_string(download_dir) {
        config.download_dir = Some(PathBuf::from(dir));
    }
    if stale_timeout_ms > 0 {
        config = config.with_stale_request_timeout(Duration::from_millis(stale_timeout_ms));
    }
    let handle = ManagerHandle {
        manager: DownloadManager::new(config),
    };
    Box::into_raw(Box::new(handle))
}

#[no_mangle]
pub extern "C" fn dlm_manager_free(ptr: *mut ManagerHandle) {
    if ptr.is_null() {
        return;
    }
    unsafe {
        drop(Box::from_raw(ptr));
    }
}

#[no_mangle]
pub extern "C" fn dlm_manager_set_on_change(
    ptr: *mut ManagerHandle,
    callback: Option<ChangeFn>,
    user_data: *mut c_void,
) {
    let Some(handle) = handle(ptr) else {
        return;
    };
    match callback {
        Some(callback) => {
            let user_data = UserData(user_data);
            handle.manager.set_on_change(move || callback(user_data.get()));
        }
        None => handle.manager.clear_on_change(),
    }
}

#[no_mangle]
pub extern "C" fn dlm_manager_allocate_id(ptr: *mut ManagerHandle) -> u64 {
    handle(ptr).map(|h| h.manager.allocate_id()).unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn dlm_manager_notify_requested(
    ptr: *mut ManagerHandle,
    id: u64,
    url: *const c_char,
) {
    let Some(handle) = handle(ptr) else {
        return;
    };
    let url = cstr_to_string(url).unwrap_or_default();
    handle.manager.notify_requested(id, &url);
}

#[no_mangle]
pub extern "C" fn dlm_manager_notify_begin(
    ptr: *mut ManagerHandle,
    id: u64,
    url: *const c_char,
    suggested_name: *const c_char,
    expected_bytes: i64,
) {
    let Some(handle) = handle(ptr) else {
        return;
    };
    let url = cstr_to_string(url).unwrap_or_default();
    let suggested_name = cstr_to_string(suggested_name).unwrap_or_default();
    handle
        .manager
        .notify_begin(id, &url, &suggested_name, expected_bytes);
}

#[no_mangle]
pub extern "C" fn dlm_manager_notify_data(
    ptr: *mut ManagerHandle,
    id: u64,
    data: *const u8,
    len: libc::size_t,
) {
    let Some(handle) = handle(ptr) else {
        return;
    };
    if data.is_null() || len == 0 {
        return;
    }
    let bytes = unsafe { std::slice::from_raw_parts(data, len) };
    handle.manager.notify_data(id, bytes);
}

#[no_mangle]
pub extern "C" fn dlm_manager_notify_finish(ptr: *mut ManagerHandle, id: u64) {
    if let Some(handle) = handle(ptr) {
        handle.manager.notify_finish(id);
    }
}

#[no_mangle]
pub extern "C" fn dlm_manager_notify_fail(ptr: *mut ManagerHandle, id: u64) {
    if let Some(handle) = handle(ptr) {
        handle.manager.notify_fail(id);
    }
}

/// Returns `{"items":[...]}` after pruning stale requests. Free with
/// [`dlm_string_free`].
#[no_mangle]
pub extern "C" fn dlm_manager_poll_json(ptr: *mut ManagerHandle) -> *mut c_char {
    let Some(handle) = handle(ptr) else {
        return ptr::null_mut();
    };
    handle.manager.prune_stale_requests();
    match handle.manager.snapshot_json() {
        Ok(json) => CString::new(json)
            .map(|s| s.into_raw())
            .unwrap_or(ptr::null_mut()),
        Err(err) => {
            warn!(error = %err, "failed to render download snapshot");
            ptr::null_mut()
        }
    }
}

#[no_mangle]
pub extern "C" fn dlm_manager_clear_finished(ptr: *mut ManagerHandle) -> i32 {
    match handle(ptr) {
        Some(handle) => handle.manager.clear_finished() as i32,
        None => -1,
    }
}

#[no_mangle]
pub extern "C" fn dlm_manager_cancel(ptr: *mut ManagerHandle, id: u64) -> bool {
    control(ptr, id, |manager, id| manager.cancel(id))
}

#[no_mangle]
pub extern "C" fn dlm_manager_remove(ptr: *mut ManagerHandle, id: u64) -> bool {
    control(ptr, id, |manager, id| manager.remove(id))
}

#[no_mangle]
pub extern "C" fn dlm_manager_open(ptr: *mut ManagerHandle, id: u64) -> bool {
    control(ptr, id, |manager, id| manager.open(id))
}

#[no_mangle]
pub extern "C" fn dlm_manager_reveal(ptr: *mut ManagerHandle, id: u64) -> bool {
    control(ptr, id, |manager, id| manager.reveal(id))
}

#[no_mangle]
pub extern "C" fn dlm_manager_has_active(ptr: *mut ManagerHandle) -> bool {
    handle(ptr)
        .map(|h| h.manager.has_active_transfers())
        .unwrap_or(false)
}

#[no_mangle]
pub extern "C" fn dlm_manager_last_started_sequence(ptr: *mut ManagerHandle) -> u64 {
    handle(ptr)
        .map(|h| h.manager.last_started_sequence())
        .unwrap_or(0)
}

fn control<F>(ptr: *mut ManagerHandle, id: u64, f: F) -> bool
where
    F: FnOnce(&DownloadManager, u64) -> bool,
{
    match handle(ptr) {
        Some(handle) => f(&handle.manager, id),
        None => false,
    }
}

#[no_mangle]
pub extern "C" fn dlm_string_free(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    unsafe {
        drop(CString::from_raw(s));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    extern "C" fn count_changes(user_data: *mut c_void) {
        let counter = unsafe { &*(user_data as *const AtomicUsize) };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn drives_a_transfer_through_the_c_api() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dir_c = CString::new(dir.path().to_string_lossy().to_string()).expect("dir");
        let url = CString::new("https://x/y.bin").expect("url");
        let name = CString::new("y.bin").expect("name");
        let counter = AtomicUsize::new(0);

        let ptr = dlm_manager_new(dir_c.as_ptr());
        dlm_manager_set_on_change(
            ptr,
            Some(count_changes),
            &counter as *const AtomicUsize as *mut c_void,
        );

        let id = dlm_manager_allocate_id(ptr);
        assert_eq!(id, 1);
        dlm_manager_notify_requested(ptr, id, url.as_ptr());
        dlm_manager_notify_begin(ptr, id, url.as_ptr(), name.as_ptr(), 4);
        assert!(dlm_manager_has_active(ptr));
        let data = [1u8, 2, 3, 4];
        dlm_manager_notify_data(ptr, id, data.as_ptr(), data.len());
        dlm_manager_notify_finish(ptr, id);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_eq!(dlm_manager_last_started_sequence(ptr), 1);
        assert!(!dlm_manager_cancel(ptr, id));

        let json = dlm_manager_poll_json(ptr);
        assert!(!json.is_null());
        let text = unsafe { CStr::from_ptr(json) }.to_string_lossy().to_string();
        dlm_string_free(json);
        assert!(text.contains("\"status\":\"completed\""));
        assert!(text.contains("\"canOpen\":true"));

        assert_eq!(dlm_manager_clear_finished(ptr), 1);
        dlm_manager_free(ptr);
        assert_eq!(std::fs::read(dir.path().join("y.bin")).expect("read"), data);
    }

    #[test]
    fn null_handles_are_rejected() {
        let null = ptr::null_mut();
        assert_eq!(dlm_manager_allocate_id(null), 0);
        assert!(!dlm_manager_cancel(null, 1));
        assert!(dlm_manager_poll_json(null).is_null());
        assert_eq!(dlm_manager_clear_finished(null), -1);
        dlm_manager_free(null);
    }
}
