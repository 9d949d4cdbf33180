//! Target path resolution for incoming downloads.
//!
//! Everything here is free of shared state; the only side effects are
//! existence probes against the download directory and creating that
//! directory on demand.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;
use tracing::{debug, warn};
use url::Url;

use crate::config::DOWNLOADS_FOLDER_NAME;

const RESERVED_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// `$DLM_DOWNLOAD_DIR` when set, else `<home>/downloads`, else
/// `<cwd>/downloads`.
pub fn default_download_dir() -> PathBuf {
    if let Ok(dir) = env::var("DLM_DOWNLOAD_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    let home_var = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
    let base = match env::var(home_var) {
        Ok(home) if !home.is_empty() => PathBuf::from(home),
        _ => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };
    base.join(DOWNLOADS_FOLDER_NAME)
}

/// Creates `dir` if missing. Failures are only logged; they show up later as
/// an open failure for the transfer that needed the directory.
pub fn ensure_dir(dir: &Path) {
    if dir.is_dir() {
        return;
    }
    if let Err(err) = fs::create_dir_all(dir) {
        warn!(dir = %dir.display(), error = %err, "failed to create download directory");
    }
}

/// Picks the engine's suggestion when present, otherwise the last path
/// segment of `url`, otherwise `default_name`. The result is not sanitized.
pub fn derive_filename(url: &str, suggested: &str, default_name: &str) -> String {
    if !suggested.is_empty() {
        return suggested.to_string();
    }
    filename_from_url(url).unwrap_or_else(|| default_name.to_string())
}

/// Hierarchical URLs yield their decoded last path segment. Anything else,
/// including `C:\dir\file.txt` which parses as an opaque `c:` URL, is cut
/// as a raw string.
fn filename_from_url(url: &str) -> Option<String> {
    let name = match Url::parse(url) {
        Ok(parsed) if !parsed.cannot_be_a_base() => {
            let segment = parsed.path_segments()?.next_back()?;
            percent_decode_str(segment).decode_utf8_lossy().into_owned()
        }
        _ => {
            let trimmed = match url.find(['?', '#']) {
                Some(idx) => &url[..idx],
                None => url,
            };
            let start = trimmed.rfind(['/', '\\']).map(|idx| idx + 1).unwrap_or(0);
            trimmed[start..].to_string()
        }
    };
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Drops control characters and the reserved set `\ / : * ? " < > |`.
/// Falls back to `default_name` when nothing usable is left.
pub fn sanitize_filename(name: &str, default_name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|ch| (*ch as u32) >= 32 && !RESERVED_CHARS.contains(ch))
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        default_name.to_string()
    } else {
        cleaned
    }
}

/// Returns `dir/name` if free, else the first free `stem (n).ext` for
/// `n` in `1..=max_probes`. When every candidate is taken the original
/// colliding path is returned.
pub fn unique_path(dir: &Path, name: &str, max_probes: u32) -> PathBuf {
    let path = dir.join(name);
    if !path.exists() {
        return path;
    }

    let stem = path
        .file_stem()
        .map(|value| value.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string());
    let extension = path
        .extension()
        .map(|value| format!(".{}", value.to_string_lossy()))
        .unwrap_or_default();

    for index in 1..=max_probes {
        let candidate = dir.join(format!("{} ({}){}", stem, index, extension));
        if !candidate.exists() {
            debug!(path = %candidate.display(), "resolved name collision");
            return candidate;
        }
    }
    warn!(path = %path.display(), "no free name left, reusing colliding path");
    path
}

/// Full materializer pipeline: derive, sanitize, de-collide.
pub fn resolve_target(
    dir: &Path,
    url: &str,
    suggested: &str,
    default_name: &str,
    max_probes: u32,
) -> PathBuf {
    let derived = derive_filename(url, suggested, default_name);
    let sanitized = sanitize_filename(&derived, default_name);
    unique_path(dir, &sanitized, max_probes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn suggested_name_wins() {
        assert_eq!(
            derive_filename("https://x/y.bin", "report.pdf", "download"),
            "report.pdf"
        );
    }

    #[test]
    fn url_name_ignores_query_and_fragment() {
        assert_eq!(
            derive_filename("https://example.com/a/b/file.zip?token=1#frag", "", "download"),
            "file.zip"
        );
        assert_eq!(derive_filename("files/c.tar?x=1", "", "download"), "c.tar");
        assert_eq!(derive_filename("https://example.com/", "", "download"), "download");
        assert_eq!(derive_filename("", "", "download"), "download");
    }

    #[test]
    fn url_name_is_percent_decoded() {
        assert_eq!(derive_filename("https://x/a b.bin", "", "download"), "a b.bin");
        assert_eq!(
            derive_filename("https://x/my%20report.pdf", "", "download"),
            "my report.pdf"
        );
        assert_eq!(derive_filename("https://x/файл.txt", "", "download"), "файл.txt");
        assert_eq!(derive_filename("https://x/%D1%84.txt?x=%20", "", "download"), "ф.txt");
    }

    #[test]
    fn windows_path_uses_last_component() {
        assert_eq!(derive_filename("C:\\dir\\file.txt", "", "download"), "file.txt");
        let dir = Path::new("/nonexistent-dir");
        assert_eq!(
            resolve_target(dir, "https://x/a%3Fb.txt", "", "download", 1),
            dir.join("ab.txt")
        );
    }

    #[test]
    fn sanitize_strips_reserved_and_control() {
        assert_eq!(sanitize_filename("bad:name?.txt", "download"), "badname.txt");
        assert_eq!(sanitize_filename("tab\there\n.log", "download"), "tabhere.log");
        assert_eq!(sanitize_filename("<>|*", "download"), "download");
        assert_eq!(sanitize_filename("..", "download"), "download");
    }

    #[test]
    fn unique_path_probes_numbered_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(unique_path(dir.path(), "a.txt", 999), dir.path().join("a.txt"));

        File::create(dir.path().join("a.txt")).expect("create a.txt");
        assert_eq!(unique_path(dir.path(), "a.txt", 999), dir.path().join("a (1).txt"));

        File::create(dir.path().join("a (1).txt")).expect("create a (1).txt");
        assert_eq!(unique_path(dir.path(), "a.txt", 999), dir.path().join("a (2).txt"));
    }

    #[test]
    fn unique_path_without_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        File::create(dir.path().join("README")).expect("create");
        assert_eq!(unique_path(dir.path(), "README", 999), dir.path().join("README (1)"));
    }

    #[test]
    fn unique_path_falls_back_when_exhausted() {
        let dir = tempfile::tempdir().expect("tempdir");
        File::create(dir.path().join("a.txt")).expect("create");
        File::create(dir.path().join("a (1).txt")).expect("create");
        File::create(dir.path().join("a (2).txt")).expect("create");
        assert_eq!(unique_path(dir.path(), "a.txt", 2), dir.path().join("a.txt"));
    }

    #[test]
    fn ensure_dir_creates_nested_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("one").join("two");
        ensure_dir(&nested);
        assert!(nested.is_dir());
        ensure_dir(&nested);
        assert!(nested.is_dir());
    }
}
