use std::env;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dlm_core::filename::{default_download_dir, resolve_target};
use dlm_core::{
    ChangeNotifier, DownloadDocument, DownloadListener, DownloadManager, DownloadStatus,
    ManagerConfig, NewTransferWatch,
};
use tracing::{debug, info};

#[derive(Debug, Default)]
struct FetchOptions {
    sources: Vec<String>,
    name: Option<String>,
    dir: Option<PathBuf>,
    chunk: usize,
    cancel_after: Option<u64>,
    fail_after: Option<u64>,
    json: bool,
}

fn main() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return;
    }

    match args[1].as_str() {
        "fetch" => match parse_fetch(&args[2..]) {
            Some(options) => run_fetch(options),
            None => print_usage(),
        },
        "resolve" => {
            let Some(url) = args.get(2) else {
                print_usage();
                return;
            };
            let suggested = args.get(3).map(String::as_str).unwrap_or("");
            let config = ManagerConfig::default();
            let dir = config.download_dir.clone().unwrap_or_else(default_download_dir);
            let path = resolve_target(
                &dir,
                url,
                suggested,
                &config.default_filename,
                config.max_collision_probes,
            );
            println!("{}", path.display());
        }
        _ => print_usage(),
    }
}

fn parse_fetch(args: &[String]) -> Option<FetchOptions> {
    let mut options = FetchOptions {
        chunk: 64 * 1024,
        ..FetchOptions::default()
    };
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--name" => options.name = Some(iter.next()?.to_string()),
            "--dir" => options.dir = Some(PathBuf::from(iter.next()?)),
            "--chunk" => options.chunk = iter.next()?.parse::<usize>().ok()?.max(1),
            "--cancel-after" => options.cancel_after = Some(iter.next()?.parse().ok()?),
            "--fail-after" => options.fail_after = Some(iter.next()?.parse().ok()?),
            "--json" => options.json = true,
            value => options.sources.push(value.to_string()),
        }
    }
    if options.sources.is_empty() {
        return None;
    }
    Some(options)
}

fn run_fetch(options: FetchOptions) {
    let mut config = ManagerConfig::default();
    if let Some(dir) = &options.dir {
        config = config.with_download_dir(dir);
    }
    let manager = Arc::new(DownloadManager::new(config));
    let (callback, changes) = ChangeNotifier::channel();
    manager.set_on_change(move || callback());
    info!(dir = %manager.download_dir().display(), "download directory");

    let options = Arc::new(options);
    let engines: Vec<_> = options
        .sources
        .iter()
        .cloned()
        .map(|source| {
            let manager = Arc::clone(&manager);
            let options = Arc::clone(&options);
            thread::spawn(move || play_engine(manager.as_ref(), &source, &options))
        })
        .collect();

    let mut watch = NewTransferWatch::default();
    loop {
        match changes.recv_timeout(Duration::from_millis(250)) {
            Ok(()) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
        if watch.observe(manager.last_started_sequence()) {
            info!(sequence = watch.last_seen(), "new download started");
        }
        let documents = manager.poll();
        if !options.json {
            for doc in documents.iter().filter(|doc| !doc.status.is_terminal()) {
                println!("{}", progress_line(doc));
            }
        }
        if engines.iter().all(|engine| engine.is_finished()) && !manager.has_active_transfers() {
            break;
        }
    }
    for engine in engines {
        let _ = engine.join();
    }

    let documents = manager.snapshot();
    if options.json {
        match manager.snapshot_json() {
            Ok(json) => println!("{}", json),
            Err(err) => eprintln!("error: {}", err),
        }
    } else {
        for doc in &documents {
            println!("{}", summary_line(doc));
        }
    }
}

/// Feeds one local file through the inbound port the way a content engine
/// would: request, begin, data chunks, then finish or fail.
fn play_engine(manager: &DownloadManager, source: &str, options: &FetchOptions) {
    let listener: &dyn DownloadListener = manager;
    let id = listener.next_download_id();
    let url = source_url(source);
    listener.on_request_download(id, &url);

    let mut file = match File::open(source) {
        Ok(file) => file,
        Err(err) => {
            debug!(id, source, error = %err, "source unreadable");
            listener.on_fail_download(id);
            return;
        }
    };
    let expected = file
        .metadata()
        .map(|meta| meta.len() as i64)
        .unwrap_or(-1);
    let suggested = options.name.clone().unwrap_or_default();
    listener.on_begin_download(id, &url, &suggested, expected);

    let mut buffer = vec![0u8; options.chunk];
    let mut sent = 0u64;
    loop {
        if options.fail_after.is_some_and(|limit| sent >= limit) {
            listener.on_fail_download(id);
            return;
        }
        let read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) => {
                debug!(id, error = %err, "source read failed");
                listener.on_fail_download(id);
                return;
            }
        };
        listener.on_receive_data(id, &buffer[..read]);
        sent += read as u64;
        if let Some(limit) = options.cancel_after {
            if sent >= limit {
                // Stand in for the UI pressing cancel mid-transfer.
                manager.cancel(id);
            }
        }
    }
    listener.on_finish_download(id);
}

fn source_url(source: &str) -> String {
    let path = Path::new(source);
    let absolute = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", absolute.display())
}

fn progress_line(doc: &DownloadDocument) -> String {
    let percent = if doc.total > 0 {
        format!("{:.1}%", (doc.received as f64 / doc.total as f64) * 100.0)
    } else {
        "--".to_string()
    };
    format!(
        "[{}] #{} {} {}/{} {}",
        doc.status,
        doc.id,
        percent,
        format_bytes(doc.received),
        if doc.total >= 0 { format_bytes(doc.total) } else { "?".to_string() },
        doc.filename,
    )
}

fn summary_line(doc: &DownloadDocument) -> String {
    match doc.status {
        DownloadStatus::Completed => format!("#{}\tcompleted\t{}", doc.id, doc.path),
        DownloadStatus::Failed => format!("#{}\tfailed\t{}\t{}", doc.id, doc.filename, doc.error),
        status => format!("#{}\t{}\t{}", doc.id, status, doc.filename),
    }
}

fn format_bytes(bytes: i64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2}GB", b / GB)
    } else if b >= MB {
        format!("{:.2}MB", b / MB)
    } else if b >= KB {
        format!("{:.2}KB", b / KB)
    } else {
        format!("{}B", bytes)
    }
}

fn print_usage() {
    eprintln!(
        "Usage: dlm-cli <command> [args]\n\
Commands:\n\
  fetch <file>... [options]   Feed local files through the download manager\n\
      --name <name>           Suggested filename passed at begin\n\
      --dir <dir>             Download directory\n\
      --chunk <bytes>         Data chunk size (default 65536)\n\
      --cancel-after <bytes>  Cancel once this many bytes were delivered\n\
      --fail-after <bytes>    Report an engine failure after this many bytes\n\
      --json                  Print the final snapshot as JSON\n\
  resolve <url> [name]        Show the path a download would be written to\n\
Environment:\n\
  DLM_DOWNLOAD_DIR            Default download directory\n\
  RUST_LOG                    Log filter (default info)"
    );
}
