pub mod config;
pub mod error;
pub mod filename;
pub mod launcher;
pub mod listener;
pub mod manager;
pub mod notify;
pub mod record;
pub mod snapshot;
pub mod store;


pub use crate::config::ManagerConfig;
pub use crate::error::{CoreError, CoreResult};
pub use crate::launcher::{Launcher, SystemLauncher};
pub use crate::listener::DownloadListener;
pub use crate::manager::DownloadManager;
pub use crate::notify::{ChangeNotifier, NewTransferWatch};
pub use crate::record::{DownloadId, DownloadStatus, Record};
pub use crate::snapshot::DownloadDocument;
