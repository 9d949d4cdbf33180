use std::fmt;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// The single change listener slot. The manager clones the callback out
/// while holding its lock and calls it after the lock is released, so a
/// callback may call back into the manager.
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    callback: Option<ChangeCallback>,
}

impl ChangeNotifier {
    pub fn new(callback: ChangeCallback) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    pub fn is_set(&self) -> bool {
        self.callback.is_some()
    }

    pub fn fire(&self) {
        if let Some(callback) = &self.callback {
            callback();
        }
    }

    /// A callback that posts a unit message per change, for consumers that
    /// would rather drain a queue than be called re-entrantly.
    pub fn channel() -> (ChangeCallback, Receiver<()>) {
        let (tx, rx) = mpsc::channel();
        let callback: ChangeCallback = Arc::new(move || {
            let _ = tx.send(());
        });
        (callback, rx)
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("set", &self.is_set())
            .finish()
    }
}

/// Edge detector over [`crate::DownloadManager::last_started_sequence`].
#[derive(Debug, Default, Clone)]
pub struct NewTransferWatch {
    last_seen: u64,
}

impl NewTransferWatch {
    /// True once for every sequence value greater than the last one seen.
    pub fn observe(&mut self, sequence: u64) -> bool {
        if sequence > self.last_seen {
            self.last_seen = sequence;
            true
        } else {
            false
        }
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_callback_posts_messages() {
        let (callback, rx) = ChangeNotifier::channel();
        let notifier = ChangeNotifier::new(callback);
        notifier.fire();
        notifier.fire();
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn watch_fires_once_per_sequence() {
        let mut watch = NewTransferWatch::default();
        assert!(!watch.observe(0));
        assert!(watch.observe(1));
        assert!(!watch.observe(1));
        assert!(watch.observe(3));
        assert_eq!(watch.last_seen(), 3);
    }
}
