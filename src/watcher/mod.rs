pub mod debounce;
pub mod event;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use crate::builder::TreeOptions;
use crate::error::WatchError;

use debounce::Debouncer;
pub use event::{EventKind, RawEvent};

/// Default quiet period before a burst of raw events is reported.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Receives raw events from an OS watch. Called from the backend's own thread.
pub type RawEventSink = Arc<dyn Fn(RawEvent) + Send + Sync>;

/// Callback registered with [`DirectoryWatcher::add_listener`].
pub type Listener = Arc<dyn Fn(EventKind, &Path) + Send + Sync>;

/// An open OS-level recursive watch.
pub trait OsWatch: Send {
    /// Release the OS watch. Called at most once by [`DirectoryWatcher`].
    fn close(&mut self);
}

/// Source of recursive OS watches. The production backend is
/// [`NotifyBackend`]; tests substitute a recording double.
pub trait WatchBackend: Send + Sync {
    fn open(&self, root: &Path, sink: RawEventSink) -> Result<Box<dyn OsWatch>, WatchError>;
}

/// Watch backend using the platform's native notification API through `notify`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyBackend;

struct NotifyWatch {
    root: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

impl OsWatch for NotifyWatch {
    fn close(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            // The root may already be gone; dropping the watcher releases it anyway.
            let _ = watcher.unwatch(&self.root);
        }
    }
}

impl WatchBackend for NotifyBackend {
    fn open(&self, root: &Path, sink: RawEventSink) -> Result<Box<dyn OsWatch>, WatchError> {
        let establish = |source| WatchError::Establish {
            path: root.to_path_buf(),
            source,
        };

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    let Some(kind) = EventKind::from_notify(event.kind) else {
                        return;
                    };
                    for path in event.paths {
                        sink(RawEvent { kind, path });
                    }
                }
                Err(err) => tracing::warn!(%err, "watch error"),
            }
        })
        .map_err(establish)?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(establish)?;

        Ok(Box::new(NotifyWatch {
            root: root.to_path_buf(),
            watcher: Some(watcher),
        }))
    }
}

/// One recursive watch on a root path, with debounced listener callbacks.
///
/// Raw events for excluded paths are dropped; everything else feeds a
/// [`Debouncer`], so a bulk write of many files produces a single listener
/// call carrying the last event of the burst.
pub struct DirectoryWatcher {
    root: PathBuf,
    os_watch: Option<Box<dyn OsWatch>>,
    debouncer: Option<Debouncer<RawEvent>>,
    listeners: Arc<Mutex<Vec<Listener>>>,
}

impl DirectoryWatcher {
    /// Start watching `root`. Must be called from within a tokio runtime.
    ///
    /// Fails if `root` does not exist or the backend cannot establish the watch.
    pub fn open(
        backend: &dyn WatchBackend,
        root: &Path,
        debounce: Duration,
        exclude: &TreeOptions,
    ) -> Result<Self, WatchError> {
        match root.try_exists() {
            Ok(true) => {}
            Ok(false) => return Err(WatchError::PathNotFound(root.to_path_buf())),
            Err(err) => {
                return Err(WatchError::Establish {
                    path: root.to_path_buf(),
                    source: notify::Error::io(err),
                });
            }
        }

        let listeners: Arc<Mutex<Vec<Listener>>> = Arc::default();
        let fire_to = Arc::clone(&listeners);
        let debouncer = Debouncer::spawn(debounce, move |event: RawEvent| {
            let current: Vec<Listener> = fire_to
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for listener in current {
                listener(event.kind, &event.path);
            }
        });

        let tx = debouncer.sender();
        let filter = exclude.clone();
        let watched_root = root.to_path_buf();
        let sink: RawEventSink = Arc::new(move |event: RawEvent| {
            if filter.is_excluded_below(&watched_root, &event.path) {
                return;
            }
            let _ = tx.send(event);
        });

        let os_watch = backend.open(root, sink)?;
        tracing::debug!(root = %root.display(), "watch opened");

        Ok(Self {
            root: root.to_path_buf(),
            os_watch: Some(os_watch),
            debouncer: Some(debouncer),
            listeners,
        })
    }

    /// Register a callback for debounced change events.
    pub fn add_listener<F>(&self, callback: F)
    where
        F: Fn(EventKind, &Path) + Send + Sync + 'static,
    {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Release the OS watch and drop pending events. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(mut os_watch) = self.os_watch.take() {
            os_watch.close();
            tracing::debug!(root = %self.root.display(), "watch closed");
        }
        self.debouncer = None;
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.close();
    }
}
