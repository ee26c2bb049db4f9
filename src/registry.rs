//! Process-wide multiplexing of tree subscribers onto one watch per root.
//!
//! A [`WatchRegistry`] is an explicit object: construct one at startup and
//! hand clones to whatever needs to subscribe. Each distinct root has at most
//! one [`Session`] and therefore one open [`DirectoryWatcher`], however many
//! subscribers share it. The session is created by the first subscriber and
//! torn down, closing the watch, when the last one leaves.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::builder::{TreeOptions, build_tree_async};
use crate::diff::{changes, differs};
use crate::error::WatchError;
use crate::node::PathNode;
use crate::watcher::{DEFAULT_DEBOUNCE, DirectoryWatcher, NotifyBackend, WatchBackend};

/// Identifies one subscriber within the registry.
pub type SubscriptionId = u64;

/// Settings applied to every session a registry opens.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub debounce: Duration,
    pub tree: TreeOptions,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            tree: TreeOptions::default(),
        }
    }
}

struct Subscriber {
    tx: mpsc::UnboundedSender<Arc<PathNode>>,
    /// Set once a rebuild has reached this subscriber; its own initial build
    /// is older than that and must not follow it.
    received: bool,
}

impl Subscriber {
    fn new(tx: mpsc::UnboundedSender<Arc<PathNode>>) -> Self {
        Self { tx, received: false }
    }
}

struct Session {
    /// Distinguishes this session from an earlier one on the same root, so a
    /// rebuild started by a torn-down session is never published.
    epoch: u64,
    watcher: DirectoryWatcher,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    last_emitted: Option<Arc<PathNode>>,
}

struct RegistryInner {
    backend: Arc<dyn WatchBackend>,
    options: RegistryOptions,
    sessions: Mutex<HashMap<PathBuf, Session>>,
    next_id: AtomicU64,
}

impl RegistryInner {
    fn sessions(&self) -> MutexGuard<'_, HashMap<PathBuf, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Remove one subscriber; closes the watch if it was the last.
    fn remove(&self, root: &Path, id: SubscriptionId) -> bool {
        let mut sessions = self.sessions();
        let Some(session) = sessions.get_mut(root) else {
            return false;
        };
        if session.subscribers.remove(&id).is_none() {
            return false;
        }
        tracing::debug!(root = %root.display(), id, "unsubscribed");

        if session.subscribers.is_empty()
            && let Some(mut session) = sessions.remove(root)
        {
            session.watcher.close();
            tracing::info!(root = %root.display(), "stopped watching");
        }
        true
    }

    /// Record and deliver `tree` to one subscriber as its starting state.
    fn deliver_initial(&self, root: &Path, epoch: u64, id: SubscriptionId, tree: Arc<PathNode>) {
        let mut sessions = self.sessions();
        let Some(session) = sessions.get_mut(root).filter(|s| s.epoch == epoch) else {
            return;
        };
        let Some(subscriber) = session.subscribers.get_mut(&id) else {
            return;
        };
        if subscriber.received {
            tracing::trace!(root = %root.display(), id, "initial tree superseded by rebuild");
            return;
        }
        subscriber.received = true;
        let _ = subscriber.tx.send(Arc::clone(&tree));
        if session.last_emitted.is_none() {
            session.last_emitted = Some(tree);
        }
    }

    /// Publish a rebuilt tree to every subscriber of `root`, unless it matches
    /// what was last emitted or the session it was built for has gone.
    fn publish(&self, root: &Path, epoch: u64, tree: Arc<PathNode>) {
        let mut sessions = self.sessions();
        let Some(session) = sessions.get_mut(root).filter(|s| s.epoch == epoch) else {
            tracing::trace!(root = %root.display(), "discarding rebuild for closed session");
            return;
        };

        if let Some(last) = &session.last_emitted {
            if !differs(last, &tree) {
                tracing::trace!(root = %root.display(), "tree unchanged");
                return;
            }
            let delta = changes(last, &tree);
            tracing::debug!(
                root = %root.display(),
                added = delta.added.len(),
                removed = delta.removed.len(),
                "tree changed"
            );
        }

        session.last_emitted = Some(Arc::clone(&tree));
        for subscriber in session.subscribers.values_mut() {
            subscriber.received = true;
            let _ = subscriber.tx.send(Arc::clone(&tree));
        }
    }
}

/// Rebuild `root` after a debounced change and publish if it differs.
async fn rebuild(inner: Weak<RegistryInner>, root: PathBuf, epoch: u64) {
    let Some(options) = inner.upgrade().map(|i| i.options.tree.clone()) else {
        return;
    };
    match build_tree_async(&root, &options).await {
        Ok(tree) => {
            if let Some(inner) = inner.upgrade() {
                inner.publish(&root, epoch, Arc::new(tree));
            }
        }
        Err(err) => tracing::warn!(root = %root.display(), %err, "rebuild failed"),
    }
}

/// Shared registry of watch sessions. Cloning yields another handle to the
/// same registry.
#[derive(Clone)]
pub struct WatchRegistry {
    inner: Arc<RegistryInner>,
}

impl WatchRegistry {
    pub fn new(backend: Arc<dyn WatchBackend>, options: RegistryOptions) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                backend,
                options,
                sessions: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// A registry backed by native OS notifications.
    pub fn with_notify(options: RegistryOptions) -> Self {
        Self::new(Arc::new(NotifyBackend), options)
    }

    /// Subscribe to live snapshots of `root`.
    ///
    /// Opens a watch if this is the first subscriber for `root`, otherwise
    /// joins the existing session. Before returning, builds the tree once and
    /// queues it on the new subscription, so the caller never waits for a
    /// filesystem event to see the starting state.
    ///
    /// Fails if the watch cannot be established or the initial build fails.
    pub async fn subscribe(&self, root: impl Into<PathBuf>) -> Result<Subscription, WatchError> {
        let root = root.into();
        let id = self.inner.next_id();
        let (tx, rx) = mpsc::unbounded_channel();

        let epoch = {
            let mut sessions = self.inner.sessions();
            match sessions.get_mut(&root) {
                Some(session) => {
                    session.subscribers.insert(id, Subscriber::new(tx));
                    session.epoch
                }
                None => {
                    let epoch = self.inner.next_id();
                    let watcher = DirectoryWatcher::open(
                        self.inner.backend.as_ref(),
                        &root,
                        self.inner.options.debounce,
                        &self.inner.options.tree,
                    )?;

                    let weak = Arc::downgrade(&self.inner);
                    let watched = root.clone();
                    watcher.add_listener(move |kind, path| {
                        tracing::debug!(
                            root = %watched.display(),
                            event = kind.as_str(),
                            path = %path.display(),
                            "change detected"
                        );
                        tokio::spawn(rebuild(weak.clone(), watched.clone(), epoch));
                    });

                    sessions.insert(
                        root.clone(),
                        Session {
                            epoch,
                            watcher,
                            subscribers: HashMap::from([(id, Subscriber::new(tx))]),
                            last_emitted: None,
                        },
                    );
                    tracing::info!(root = %root.display(), "started watching");
                    epoch
                }
            }
        };

        let guard = SubscriptionGuard {
            id,
            root: root.clone(),
            registry: Some(Arc::downgrade(&self.inner)),
        };

        match build_tree_async(&root, &self.inner.options.tree).await {
            Ok(tree) => {
                self.inner.deliver_initial(&root, epoch, id, Arc::new(tree));
                Ok(Subscription { guard, updates: rx })
            }
            // Dropping the guard removes the subscriber again.
            Err(source) => Err(WatchError::InitialBuild { path: root, source }),
        }
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        subscription.into_parts().0.release()
    }

    /// Number of roots currently watched.
    pub fn session_count(&self) -> usize {
        self.inner.sessions().len()
    }

    /// Number of subscribers sharing the session on `root`.
    pub fn subscriber_count(&self, root: &Path) -> usize {
        self.inner
            .sessions()
            .get(root)
            .map_or(0, |s| s.subscribers.len())
    }

    /// Roots with an open watch.
    pub fn watched_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self.inner.sessions().keys().cloned().collect();
        roots.sort();
        roots
    }
}

/// Keeps one subscriber registered. Dropping it unsubscribes.
pub struct SubscriptionGuard {
    id: SubscriptionId,
    root: PathBuf,
    registry: Option<Weak<RegistryInner>>,
}

impl SubscriptionGuard {
    /// Unsubscribe now. Returns false if already released or the registry is gone.
    pub fn release(mut self) -> bool {
        self.release_inner()
    }

    fn release_inner(&mut self) -> bool {
        match self.registry.take().and_then(|weak| weak.upgrade()) {
            Some(inner) => inner.remove(&self.root, self.id),
            None => false,
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// A live subscription: snapshots of one root, the initial one first.
pub struct Subscription {
    guard: SubscriptionGuard,
    updates: mpsc::UnboundedReceiver<Arc<PathNode>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.guard.id
    }

    pub fn root(&self) -> &Path {
        &self.guard.root
    }

    /// Wait for the next snapshot. `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<Arc<PathNode>> {
        self.updates.recv().await
    }

    /// Take a queued snapshot without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<PathNode>> {
        self.updates.try_recv().ok()
    }

    /// Split into the guard that keeps the subscription alive and the stream
    /// of snapshots.
    pub fn into_parts(self) -> (SubscriptionGuard, mpsc::UnboundedReceiver<Arc<PathNode>>) {
        (self.guard, self.updates)
    }
}
