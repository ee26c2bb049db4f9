//! Interchangeable ways of keeping a displayed tree current.
//!
//! Every strategy implements [`TreeSyncStrategy`]: attach to a root and
//! publish whole snapshots through a [`Publisher`] until detached. A
//! [`TreeView`] drives one strategy and is what a consumer holds: the current
//! tree, a change stream, and a way to move to another root.

mod poll;
mod push;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use clap::ValueEnum;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::diff::differs;
use crate::error::SyncError;
use crate::node::PathNode;

pub use poll::{
    AsyncPollStrategy, DEFAULT_ASYNC_POLL_INTERVAL, DEFAULT_SYNC_POLL_INTERVAL, SyncPollStrategy,
};
pub use push::PushStrategy;

/// Which strategy to run, chosen at composition time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Subscribe through the sync channel and receive pushed snapshots.
    #[default]
    Push,
    /// Rebuild with blocking filesystem calls on a short interval.
    SyncPoll,
    /// Rebuild with the concurrent builder on a longer interval.
    AsyncPoll,
}

struct ViewShared {
    /// Bumped every time the view moves to a new root or detaches.
    generation: AtomicU64,
    tree: watch::Sender<Arc<PathNode>>,
}

/// Publishes snapshots into a [`TreeView`] on behalf of one attachment.
///
/// A publisher is stamped with the view's generation at attach time; once the
/// view moves on, everything it publishes is dropped.
#[derive(Clone)]
pub struct Publisher {
    generation: u64,
    shared: Arc<ViewShared>,
}

impl Publisher {
    /// False once the attachment this publisher belongs to was abandoned.
    pub fn is_current(&self) -> bool {
        self.shared.generation.load(Ordering::SeqCst) == self.generation
    }

    /// Replace the shown tree with `tree` if this publisher is still current
    /// and the tree differs. Returns whether it was published.
    pub fn publish(&self, tree: Arc<PathNode>) -> bool {
        self.shared.tree.send_if_modified(|shown| {
            if self.shared.generation.load(Ordering::SeqCst) != self.generation {
                return false;
            }
            if !differs(shown, &tree) {
                return false;
            }
            *shown = tree;
            true
        })
    }
}

/// A running attachment of a strategy to one root. Dropping it stops any
/// background work.
pub struct Attachment {
    root: PathBuf,
    task: Option<JoinHandle<()>>,
}

impl Attachment {
    pub fn new(root: impl Into<PathBuf>, task: JoinHandle<()>) -> Self {
        Self {
            root: root.into(),
            task: Some(task),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Abort the background task and wait for it to finish unwinding.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// A policy for keeping a tree snapshot current.
pub trait TreeSyncStrategy: Send + Sync {
    /// Start syncing `root`, publishing snapshots through `publisher`.
    ///
    /// Implementations publish a first real snapshot as soon as they have
    /// one, and fail if that first snapshot cannot be produced.
    fn attach(
        &self,
        root: &Path,
        publisher: Publisher,
    ) -> impl Future<Output = Result<Attachment, SyncError>> + Send;

    /// Stop syncing. Timers and subscriptions are gone when this returns.
    fn detach(&self, mut attachment: Attachment) -> impl Future<Output = ()> + Send {
        async move { attachment.stop().await }
    }
}

/// One of the three strategies, selected at runtime.
pub enum Strategy {
    Push(PushStrategy),
    SyncPoll(SyncPollStrategy),
    AsyncPoll(AsyncPollStrategy),
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Push(_) => StrategyKind::Push,
            Self::SyncPoll(_) => StrategyKind::SyncPoll,
            Self::AsyncPoll(_) => StrategyKind::AsyncPoll,
        }
    }
}

impl TreeSyncStrategy for Strategy {
    async fn attach(&self, root: &Path, publisher: Publisher) -> Result<Attachment, SyncError> {
        match self {
            Self::Push(s) => s.attach(root, publisher).await,
            Self::SyncPoll(s) => s.attach(root, publisher).await,
            Self::AsyncPoll(s) => s.attach(root, publisher).await,
        }
    }

    async fn detach(&self, attachment: Attachment) {
        match self {
            Self::Push(s) => s.detach(attachment).await,
            Self::SyncPoll(s) => s.detach(attachment).await,
            Self::AsyncPoll(s) => s.detach(attachment).await,
        }
    }
}

/// The consumer side of tree sync: the current snapshot of one root, kept up
/// to date by a strategy.
///
/// Starts out showing [`PathNode::placeholder`] for the root and replaces the
/// whole tree whenever the strategy publishes.
pub struct TreeView<S: TreeSyncStrategy> {
    strategy: S,
    shared: Arc<ViewShared>,
    root: PathBuf,
    attachment: Option<Attachment>,
}

impl<S: TreeSyncStrategy> TreeView<S> {
    /// Attach `strategy` to `root`. Returns once the first real snapshot is
    /// shown.
    pub async fn open(strategy: S, root: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let mut view = Self::detached(strategy, root);
        view.start().await?;
        Ok(view)
    }

    /// A view of `root` that shows the placeholder and syncs nothing until
    /// [`start`](Self::start) is called. Lets a consumer render and subscribe
    /// to [`updates`](Self::updates) before the first build finishes.
    pub fn detached(strategy: S, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let (tree, _) = watch::channel(Arc::new(PathNode::placeholder(&root)));
        Self {
            strategy,
            shared: Arc::new(ViewShared {
                generation: AtomicU64::new(0),
                tree,
            }),
            root,
            attachment: None,
        }
    }

    /// Attach the strategy to the current root.
    pub async fn start(&mut self) -> Result<(), SyncError> {
        if self.attachment.is_some() {
            return Err(SyncError::AlreadyAttached);
        }
        self.attach().await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// The snapshot currently shown.
    pub fn current_tree(&self) -> Arc<PathNode> {
        Arc::clone(&self.shared.tree.borrow())
    }

    /// A receiver that is notified each time a new snapshot is shown.
    pub fn updates(&self) -> watch::Receiver<Arc<PathNode>> {
        self.shared.tree.subscribe()
    }

    /// Move the view to another root: detach from the current one, show a
    /// placeholder for the new root, and attach again.
    ///
    /// Anything the old attachment was still producing is discarded. If
    /// attaching to the new root fails, the view keeps showing the
    /// placeholder and stays detached until the next successful call.
    pub async fn set_root_path(&mut self, root: impl Into<PathBuf>) -> Result<(), SyncError> {
        let root = root.into();
        self.detach().await;
        self.shared.tree.send_modify(|shown| {
            *shown = Arc::new(PathNode::placeholder(&root));
        });
        tracing::debug!(root = %root.display(), "tree view moved");
        self.root = root;
        self.attach().await
    }

    /// Detach and stop all background work.
    pub async fn close(mut self) {
        self.detach().await;
    }

    async fn attach(&mut self) -> Result<(), SyncError> {
        let publisher = Publisher {
            generation: self.shared.generation.load(Ordering::SeqCst),
            shared: Arc::clone(&self.shared),
        };
        let attachment = self.strategy.attach(&self.root, publisher).await?;
        self.attachment = Some(attachment);
        Ok(())
    }

    async fn detach(&mut self) {
        // Invalidate publishers first so nothing lands after this point.
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(attachment) = self.attachment.take() {
            self.strategy.detach(attachment).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TreeOptions;
    use crate::channel::ChannelServer;
    use crate::registry::{RegistryOptions, WatchRegistry};
    use crate::watcher::fake::FakeBackend;
    use crate::watcher::{EventKind, RawEvent};
    use std::fs;
    use std::time::Duration;
    use tokio::time::timeout;

    const TICK: Duration = Duration::from_millis(100);
    const WAIT: Duration = Duration::from_secs(5);

    /// `<root>/a.txt` and `<root>/b/c.txt`.
    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("b").join("c.txt"), "c").unwrap();
        dir
    }

    fn push_setup() -> (PushStrategy, WatchRegistry, Arc<FakeBackend>) {
        let backend = Arc::new(FakeBackend::default());
        let registry = WatchRegistry::new(
            backend.clone(),
            RegistryOptions {
                debounce: Duration::from_millis(50),
                tree: TreeOptions::default(),
            },
        );
        let handle = ChannelServer::spawn(registry.clone());
        (PushStrategy::new(handle.connect()), registry, backend)
    }

    /// Wait until the view shows a tree satisfying `pred`.
    async fn wait_for<S: TreeSyncStrategy>(
        view: &TreeView<S>,
        pred: impl Fn(&PathNode) -> bool,
    ) -> Arc<PathNode> {
        let mut updates = view.updates();
        timeout(WAIT, async {
            loop {
                let tree = Arc::clone(&updates.borrow_and_update());
                if pred(&tree) {
                    return tree;
                }
                updates.changed().await.expect("view dropped");
            }
        })
        .await
        .expect("timed out waiting for tree")
    }

    #[tokio::test]
    async fn test_sync_poll_shows_tree_immediately_and_picks_up_changes() {
        let dir = project();
        let view = TreeView::open(SyncPollStrategy::new(TICK, TreeOptions::default()), dir.path())
            .await
            .unwrap();
        assert_eq!(view.current_tree().children().len(), 2);

        fs::write(dir.path().join("d.nex"), "").unwrap();
        let tree = wait_for(&view, |t| t.children().len() == 3).await;
        assert!(tree.find(&dir.path().join("d.nex")).is_some());
        view.close().await;
    }

    #[tokio::test]
    async fn test_async_poll_picks_up_removal() {
        let dir = project();
        let view = TreeView::open(AsyncPollStrategy::new(TICK, TreeOptions::default()), dir.path())
            .await
            .unwrap();
        assert_eq!(view.current_tree().len(), 4);

        fs::remove_dir_all(dir.path().join("b")).unwrap();
        wait_for(&view, |t| t.len() == 2).await;
        view.close().await;
    }

    #[tokio::test]
    async fn test_push_view_follows_registry() {
        let dir = project();
        let (strategy, registry, backend) = push_setup();
        let view = TreeView::open(strategy, dir.path()).await.unwrap();
        assert_eq!(view.current_tree().children().len(), 2);
        assert_eq!(registry.subscriber_count(dir.path()), 1);

        fs::remove_file(dir.path().join("b").join("c.txt")).unwrap();
        backend.emit(dir.path(), RawEvent::new(EventKind::Remove, dir.path().join("b")));
        wait_for(&view, |t| t.len() == 3).await;

        view.close().await;
        assert_eq!(registry.session_count(), 0);
        assert_eq!(backend.closes(), 1);
    }

    #[tokio::test]
    async fn test_set_root_path_switches_and_releases_old_root() {
        let first = project();
        let second = tempfile::tempdir().unwrap();
        fs::write(second.path().join("only.tre"), "").unwrap();
        let (strategy, registry, _backend) = push_setup();

        let mut view = TreeView::open(strategy, first.path()).await.unwrap();
        view.set_root_path(second.path()).await.unwrap();

        assert_eq!(view.root(), second.path());
        assert_eq!(registry.watched_roots(), vec![second.path().to_path_buf()]);
        let tree = view.current_tree();
        assert_eq!(tree.path, second.path());
        assert_eq!(tree.children().len(), 1);
    }

    #[tokio::test]
    async fn test_set_root_path_discards_results_for_old_root() {
        let first = project();
        let second = tempfile::tempdir().unwrap();
        let mut view = TreeView::open(
            Strategy::AsyncPoll(AsyncPollStrategy::new(TICK, TreeOptions::default())),
            first.path(),
        )
        .await
        .unwrap();
        view.set_root_path(second.path()).await.unwrap();

        // Changes under the old root must never surface.
        fs::write(first.path().join("late.txt"), "").unwrap();
        tokio::time::sleep(TICK * 4).await;
        let tree = view.current_tree();
        assert_eq!(tree.path, second.path());
        assert!(tree.children().is_empty());
        view.close().await;
    }

    #[tokio::test]
    async fn test_set_root_path_to_missing_root_keeps_placeholder() {
        let dir = project();
        let (strategy, registry, _backend) = push_setup();
        let mut view = TreeView::open(strategy, dir.path()).await.unwrap();

        let missing = dir.path().join("missing");
        let err = view.set_root_path(&missing).await.unwrap_err();
        assert!(matches!(err, SyncError::Channel(_)));
        assert_eq!(*view.current_tree(), PathNode::placeholder(&missing));
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test]
    async fn test_strategy_enum_dispatches() {
        let dir = project();
        let strategy = Strategy::SyncPoll(SyncPollStrategy::new(TICK, TreeOptions::default()));
        assert_eq!(strategy.kind(), StrategyKind::SyncPoll);
        let view = TreeView::open(strategy, dir.path()).await.unwrap();
        assert_eq!(view.current_tree().len(), 4);
        view.close().await;
    }

    #[tokio::test]
    async fn test_detached_view_shows_placeholder_until_started() {
        let dir = project();
        let mut view = TreeView::detached(
            SyncPollStrategy::new(TICK, TreeOptions::default()),
            dir.path(),
        );
        let mut updates = view.updates();
        assert_eq!(*view.current_tree(), PathNode::placeholder(dir.path()));

        view.start().await.unwrap();
        assert!(updates.has_changed().unwrap());
        assert_eq!(updates.borrow_and_update().children().len(), 2);
        assert!(matches!(view.start().await, Err(SyncError::AlreadyAttached)));
        view.close().await;
    }

    #[tokio::test]
    async fn test_push_strategy_rejects_second_attachment() {
        let one = project();
        let two = project();
        let (strategy, registry, _backend) = push_setup();

        let attachment = strategy.attach(one.path(), publisher(one.path())).await.unwrap();
        let second = timeout(WAIT, strategy.attach(two.path(), publisher(two.path())))
            .await
            .expect("second attach must not hang");
        assert!(matches!(second, Err(SyncError::AlreadyAttached)));
        assert_eq!(registry.watched_roots(), vec![one.path().to_path_buf()]);

        strategy.detach(attachment).await;
        let attachment = strategy.attach(two.path(), publisher(two.path())).await.unwrap();
        assert_eq!(registry.watched_roots(), vec![two.path().to_path_buf()]);
        strategy.detach(attachment).await;
    }

    fn publisher(root: &Path) -> Publisher {
        let (tree, _) = watch::channel(Arc::new(PathNode::placeholder(root)));
        Publisher {
            generation: 0,
            shared: Arc::new(ViewShared {
                generation: AtomicU64::new(0),
                tree,
            }),
        }
    }

    fn shared(root: &str) -> Arc<ViewShared> {
        let (tree, _) = watch::channel(Arc::new(PathNode::placeholder(root)));
        Arc::new(ViewShared {
            generation: AtomicU64::new(0),
            tree,
        })
    }

    #[test]
    fn test_publisher_replaces_tree() {
        let shared = shared("/p");
        let publisher = Publisher {
            generation: 0,
            shared: Arc::clone(&shared),
        };
        let tree = Arc::new(PathNode::folder("/p", vec![PathNode::leaf("/p/a")]));
        assert!(publisher.publish(Arc::clone(&tree)));
        assert_eq!(*shared.tree.borrow(), tree);
        assert!(!publisher.publish(tree), "identical tree is not republished");
    }

    #[test]
    fn test_stale_publisher_is_ignored() {
        let shared = shared("/p");
        let publisher = Publisher {
            generation: 0,
            shared: Arc::clone(&shared),
        };
        shared.generation.fetch_add(1, Ordering::SeqCst);
        assert!(!publisher.is_current());
        assert!(!publisher.publish(Arc::new(PathNode::folder("/p", vec![]))));
        assert_eq!(**shared.tree.borrow(), PathNode::placeholder("/p"));
    }
}
