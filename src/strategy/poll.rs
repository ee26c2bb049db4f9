use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::{Attachment, Publisher, TreeSyncStrategy};
use crate::builder::{TreeOptions, build_tree, build_tree_async};
use crate::error::{SyncError, TreeError};
use crate::node::PathNode;

pub const DEFAULT_SYNC_POLL_INTERVAL: Duration = Duration::from_millis(1500);
pub const DEFAULT_ASYNC_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Rebuilds the tree with blocking filesystem calls on a fixed interval.
///
/// The first build runs inline in `attach`, so the caller has a real tree as
/// soon as attaching returns. Later builds run on the blocking pool.
pub struct SyncPollStrategy {
    interval: Duration,
    options: Arc<TreeOptions>,
}

impl SyncPollStrategy {
    pub fn new(interval: Duration, options: TreeOptions) -> Self {
        Self {
            interval,
            options: Arc::new(options),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for SyncPollStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_SYNC_POLL_INTERVAL, TreeOptions::default())
    }
}

impl TreeSyncStrategy for SyncPollStrategy {
    async fn attach(&self, root: &Path, publisher: Publisher) -> Result<Attachment, SyncError> {
        let tree = build_tree(root, &self.options)?;
        publisher.publish(Arc::new(tree));

        let options = Arc::clone(&self.options);
        let task = spawn_poller(root.to_path_buf(), self.interval, publisher, move |root| {
            let options = Arc::clone(&options);
            async move {
                tokio::task::spawn_blocking(move || build_tree(&root, &options))
                    .await
                    .map_err(|err| TreeError::Join(err.to_string()))?
            }
        });
        Ok(Attachment::new(root, task))
    }
}

/// Rebuilds the tree with the concurrent, non-blocking builder on a longer
/// interval.
pub struct AsyncPollStrategy {
    interval: Duration,
    options: Arc<TreeOptions>,
}

impl AsyncPollStrategy {
    pub fn new(interval: Duration, options: TreeOptions) -> Self {
        Self {
            interval,
            options: Arc::new(options),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for AsyncPollStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_ASYNC_POLL_INTERVAL, TreeOptions::default())
    }
}

impl TreeSyncStrategy for AsyncPollStrategy {
    async fn attach(&self, root: &Path, publisher: Publisher) -> Result<Attachment, SyncError> {
        let tree = build_tree_async(root, &self.options).await?;
        publisher.publish(Arc::new(tree));

        let options = Arc::clone(&self.options);
        let task = spawn_poller(root.to_path_buf(), self.interval, publisher, move |root| {
            let options = Arc::clone(&options);
            async move { build_tree_async(&root, &options).await }
        });
        Ok(Attachment::new(root, task))
    }
}

/// Run `build` every `period` (first tick one period from now) and publish
/// results that differ from what is shown.
///
/// A failed build is logged and retried on the next tick. The loop ends on
/// its own once the publisher goes stale.
fn spawn_poller<F, Fut>(
    root: PathBuf,
    period: Duration,
    publisher: Publisher,
    build: F,
) -> JoinHandle<()>
where
    F: Fn(PathBuf) -> Fut + Send + 'static,
    Fut: Future<Output = Result<PathNode, TreeError>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !publisher.is_current() {
                break;
            }
            match build(root.clone()).await {
                Ok(tree) => {
                    if publisher.publish(Arc::new(tree)) {
                        tracing::debug!(root = %root.display(), "poll found changes");
                    }
                }
                Err(err) => tracing::warn!(root = %root.display(), %err, "poll build failed"),
            }
        }
    })
}
