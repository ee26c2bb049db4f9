use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{Attachment, Publisher, TreeSyncStrategy};
use crate::channel::{ChannelClient, Connection, PushStream};
use crate::error::SyncError;

/// Receives snapshots pushed over the sync channel.
///
/// Attaching sends `watch-dir` and waits for the ack; the initial tree has
/// been pushed by then. Detaching stops the forwarding task and sends
/// `watch-dir-clear`.
pub struct PushStrategy {
    client: ChannelClient,
    pushes: Arc<Mutex<PushStream>>,
}

impl PushStrategy {
    pub fn new(connection: Connection) -> Self {
        let (client, pushes) = connection.split();
        Self {
            client,
            pushes: Arc::new(Mutex::new(pushes)),
        }
    }
}

impl TreeSyncStrategy for PushStrategy {
    /// A push strategy follows one root at a time; attaching again before
    /// detaching fails with [`SyncError::AlreadyAttached`].
    async fn attach(&self, root: &Path, publisher: Publisher) -> Result<Attachment, SyncError> {
        let mut pushes = Arc::clone(&self.pushes)
            .try_lock_owned()
            .map_err(|_| SyncError::AlreadyAttached)?;
        self.client.watch_dir(root).await?;

        // Show the initial tree before attach returns.
        while let Some(update) = pushes.try_next() {
            if update.path == root {
                publisher.publish(update.tree);
            }
        }

        let watched = root.to_path_buf();
        let task = tokio::spawn(async move {
            while let Some(update) = pushes.next().await {
                // Pushes for a root this view has moved away from may still
                // be queued.
                if update.path != watched {
                    continue;
                }
                publisher.publish(update.tree);
            }
        });
        Ok(Attachment::new(root, task))
    }

    async fn detach(&self, mut attachment: Attachment) {
        attachment.stop().await;
        if let Err(err) = self.client.watch_dir_clear(attachment.root()).await {
            tracing::warn!(root = %attachment.root().display(), %err, "watch-dir-clear failed");
        }
    }
}
