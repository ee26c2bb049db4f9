//! The boundary between the side that owns watches and the side that shows
//! trees.
//!
//! A [`ChannelServer`] task owns the [`WatchRegistry`] subscriptions on behalf
//! of its connections. Each [`Connection`] can ask to start (`watch-dir`) or
//! stop (`watch-dir-clear`) watching a root and receives `watch-dir-update`
//! pushes for every root it watches. [`stdio`] carries the same protocol over
//! newline-delimited JSON.

pub mod stdio;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{ChannelError, WatchError};
use crate::node::PathNode;
use crate::registry::{Subscription, SubscriptionGuard, WatchRegistry};

/// Boundary names used on the wire.
pub const WATCH_DIR: &str = "watch-dir";
pub const WATCH_DIR_UPDATE: &str = "watch-dir-update";
pub const WATCH_DIR_CLEAR: &str = "watch-dir-clear";

pub type ConnectionId = u64;

/// A snapshot pushed to a connection for one of its watched roots.
#[derive(Debug, Clone)]
pub struct TreeUpdate {
    pub path: PathBuf,
    pub tree: Arc<PathNode>,
}

type Reply = oneshot::Sender<Result<(), ChannelError>>;

enum Request {
    Connect {
        connection: ConnectionId,
        push: mpsc::UnboundedSender<TreeUpdate>,
    },
    Disconnect {
        connection: ConnectionId,
    },
    WatchDir {
        connection: ConnectionId,
        path: PathBuf,
        reply: Reply,
    },
    WatchDirClear {
        connection: ConnectionId,
        path: PathBuf,
        reply: Reply,
    },
    /// Sent by the server to itself when a subscribe it started completes.
    Subscribed {
        connection: ConnectionId,
        path: PathBuf,
        result: Result<Subscription, WatchError>,
        reply: Reply,
    },
}

struct Watch {
    _guard: SubscriptionGuard,
    forward: JoinHandle<()>,
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.forward.abort();
    }
}

struct ConnectionState {
    push: mpsc::UnboundedSender<TreeUpdate>,
    watches: HashMap<PathBuf, Watch>,
}

/// Owns subscriptions on behalf of connected consumers.
pub struct ChannelServer {
    registry: WatchRegistry,
    inbox: mpsc::UnboundedReceiver<Request>,
    outbox: mpsc::UnboundedSender<Request>,
    connections: HashMap<ConnectionId, ConnectionState>,
}

impl ChannelServer {
    /// Start the server task and return a handle for opening connections.
    pub fn spawn(registry: WatchRegistry) -> ChannelHandle {
        let (outbox, inbox) = mpsc::unbounded_channel();
        let server = Self {
            registry,
            inbox,
            outbox: outbox.clone(),
            connections: HashMap::new(),
        };
        tokio::spawn(server.run());
        ChannelHandle {
            requests: outbox,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    async fn run(mut self) {
        while let Some(request) = self.inbox.recv().await {
            self.handle(request);
        }
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Connect { connection, push } => {
                tracing::debug!(connection, "connected");
                self.connections.insert(
                    connection,
                    ConnectionState {
                        push,
                        watches: HashMap::new(),
                    },
                );
            }
            Request::Disconnect { connection } => {
                if let Some(state) = self.connections.remove(&connection) {
                    tracing::debug!(connection, watches = state.watches.len(), "disconnected");
                }
            }
            Request::WatchDir {
                connection,
                path,
                reply,
            } => self.watch_dir(connection, path, reply),
            Request::WatchDirClear {
                connection,
                path,
                reply,
            } => {
                let removed = self
                    .connections
                    .get_mut(&connection)
                    .and_then(|state| state.watches.remove(&path));
                let _ = reply.send(match removed {
                    Some(_) => Ok(()),
                    None => Err(ChannelError::NotWatched(path)),
                });
            }
            Request::Subscribed {
                connection,
                path,
                result,
                reply,
            } => self.subscribed(connection, path, result, reply),
        }
    }

    fn watch_dir(&mut self, connection: ConnectionId, path: PathBuf, reply: Reply) {
        let Some(state) = self.connections.get(&connection) else {
            let _ = reply.send(Err(ChannelError::Closed));
            return;
        };
        if state.watches.contains_key(&path) {
            let _ = reply.send(Ok(()));
            return;
        }

        // The initial build can be slow; run it off the server loop and come
        // back with the result.
        let registry = self.registry.clone();
        let outbox = self.outbox.clone();
        tokio::spawn(async move {
            let result = registry.subscribe(path.clone()).await;
            let _ = outbox.send(Request::Subscribed {
                connection,
                path,
                result,
                reply,
            });
        });
    }

    fn subscribed(
        &mut self,
        connection: ConnectionId,
        path: PathBuf,
        result: Result<Subscription, WatchError>,
        reply: Reply,
    ) {
        let subscription = match result {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(connection, path = %path.display(), %err, "watch-dir failed");
                let _ = reply.send(Err(err.into()));
                return;
            }
        };
        // A disconnected consumer or a duplicate request drops the
        // subscription here, which unsubscribes it.
        let Some(state) = self.connections.get_mut(&connection) else {
            let _ = reply.send(Err(ChannelError::Closed));
            return;
        };
        if state.watches.contains_key(&path) {
            let _ = reply.send(Ok(()));
            return;
        }

        tracing::debug!(
            connection,
            subscription = subscription.id(),
            root = %subscription.root().display(),
            "watch-dir subscribed"
        );
        let (guard, mut updates) = subscription.into_parts();
        // Push the starting tree before acknowledging.
        if let Ok(tree) = updates.try_recv() {
            let _ = state.push.send(TreeUpdate {
                path: path.clone(),
                tree,
            });
        }
        let push = state.push.clone();
        let root = path.clone();
        let forward = tokio::spawn(async move {
            while let Some(tree) = updates.recv().await {
                let update = TreeUpdate {
                    path: root.clone(),
                    tree,
                };
                if push.send(update).is_err() {
                    break;
                }
            }
        });

        state.watches.insert(
            path,
            Watch {
                _guard: guard,
                forward,
            },
        );
        let _ = reply.send(Ok(()));
    }
}

/// Cloneable handle to a running [`ChannelServer`].
#[derive(Clone)]
pub struct ChannelHandle {
    requests: mpsc::UnboundedSender<Request>,
    next_id: Arc<AtomicU64>,
}

impl ChannelHandle {
    /// Open a new connection with its own push stream.
    pub fn connect(&self) -> Connection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (push, updates) = mpsc::unbounded_channel();
        let _ = self.requests.send(Request::Connect {
            connection: id,
            push,
        });
        let token = Arc::new(ConnectionToken {
            id,
            requests: self.requests.clone(),
        });
        Connection {
            client: ChannelClient { token },
            updates: PushStream { updates },
        }
    }
}

/// Disconnects when the last client half of a connection goes away.
struct ConnectionToken {
    id: ConnectionId,
    requests: mpsc::UnboundedSender<Request>,
}

impl Drop for ConnectionToken {
    fn drop(&mut self) {
        let _ = self
            .requests
            .send(Request::Disconnect { connection: self.id });
    }
}

/// Request half of a connection. Cloneable; all clones share one connection.
#[derive(Clone)]
pub struct ChannelClient {
    token: Arc<ConnectionToken>,
}

impl ChannelClient {
    pub fn id(&self) -> ConnectionId {
        self.token.id
    }

    /// Start watching `path`. Resolves once the first snapshot has been pushed
    /// to this connection, or with the reason the watch could not be set up.
    pub async fn watch_dir(&self, path: &Path) -> Result<(), ChannelError> {
        self.call(|reply| Request::WatchDir {
            connection: self.token.id,
            path: path.to_path_buf(),
            reply,
        })
        .await
    }

    /// Stop watching `path`. Errors with [`ChannelError::NotWatched`] if this
    /// connection was not watching it.
    pub async fn watch_dir_clear(&self, path: &Path) -> Result<(), ChannelError> {
        self.call(|reply| Request::WatchDirClear {
            connection: self.token.id,
            path: path.to_path_buf(),
            reply,
        })
        .await
    }

    async fn call(&self, request: impl FnOnce(Reply) -> Request) -> Result<(), ChannelError> {
        let (reply, response) = oneshot::channel();
        self.token
            .requests
            .send(request(reply))
            .map_err(|_| ChannelError::Closed)?;
        response.await.map_err(|_| ChannelError::Closed)?
    }
}

/// Push half of a connection: `watch-dir-update` messages for every root the
/// connection watches.
pub struct PushStream {
    updates: mpsc::UnboundedReceiver<TreeUpdate>,
}

impl PushStream {
    pub async fn next(&mut self) -> Option<TreeUpdate> {
        self.updates.recv().await
    }

    pub fn try_next(&mut self) -> Option<TreeUpdate> {
        self.updates.try_recv().ok()
    }
}

/// One consumer's connection to the channel server.
pub struct Connection {
    client: ChannelClient,
    updates: PushStream,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.client.id()
    }

    pub async fn watch_dir(&self, path: &Path) -> Result<(), ChannelError> {
        self.client.watch_dir(path).await
    }

    pub async fn watch_dir_clear(&self, path: &Path) -> Result<(), ChannelError> {
        self.client.watch_dir_clear(path).await
    }

    pub async fn next_update(&mut self) -> Option<TreeUpdate> {
        self.updates.next().await
    }

    pub fn try_next_update(&mut self) -> Option<TreeUpdate> {
        self.updates.try_next()
    }

    pub fn split(self) -> (ChannelClient, PushStream) {
        (self.client, self.updates)
    }
}
