use std::path::PathBuf;

use thiserror::Error;

/// A tree build failed for a reason other than an entry vanishing mid-scan.
#[derive(Error, Debug)]
pub enum TreeError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("build task failed: {0}")]
    Join(String),
}

/// Errors from establishing or running a directory watch.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("cannot watch {path}: {source}")]
    Establish {
        path: PathBuf,
        source: notify::Error,
    },

    #[error("cannot watch {0}: path does not exist")]
    PathNotFound(PathBuf),

    #[error("initial build of {path} failed: {source}")]
    InitialBuild {
        path: PathBuf,
        source: TreeError,
    },
}

/// Errors surfaced by the sync channel boundary.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("{0} is not being watched by this connection")]
    NotWatched(PathBuf),

    #[error("sync channel closed")]
    Closed,
}

/// Errors from attaching a tree sync strategy to a root.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Build(#[from] TreeError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("strategy is already attached to a root")]
    AlreadyAttached,
}
