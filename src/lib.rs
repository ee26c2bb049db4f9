//! Live directory-tree snapshots.
//!
//! Build an immutable [`PathNode`] tree for a directory, then keep it current
//! with one of three strategies: pushed updates from a shared
//! [`WatchRegistry`] over the sync channel, or periodic blocking or
//! non-blocking rebuilds gated by [`differs`].

pub mod builder;
pub mod channel;
pub mod config;
pub mod diff;
pub mod error;
pub mod node;
pub mod registry;
pub mod strategy;
pub mod watcher;

pub use builder::{TreeOptions, build_tree, build_tree_async};
pub use config::TreeSyncConfig;
pub use diff::differs;
pub use error::{ChannelError, SyncError, TreeError, WatchError};
pub use node::PathNode;
pub use registry::{RegistryOptions, Subscription, WatchRegistry};
pub use strategy::{Strategy, StrategyKind, TreeSyncStrategy, TreeView};
