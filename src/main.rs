mod cli;
mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use tree_sync::channel::{ChannelServer, stdio};
use tree_sync::strategy::{AsyncPollStrategy, PushStrategy, SyncPollStrategy};
use tree_sync::{
    Strategy, StrategyKind, TreeSyncConfig, TreeView, WatchRegistry, build_tree, build_tree_async,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tree_sync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Tree {
            path,
            async_build,
            json,
        } => {
            let root = resolve_root(&path)?;
            let options = TreeSyncConfig::load(&root).tree_options();
            let tree = if async_build {
                build_tree_async(&root, &options).await?
            } else {
                build_tree(&root, &options)?
            };
            output::print_tree(&tree, json, false);
        }
        Commands::Watch {
            path,
            strategy,
            json,
        } => {
            let root = resolve_root(&path)?;
            watch(root, strategy, json).await?;
        }
        Commands::Serve { config_dir } => {
            let dir = match config_dir {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            let config = TreeSyncConfig::load(&dir);
            let registry = WatchRegistry::with_notify(config.registry_options());
            let handle = ChannelServer::spawn(registry);
            stdio::serve(handle, tokio::io::stdin(), tokio::io::stdout()).await?;
        }
    }

    Ok(())
}

/// Make `path` absolute and check that it exists.
fn resolve_root(path: &Path) -> Result<PathBuf> {
    let root = std::path::absolute(path)?;
    if !root.exists() {
        bail!("{} does not exist", root.display());
    }
    Ok(root)
}

async fn watch(root: PathBuf, kind: Option<StrategyKind>, json: bool) -> Result<()> {
    let config = TreeSyncConfig::load(&root);
    let strategy = match kind.unwrap_or(config.strategy) {
        StrategyKind::Push => {
            let registry = WatchRegistry::with_notify(config.registry_options());
            let handle = ChannelServer::spawn(registry);
            Strategy::Push(PushStrategy::new(handle.connect()))
        }
        StrategyKind::SyncPoll => Strategy::SyncPoll(SyncPollStrategy::new(
            config.sync_poll_interval(),
            config.tree_options(),
        )),
        StrategyKind::AsyncPoll => Strategy::AsyncPoll(AsyncPollStrategy::new(
            config.async_poll_interval(),
            config.tree_options(),
        )),
    };
    tracing::info!(root = %root.display(), strategy = ?strategy.kind(), "following");

    let view = TreeView::open(strategy, &root).await?;
    let mut updates = view.updates();
    loop {
        let tree = Arc::clone(&updates.borrow_and_update());
        output::print_tree(&tree, json, true);

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    view.close().await;
    Ok(())
}
