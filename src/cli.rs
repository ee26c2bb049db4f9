use std::path::PathBuf;

use clap::{Parser, Subcommand};

use tree_sync::StrategyKind;

/// Live directory trees for project sidebars.
///
/// tree-sync builds a snapshot of a directory as a tree of entries and keeps
/// it current, either by watching the filesystem or by polling it.
#[derive(Parser, Debug)]
#[command(
    name = "tree-sync",
    version,
    about,
    long_about = None,
    propagate_version = true,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a snapshot of a directory once and print it.
    Tree {
        /// Directory to snapshot.
        path: PathBuf,

        /// Use the concurrent non-blocking builder.
        #[arg(long = "async")]
        async_build: bool,

        /// Output the tree as JSON instead of an indented listing.
        #[arg(long)]
        json: bool,
    },

    /// Follow a directory and print every new snapshot until interrupted.
    ///
    /// The strategy defaults to the one configured in `tree-sync.toml`, or push.
    Watch {
        /// Directory to follow.
        path: PathBuf,

        /// How to keep the tree current.
        #[arg(long, value_enum)]
        strategy: Option<StrategyKind>,

        /// Output each snapshot as one line of JSON.
        #[arg(long)]
        json: bool,
    },

    /// Serve the sync channel as newline-delimited JSON on stdin/stdout.
    ///
    /// Accepts `watch-dir` and `watch-dir-clear` requests and pushes
    /// `watch-dir-update` messages.
    Serve {
        /// Directory to read `tree-sync.toml` from (default: current directory).
        #[arg(long)]
        config_dir: Option<PathBuf>,
    },
}
