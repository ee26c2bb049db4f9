use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use futures::future::{BoxFuture, FutureExt, try_join_all};

use crate::error::TreeError;
use crate::node::PathNode;

/// Options shared by the blocking and async builders.
#[derive(Debug, Clone, Default)]
pub struct TreeOptions {
    /// Entries whose name or full path matches any of these globs are left out
    /// of the tree, together with everything below them.
    pub exclude: Vec<glob::Pattern>,
}

impl TreeOptions {
    /// Compile exclusion globs, skipping (and logging) any that are invalid.
    pub fn with_exclude<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let exclude = patterns
            .into_iter()
            .filter_map(|p| match glob::Pattern::new(p.as_ref()) {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    tracing::warn!(pattern = p.as_ref(), %err, "ignoring invalid exclude pattern");
                    None
                }
            })
            .collect();
        Self { exclude }
    }

    /// Returns true if `path` matches an exclusion, by final segment or by
    /// full path.
    pub fn is_excluded(&self, path: &Path) -> bool {
        if self.exclude.is_empty() {
            return false;
        }
        let full = path.to_string_lossy();
        let name = path.file_name().map(|n| n.to_string_lossy());
        self.exclude.iter().any(|pattern| {
            pattern.matches(&full) || name.as_deref().is_some_and(|n| pattern.matches(n))
        })
    }

    /// Returns true if any component of `path` below `root` is excluded.
    /// Used to drop watch events for paths the tree never shows.
    pub fn is_excluded_below(&self, root: &Path, path: &Path) -> bool {
        if self.exclude.is_empty() {
            return false;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            return false;
        };
        let mut current = root.to_path_buf();
        relative.components().any(|component| {
            current.push(component);
            self.is_excluded(&current)
        })
    }
}

/// Build a snapshot of `root` using blocking filesystem calls.
///
/// An entry that vanishes between being listed and being inspected becomes a
/// leaf placeholder; every other I/O error aborts the build.
pub fn build_tree(root: &Path, options: &TreeOptions) -> Result<PathNode, TreeError> {
    let metadata = match std::fs::metadata(root) {
        Ok(m) => m,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(PathNode::leaf(root)),
        Err(source) => return Err(io_error(root, source)),
    };
    if !metadata.is_dir() {
        return Ok(PathNode::leaf(root));
    }

    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(PathNode::leaf(root)),
        Err(source) => return Err(io_error(root, source)),
    };

    let mut children = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(source) => return Err(io_error(root, source)),
        };
        let path = entry.path();
        if options.is_excluded(&path) {
            continue;
        }
        children.push(build_tree(&path, options)?);
    }

    Ok(PathNode::folder(root, children))
}

/// Build a snapshot of `root` without blocking the runtime.
///
/// Children of each directory are built concurrently; the result is the same
/// shape `build_tree` produces, returned only once the whole tree is done.
pub async fn build_tree_async(root: &Path, options: &TreeOptions) -> Result<PathNode, TreeError> {
    build_node(root.to_path_buf(), options).await
}

fn build_node(path: PathBuf, options: &TreeOptions) -> BoxFuture<'_, Result<PathNode, TreeError>> {
    async move {
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(PathNode::leaf(path)),
            Err(source) => return Err(io_error(&path, source)),
        };
        if !metadata.is_dir() {
            return Ok(PathNode::leaf(path));
        }

        let mut dir = match tokio::fs::read_dir(&path).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(PathNode::leaf(path)),
            Err(source) => return Err(io_error(&path, source)),
        };

        let mut entries = Vec::new();
        loop {
            match dir.next_entry().await {
                Ok(Some(entry)) => {
                    let child = entry.path();
                    if !options.is_excluded(&child) {
                        entries.push(child);
                    }
                }
                Ok(None) => break,
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(source) => return Err(io_error(&path, source)),
            }
        }

        let children = try_join_all(entries.into_iter().map(|child| build_node(child, options))).await?;
        Ok(PathNode::folder(path, children))
    }
    .boxed()
}

fn io_error(path: &Path, source: std::io::Error) -> TreeError {
    TreeError::Io {
        path: path.to_path_buf(),
        source,
    }
}
