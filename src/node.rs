use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Compressed outputs show up in the tree but cannot be opened.
const UNOPENABLE_SUFFIXES: &[&str] = &[".gz"];

/// One filesystem entry in a tree snapshot.
///
/// A tree of `PathNode`s is a point-in-time snapshot: it is never mutated after
/// the builder returns it, and a change on disk produces a whole new tree.
/// Two snapshots are compared by deep structural equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathNode {
    /// Unique within a tree; always equal to `path`.
    pub id: PathBuf,
    /// Absolute path of the entry.
    pub path: PathBuf,
    /// Final path segment.
    pub name: String,
    /// True iff the entry was a directory when the snapshot was taken.
    pub is_folder: bool,
    /// Present iff `is_folder`. Order follows the directory listing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<PathNode>>,
}

impl PathNode {
    /// A leaf node for `path`. Also used as the placeholder for an entry that
    /// disappeared while the tree was being built.
    pub fn leaf(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            id: path.clone(),
            name: file_name(&path),
            path,
            is_folder: false,
            children: None,
        }
    }

    /// A folder node with the given children.
    pub fn folder(path: impl Into<PathBuf>, children: Vec<PathNode>) -> Self {
        let path = path.into();
        Self {
            id: path.clone(),
            name: file_name(&path),
            path,
            is_folder: true,
            children: Some(children),
        }
    }

    /// The synthetic root shown before the first real snapshot arrives:
    /// a folder whose children are not known yet.
    pub fn placeholder(root: impl Into<PathBuf>) -> Self {
        let mut node = Self::leaf(root);
        node.is_folder = true;
        node
    }

    /// Children of a folder, or an empty slice for files and placeholders.
    pub fn children(&self) -> &[PathNode] {
        self.children.as_deref().unwrap_or(&[])
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn len(&self) -> usize {
        1 + self.children().iter().map(PathNode::len).sum::<usize>()
    }

    /// Always false: a tree has at least its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Depth-first lookup of the node whose path is `path`.
    pub fn find(&self, path: &Path) -> Option<&PathNode> {
        if self.path == path {
            return Some(self);
        }
        if !path.starts_with(&self.path) {
            return None;
        }
        self.children().iter().find_map(|child| child.find(path))
    }

    /// Whether a consumer may open this entry: files only, and not compressed
    /// archives.
    pub fn is_openable(&self) -> bool {
        !self.is_folder
            && !UNOPENABLE_SUFFIXES
                .iter()
                .any(|suffix| self.name.ends_with(suffix))
    }

    /// Iterate over every node in the subtree, parents before children.
    pub fn iter(&self) -> impl Iterator<Item = &PathNode> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children().iter().rev());
            Some(node)
        })
    }
}

fn file_name(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        // `/` or a bare prefix has no final segment; show the path itself.
        None => path.to_string_lossy().into_owned(),
    }
}
