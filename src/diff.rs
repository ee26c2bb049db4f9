use std::collections::HashSet;
use std::path::PathBuf;

use crate::node::PathNode;

/// Returns true if the two snapshots differ anywhere: in any node's id, path,
/// name or folder flag, or in the presence, count or order of children.
///
/// This is the only gate deciding whether a freshly built snapshot gets
/// published.
pub fn differs(a: &PathNode, b: &PathNode) -> bool {
    a != b
}

/// Paths that appear in only one of two snapshots.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TreeChanges {
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl TreeChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Summarise what was added and removed between `old` and `new`.
///
/// Reorders and folder/file flips are not reported here; use [`differs`] to
/// decide whether anything changed at all.
pub fn changes(old: &PathNode, new: &PathNode) -> TreeChanges {
    let before: HashSet<&PathBuf> = old.iter().map(|n| &n.path).collect();
    let after: HashSet<&PathBuf> = new.iter().map(|n| &n.path).collect();

    let mut added: Vec<PathBuf> = after.difference(&before).map(|p| (*p).clone()).collect();
    let mut removed: Vec<PathBuf> = before.difference(&after).map(|p| (*p).clone()).collect();
    added.sort();
    removed.sort();

    TreeChanges { added, removed }
}
