use std::path::PathBuf;

use notify::event::ModifyKind;

/// What happened to a path, as reported to watcher listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Create,
    Modify,
    Remove,
    Rename,
    /// Platform-specific or unclassified change.
    Other,
}

impl EventKind {
    /// Classify a notify event kind. Access events never change the tree and
    /// are dropped.
    pub fn from_notify(kind: notify::EventKind) -> Option<Self> {
        match kind {
            notify::EventKind::Access(_) => None,
            notify::EventKind::Create(_) => Some(Self::Create),
            notify::EventKind::Modify(ModifyKind::Name(_)) => Some(Self::Rename),
            notify::EventKind::Modify(_) => Some(Self::Modify),
            notify::EventKind::Remove(_) => Some(Self::Remove),
            notify::EventKind::Any | notify::EventKind::Other => Some(Self::Other),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Remove => "remove",
            Self::Rename => "rename",
            Self::Other => "other",
        }
    }
}

/// A single undebounced change notification for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: EventKind,
    pub path: PathBuf,
}

impl RawEvent {
    pub fn new(kind: EventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}
