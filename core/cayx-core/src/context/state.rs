//! Lifecycle state of a tracked object.

use std::fmt;

/// `TRANSIENT → NEW → {MODIFIED ⇄ COMMITTED} → DELETED → TRANSIENT`,
/// `HOLLOW → COMMITTED` on first fault resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistenceState {
    /// Not registered with any context
    Transient,
    /// Registered, not saved yet
    New,
    /// In sync with the database
    Committed,
    /// Committed object with uncommitted changes
    Modified,
    /// Identity known, attributes not loaded
    Hollow,
    /// Scheduled for deletion on the next commit
    Deleted,
}

impl PersistenceState {
    /// Whether the object takes part in the next commit.
    pub fn is_dirty(self) -> bool {
        matches!(
            self,
            PersistenceState::New | PersistenceState::Modified | PersistenceState::Deleted
        )
    }
}

impl fmt::Display for PersistenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PersistenceState::Transient => "transient",
            PersistenceState::New => "new",
            PersistenceState::Committed => "committed",
            PersistenceState::Modified => "modified",
            PersistenceState::Hollow => "hollow",
            PersistenceState::Deleted => "deleted",
        };
        f.write_str(s)
    }
}
