//! History entry model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::note::NoteId;
use super::version::VersionId;

/// Action recorded by a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    NoteCreated,
    NoteDeleted,
    OfflineEdit,
    SyncComplete,
    SyncFailed,
    ConflictDetected,
    ConflictResolved,
}

impl HistoryAction {
    /// Database column representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoteCreated => "note_created",
            Self::NoteDeleted => "note_deleted",
            Self::OfflineEdit => "offline_edit",
            Self::SyncComplete => "sync_complete",
            Self::SyncFailed => "sync_failed",
            Self::ConflictDetected => "conflict_detected",
            Self::ConflictResolved => "conflict_resolved",
        }
    }
}

impl FromStr for HistoryAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "note_created" => Ok(Self::NoteCreated),
            "note_deleted" => Ok(Self::NoteDeleted),
            "offline_edit" => Ok(Self::OfflineEdit),
            "sync_complete" => Ok(Self::SyncComplete),
            "sync_failed" => Ok(Self::SyncFailed),
            "conflict_detected" => Ok(Self::ConflictDetected),
            "conflict_resolved" => Ok(Self::ConflictResolved),
            other => Err(format!("unknown history action: {other}")),
        }
    }
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable audit record of an action taken on a note/version.
///
/// Append-only; ordered by timestamp with insertion order breaking ties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Insertion-ordered row identifier
    pub id: i64,
    /// Note the action concerns
    pub note_id: NoteId,
    /// Version the action concerns, if any
    pub version_id: Option<VersionId>,
    /// User who performed the action
    pub user_id: String,
    /// Action type
    pub action: HistoryAction,
    /// Free-text description
    pub description: String,
    /// Structured metadata
    pub metadata: serde_json::Value,
    /// Timestamp (Unix ms)
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_round_trip() {
        for action in [
            HistoryAction::NoteCreated,
            HistoryAction::NoteDeleted,
            HistoryAction::OfflineEdit,
            HistoryAction::SyncComplete,
            HistoryAction::SyncFailed,
            HistoryAction::ConflictDetected,
            HistoryAction::ConflictResolved,
        ] {
            let parsed: HistoryAction = action.as_str().parse().unwrap();
            assert_eq!(action, parsed);
        }
    }
}
