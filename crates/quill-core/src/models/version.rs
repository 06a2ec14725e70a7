//! Note version model

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::note::NoteId;

/// A unique identifier for a note version, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionId(Uuid);

impl VersionId {
    /// Create a new unique version ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for VersionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VersionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Synchronization state of a version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSyncStatus {
    /// Created locally, not yet confirmed against the store
    Pending,
    /// Confirmed; eligible to become the note's current version
    Synced,
    /// Diverged from the current version; blocked until resolved
    Conflict,
}

impl VersionSyncStatus {
    /// Database column representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Conflict => "conflict",
        }
    }
}

impl FromStr for VersionSyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "conflict" => Ok(Self::Conflict),
            other => Err(format!("unknown version sync status: {other}")),
        }
    }
}

/// An immutable snapshot of a note's title/content at one point in time.
///
/// New edits create new versions, never mutate existing ones. Only the
/// sync status transitions, and `superseded_by` is written once when a
/// manual merge replaces this version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteVersion {
    /// Unique identifier
    pub id: VersionId,
    /// Note this version belongs to
    pub note_id: NoteId,
    /// User who made the edit
    pub author_id: String,
    /// Device the edit originated from
    pub device_id: String,
    /// Title snapshot
    pub title: String,
    /// Content snapshot
    pub content: String,
    /// SHA-256 of the content, hex-encoded
    pub content_hash: String,
    /// The note's current version when this one was created; lineage root
    /// for conflict detection. `None` for a note's first version.
    pub parent_version_id: Option<VersionId>,
    /// Synchronization state
    pub sync_status: VersionSyncStatus,
    /// Merged version that replaced this one, if any
    pub superseded_by: Option<VersionId>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
}

impl NoteVersion {
    /// Create a new pending version of `note_id`
    #[must_use]
    pub fn new(
        note_id: NoteId,
        author_id: impl Into<String>,
        device_id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        parent_version_id: Option<VersionId>,
    ) -> Self {
        let content = content.into();
        Self {
            id: VersionId::new(),
            note_id,
            author_id: author_id.into(),
            device_id: device_id.into(),
            title: title.into(),
            content_hash: content_hash(&content),
            content,
            parent_version_id,
            sync_status: VersionSyncStatus::Pending,
            superseded_by: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Compute the hex-encoded SHA-256 hash of version content
#[must_use]
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash("hello"), content_hash("hello"));
        assert_ne!(content_hash("hello"), content_hash("world"));
        assert_eq!(content_hash("").len(), 64);
    }

    #[test]
    fn test_new_version_is_pending() {
        let note_id = NoteId::new();
        let version = NoteVersion::new(note_id, "user-1", "device-1", "Draft", "v1", None);
        assert_eq!(version.sync_status, VersionSyncStatus::Pending);
        assert_eq!(version.note_id, note_id);
        assert_eq!(version.content_hash, content_hash("v1"));
        assert!(version.parent_version_id.is_none());
        assert!(version.superseded_by.is_none());
    }

    #[test]
    fn test_sync_status_round_trip() {
        for status in [
            VersionSyncStatus::Pending,
            VersionSyncStatus::Synced,
            VersionSyncStatus::Conflict,
        ] {
            let parsed: VersionSyncStatus = status.as_str().parse().unwrap();
            assert_eq!(status, parsed);
        }
    }
}
