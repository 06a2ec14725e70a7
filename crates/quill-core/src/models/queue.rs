//! Sync queue item model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::note::NoteId;
use super::version::VersionId;

/// A unique identifier for a sync queue item, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueItemId(Uuid);

impl QueueItemId {
    /// Create a new unique queue item ID using UUID v7
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

impl Default for QueueItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Operation carried by a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOperation {
    Edit,
    Create,
    Delete,
}

impl QueueOperation {
    /// Database column representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Edit => "edit",
            Self::Create => "create",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for QueueOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "edit" => Ok(Self::Edit),
            "create" => Ok(Self::Create),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown queue operation: {other}")),
        }
    }
}

/// Lifecycle state of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    /// Awaiting processing (or a scheduled retry)
    Pending,
    /// Confirmed against the store
    Synced,
    /// Halted; a conflict record awaits resolution
    Conflict,
    /// Absorbed as a duplicate of an earlier create
    Duplicate,
    /// Retry budget exhausted; needs user attention
    Failed,
}

impl QueueItemStatus {
    /// Database column representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Conflict => "conflict",
            Self::Duplicate => "duplicate",
            Self::Failed => "failed",
        }
    }

    /// Terminal states are never retried or reprocessed
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Synced | Self::Duplicate | Self::Failed)
    }
}

impl FromStr for QueueItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "conflict" => Ok(Self::Conflict),
            "duplicate" => Ok(Self::Duplicate),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown queue item status: {other}")),
        }
    }
}

/// Payload for a queued `create` operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePayload {
    pub title: String,
    pub content: String,
}

/// A pending operation awaiting confirmation against the durable store.
///
/// Created when an edit happens while offline or is explicitly force-synced;
/// terminal items are purged once past the retention window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    /// Unique identifier
    pub id: QueueItemId,
    /// Operation type
    pub operation: QueueOperation,
    /// Note the operation targets
    pub note_id: NoteId,
    /// Version created by the edit, if any
    pub version_id: Option<VersionId>,
    /// User who queued the operation
    pub user_id: String,
    /// Device the operation originated from
    pub device_id: String,
    /// Structured payload for `create` operations
    pub payload: Option<CreatePayload>,
    /// Enqueue timestamp (Unix ms)
    pub enqueued_at: i64,
    /// Attempts made so far
    pub attempts: u32,
    /// Attempts allowed before the item fails terminally
    pub max_attempts: u32,
    /// Earliest time the next attempt may run (Unix ms); backoff scheduling
    pub next_attempt_at: i64,
    /// Lifecycle state
    pub status: QueueItemStatus,
    /// Most recent error, surfaced to "needs attention" UIs
    pub last_error: Option<String>,
}

impl SyncQueueItem {
    /// Create a pending item for the given operation
    #[must_use]
    pub fn new(
        operation: QueueOperation,
        note_id: NoteId,
        version_id: Option<VersionId>,
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        max_attempts: u32,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: QueueItemId::new(),
            operation,
            note_id,
            version_id,
            user_id: user_id.into(),
            device_id: device_id.into(),
            payload: None,
            enqueued_at: now,
            attempts: 0,
            max_attempts,
            next_attempt_at: now,
            status: QueueItemStatus::Pending,
            last_error: None,
        }
    }

    /// Attach a `create` payload
    #[must_use]
    pub fn with_payload(mut self, payload: CreatePayload) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_is_pending() {
        let item = SyncQueueItem::new(QueueOperation::Edit, NoteId::new(), None, "u", "d", 3);
        assert_eq!(item.status, QueueItemStatus::Pending);
        assert_eq!(item.attempts, 0);
        assert_eq!(item.max_attempts, 3);
        assert_eq!(item.next_attempt_at, item.enqueued_at);
    }

    #[test]
    fn test_terminal_states() {
        assert!(QueueItemStatus::Synced.is_terminal());
        assert!(QueueItemStatus::Duplicate.is_terminal());
        assert!(QueueItemStatus::Failed.is_terminal());
        assert!(!QueueItemStatus::Pending.is_terminal());
        assert!(!QueueItemStatus::Conflict.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            QueueItemStatus::Pending,
            QueueItemStatus::Synced,
            QueueItemStatus::Conflict,
            QueueItemStatus::Duplicate,
            QueueItemStatus::Failed,
        ] {
            let parsed: QueueItemStatus = status.as_str().parse().unwrap();
            assert_eq!(status, parsed);
        }
    }
}
