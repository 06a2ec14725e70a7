//! Presence session models
//!
//! Editing and device sessions are transient presence state, not durable
//! note data. The in-memory registries built over them are rebuilt from
//! these rows after a restart.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::note::NoteId;

/// Whether an editing session is live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Inactive,
}

impl SessionStatus {
    /// Database column representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// A user actively editing a note; one per (note, user) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditingSession {
    pub note_id: NoteId,
    pub user_id: String,
    pub device_id: String,
    pub status: SessionStatus,
    /// Session start timestamp (Unix ms)
    pub started_at: i64,
    /// Last activity timestamp (Unix ms); drives the inactivity timeout
    pub last_activity_at: i64,
}

impl EditingSession {
    /// Start an active session for `user_id` on `note_id`
    #[must_use]
    pub fn start(note_id: NoteId, user_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            note_id,
            user_id: user_id.into(),
            device_id: device_id.into(),
            status: SessionStatus::Active,
            started_at: now,
            last_activity_at: now,
        }
    }
}

/// A live transport endpoint for a (user, device) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSession {
    pub device_id: String,
    pub user_id: String,
    /// Connection timestamp (Unix ms)
    pub connected_at: i64,
    /// Last activity timestamp (Unix ms); drives the inactivity sweep
    pub last_seen_at: i64,
}

impl DeviceSession {
    /// Register a freshly connected device
    #[must_use]
    pub fn connect(device_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            device_id: device_id.into(),
            user_id: user_id.into(),
            connected_at: now,
            last_seen_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_editing_session_starts_active() {
        let session = EditingSession::start(NoteId::new(), "user-1", "device-1");
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.started_at, session.last_activity_at);
    }

    #[test]
    fn test_session_status_round_trip() {
        for status in [SessionStatus::Active, SessionStatus::Inactive] {
            let parsed: SessionStatus = status.as_str().parse().unwrap();
            assert_eq!(status, parsed);
        }
    }
}
