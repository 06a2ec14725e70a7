//! Conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::note::NoteId;
use super::version::VersionId;

/// A unique identifier for a conflict, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(Uuid);

impl ConflictId {
    /// Create a new unique conflict ID using UUID v7
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

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle state of a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Pending,
    Resolved,
}

impl ConflictStatus {
    /// Database column representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
        }
    }
}

impl FromStr for ConflictStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            other => Err(format!("unknown conflict status: {other}")),
        }
    }
}

/// Strategy applied when resolving a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionType {
    KeepLocal,
    KeepRemote,
    ManualMerge,
    CreateSeparateVersions,
}

impl ResolutionType {
    /// Database column representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::KeepLocal => "keep_local",
            Self::KeepRemote => "keep_remote",
            Self::ManualMerge => "manual_merge",
            Self::CreateSeparateVersions => "create_separate_versions",
        }
    }
}

impl FromStr for ResolutionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep_local" => Ok(Self::KeepLocal),
            "keep_remote" => Ok(Self::KeepRemote),
            "manual_merge" => Ok(Self::ManualMerge),
            "create_separate_versions" => Ok(Self::CreateSeparateVersions),
            other => Err(format!("unknown resolution type: {other}")),
        }
    }
}

/// Heuristic classification of how far two conflicting versions diverge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictComplexity {
    /// Contents match; only the titles differ
    TitleOnly,
    /// Most lines are shared; a localized change on each side
    Localized,
    /// Little shared content; one side rewrote the document
    Rewrite,
}

/// A pair of versions that diverged concurrently from the same ancestor.
///
/// Created by the detector; resolved exactly once by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Unique identifier
    pub id: ConflictId,
    /// Note the versions belong to
    pub note_id: NoteId,
    /// The diverged pending version (the client's edit)
    pub local_version_id: VersionId,
    /// The note's current version at detection time
    pub remote_version_id: VersionId,
    /// Detection timestamp (Unix ms)
    pub detected_at: i64,
    /// Lifecycle state
    pub status: ConflictStatus,
    /// Strategy applied, once resolved
    pub resolution: Option<ResolutionType>,
    /// Resolution timestamp (Unix ms), once resolved
    pub resolved_at: Option<i64>,
    /// User who resolved the conflict, once resolved
    pub resolved_by: Option<String>,
}

impl Conflict {
    /// Create a pending conflict between a local and a remote version
    #[must_use]
    pub fn new(note_id: NoteId, local_version_id: VersionId, remote_version_id: VersionId) -> Self {
        Self {
            id: ConflictId::new(),
            note_id,
            local_version_id,
            remote_version_id,
            detected_at: chrono::Utc::now().timestamp_millis(),
            status: ConflictStatus::Pending,
            resolution: None,
            resolved_at: None,
            resolved_by: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_conflict_is_pending() {
        let conflict = Conflict::new(NoteId::new(), VersionId::new(), VersionId::new());
        assert_eq!(conflict.status, ConflictStatus::Pending);
        assert!(conflict.resolution.is_none());
        assert!(conflict.resolved_at.is_none());
    }

    #[test]
    fn test_resolution_type_round_trip() {
        for resolution in [
            ResolutionType::KeepLocal,
            ResolutionType::KeepRemote,
            ResolutionType::ManualMerge,
            ResolutionType::CreateSeparateVersions,
        ] {
            let parsed: ResolutionType = resolution.as_str().parse().unwrap();
            assert_eq!(resolution, parsed);
        }
        assert!("pick_newest".parse::<ResolutionType>().is_err());
    }
}
