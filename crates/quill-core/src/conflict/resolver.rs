//! Conflict resolver.
//!
//! Applies a chosen resolution strategy to a detected conflict. Each
//! conflict resolves exactly once (`pending → resolved`); changing the
//! outcome afterwards requires a new edit. Resolution is the only path
//! besides sync promotion allowed to move a note's current pointer, and it
//! runs as one transaction: conflict close, promotion, and the history
//! write land together or not at all.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::db::{
    ConflictRepository, Database, HistoryRepository, LibSqlConflictRepository,
    LibSqlHistoryRepository, LibSqlNoteRepository, LibSqlVersionRepository, NoteRepository,
    VersionRepository,
};
use crate::error::{Error, Result};
use crate::events::{EventBus, NoteEvent};
use crate::models::{
    ConflictComplexity, ConflictId, HistoryAction, Note, NoteId, NoteVersion, ResolutionType,
    VersionId, VersionSyncStatus,
};

use super::detector::classify;

/// Merged title/content supplied by the caller for `ManualMerge`, or the
/// fork title/content when `CreateSeparateVersions` requests divergence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeData {
    pub title: String,
    pub content: String,
}

/// What a resolution did, reported back to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    pub conflict_id: ConflictId,
    pub resolution: ResolutionType,
    /// Version promoted to current, when the strategy promotes one
    pub promoted_version_id: Option<VersionId>,
    /// Fork note created by `CreateSeparateVersions` divergence, if any
    pub fork_note_id: Option<NoteId>,
}

/// A ranked resolution candidate with its rationale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionSuggestion {
    pub resolution: ResolutionType,
    pub rationale: String,
}

/// Thread-safe conflict resolver sharing the engine's database handle
#[derive(Clone)]
pub struct ConflictResolver {
    db: Arc<Mutex<Database>>,
    events: EventBus,
}

impl ConflictResolver {
    /// Create a resolver over a shared database handle
    #[must_use]
    pub fn new(db: Arc<Mutex<Database>>, events: EventBus) -> Self {
        Self { db, events }
    }

    /// Apply a resolution strategy to a pending conflict.
    ///
    /// Fails with `Validation` when `merge_data` is required but missing,
    /// and with `NotFound` when the conflict no longer exists or was
    /// already resolved.
    pub async fn resolve_conflict(
        &self,
        conflict_id: ConflictId,
        resolution: ResolutionType,
        merge_data: Option<MergeData>,
        actor_id: &str,
    ) -> Result<ResolutionOutcome> {
        if resolution == ResolutionType::ManualMerge {
            let usable = merge_data
                .as_ref()
                .is_some_and(|data| !data.title.trim().is_empty() && !data.content.is_empty());
            if !usable {
                return Err(Error::Validation(
                    "manual_merge requires merged title and content".into(),
                ));
            }
        }

        let (outcome, events) = {
            let db = self.db.lock().await;
            db.connection().execute("BEGIN IMMEDIATE", ()).await?;

            let result = self
                .resolve_in_tx(&db, conflict_id, resolution, merge_data, actor_id)
                .await;
            match result {
                Ok(value) => {
                    db.connection().execute("COMMIT", ()).await?;
                    value
                }
                Err(e) => {
                    db.connection().execute("ROLLBACK", ()).await.ok();
                    return Err(e);
                }
            }
        };

        tracing::info!(
            conflict = %conflict_id,
            resolution = resolution.as_str(),
            actor = actor_id,
            "Conflict resolved"
        );
        for event in events {
            self.events.publish(event).await;
        }
        Ok(outcome)
    }

    /// Read-only ranked resolution candidates with rationale
    pub async fn get_resolution_suggestions(
        &self,
        conflict_id: ConflictId,
    ) -> Result<Vec<ResolutionSuggestion>> {
        let (local, remote) = {
            let db = self.db.lock().await;
            let conflict = LibSqlConflictRepository::new(db.connection())
                .get(conflict_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("conflict {conflict_id}")))?;
            let versions = LibSqlVersionRepository::new(db.connection());
            let local = versions
                .get(conflict.local_version_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("version {}", conflict.local_version_id)))?;
            let remote = versions
                .get(conflict.remote_version_id)
                .await?
                .ok_or_else(|| {
                    Error::NotFound(format!("version {}", conflict.remote_version_id))
                })?;
            (local, remote)
        };

        Ok(suggest(&local, &remote))
    }

    async fn resolve_in_tx(
        &self,
        db: &Database,
        conflict_id: ConflictId,
        resolution: ResolutionType,
        merge_data: Option<MergeData>,
        actor_id: &str,
    ) -> Result<(ResolutionOutcome, Vec<NoteEvent>)> {
        let conflicts = LibSqlConflictRepository::new(db.connection());
        let versions = LibSqlVersionRepository::new(db.connection());
        let notes = LibSqlNoteRepository::new(db.connection());
        let history = LibSqlHistoryRepository::new(db.connection());

        let conflict = conflicts
            .get(conflict_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {conflict_id}")))?;
        if conflict.resolution.is_some() {
            return Err(Error::NotFound(format!(
                "conflict {conflict_id} is already resolved"
            )));
        }

        let local = versions
            .get(conflict.local_version_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("version {}", conflict.local_version_id)))?;
        let remote = versions
            .get(conflict.remote_version_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("version {}", conflict.remote_version_id)))?;

        let mut events = Vec::new();
        let mut promoted = None;
        let mut fork_note_id = None;

        match resolution {
            ResolutionType::KeepLocal => {
                versions
                    .set_sync_status(local.id, VersionSyncStatus::Synced)
                    .await?;
                notes.promote_version(conflict.note_id, local.id).await?;
                promoted = Some(local.id);
                events.push(updated_event(conflict.note_id, &local));
            }
            ResolutionType::KeepRemote => {
                // The remote version is usually still current; re-promoting
                // is idempotent and covers the case where it is not
                notes.promote_version(conflict.note_id, remote.id).await?;
                promoted = Some(remote.id);
            }
            ResolutionType::ManualMerge => {
                let data = merge_data.clone().ok_or_else(|| {
                    Error::Validation("manual_merge requires merged title and content".into())
                })?;
                let mut merged = NoteVersion::new(
                    conflict.note_id,
                    actor_id,
                    &local.device_id,
                    data.title,
                    data.content,
                    Some(remote.id),
                );
                merged.sync_status = VersionSyncStatus::Synced;
                versions.insert(&merged).await?;
                versions.mark_superseded(local.id, merged.id).await?;
                versions.mark_superseded(remote.id, merged.id).await?;
                notes.promote_version(conflict.note_id, merged.id).await?;
                promoted = Some(merged.id);
                events.push(updated_event(conflict.note_id, &merged));
            }
            ResolutionType::CreateSeparateVersions => {
                // Divergence is the caller's call: fork data present means
                // the local edit continues as its own note; absent, both
                // versions simply stay in history
                if let Some(data) = merge_data.clone() {
                    let fork = Note::new(actor_id, data.title.clone(), data.content.clone());
                    notes.insert(&fork).await?;

                    let mut first = NoteVersion::new(
                        fork.id,
                        actor_id,
                        &local.device_id,
                        data.title,
                        data.content,
                        None,
                    );
                    first.sync_status = VersionSyncStatus::Synced;
                    versions.insert(&first).await?;
                    notes.promote_version(fork.id, first.id).await?;

                    history
                        .append(
                            fork.id,
                            Some(first.id),
                            actor_id,
                            HistoryAction::NoteCreated,
                            "forked from conflicting edit",
                            serde_json::json!({
                                "source_note": conflict.note_id.as_str(),
                                "source_version": local.id.as_str(),
                            }),
                        )
                        .await?;
                    fork_note_id = Some(fork.id);
                    events.push(updated_event(fork.id, &first));
                }
            }
        }

        if !conflicts.close(conflict_id, resolution, actor_id).await? {
            // Lost a race with another resolver; surface as already-resolved
            return Err(Error::NotFound(format!(
                "conflict {conflict_id} is already resolved"
            )));
        }

        history
            .append(
                conflict.note_id,
                promoted,
                actor_id,
                HistoryAction::ConflictResolved,
                &format!("conflict resolved with {}", resolution.as_str()),
                serde_json::json!({
                    "conflict_id": conflict_id.as_str(),
                    "resolution": resolution.as_str(),
                    "local_version": local.id.as_str(),
                    "remote_version": remote.id.as_str(),
                }),
            )
            .await?;

        events.push(NoteEvent::ConflictResolved {
            note_id: conflict.note_id,
            conflict_id,
            resolution,
            resolved_by: actor_id.to_string(),
        });

        Ok((
            ResolutionOutcome {
                conflict_id,
                resolution,
                promoted_version_id: promoted,
                fork_note_id,
            },
            events,
        ))
    }
}

fn updated_event(note_id: NoteId, version: &NoteVersion) -> NoteEvent {
    NoteEvent::NoteUpdated {
        note_id,
        version_id: version.id,
        title: version.title.clone(),
        content: version.content.clone(),
        content_hash: version.content_hash.clone(),
        origin_user_id: version.author_id.clone(),
        origin_device_id: version.device_id.clone(),
    }
}

/// Rank resolution candidates for a version pair
#[must_use]
pub fn suggest(local: &NoteVersion, remote: &NoteVersion) -> Vec<ResolutionSuggestion> {
    let mut suggestions = Vec::new();

    let local_lines: HashSet<&str> = local.content.lines().collect();
    let remote_lines: HashSet<&str> = remote.content.lines().collect();

    match classify(local, remote) {
        ConflictComplexity::TitleOnly => {
            suggestions.push(ResolutionSuggestion {
                resolution: ResolutionType::KeepRemote,
                rationale: "contents match; keeping the synchronized title avoids surprising \
                            collaborators"
                    .into(),
            });
            suggestions.push(ResolutionSuggestion {
                resolution: ResolutionType::KeepLocal,
                rationale: "contents match; keep the local title instead".into(),
            });
        }
        ConflictComplexity::Localized => {
            if remote_lines.is_superset(&local_lines) {
                suggestions.push(ResolutionSuggestion {
                    resolution: ResolutionType::KeepRemote,
                    rationale: "the synchronized version contains every line of the local edit"
                        .into(),
                });
            } else if local_lines.is_superset(&remote_lines) {
                suggestions.push(ResolutionSuggestion {
                    resolution: ResolutionType::KeepLocal,
                    rationale: "the local edit contains every line of the synchronized version"
                        .into(),
                });
            }
            suggestions.push(ResolutionSuggestion {
                resolution: ResolutionType::ManualMerge,
                rationale: "changes are localized; merging both edits preserves all work".into(),
            });
        }
        ConflictComplexity::Rewrite => {
            suggestions.push(ResolutionSuggestion {
                resolution: ResolutionType::CreateSeparateVersions,
                rationale: "the documents diverged substantially; keeping both avoids losing \
                            either rewrite"
                    .into(),
            });
            suggestions.push(ResolutionSuggestion {
                resolution: ResolutionType::ManualMerge,
                rationale: "combine the rewrites by hand".into(),
            });
        }
    }

    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NoteId;

    fn version(title: &str, content: &str) -> NoteVersion {
        NoteVersion::new(NoteId::new(), "user-1", "device-1", title, content, None)
    }

    #[test]
    fn test_suggest_title_only_prefers_remote() {
        let local = version("Mine", "body");
        let remote = version("Theirs", "body");
        let suggestions = suggest(&local, &remote);
        assert_eq!(suggestions[0].resolution, ResolutionType::KeepRemote);
    }

    #[test]
    fn test_suggest_superset_wins() {
        let local = version("Draft", "one\ntwo\nthree\nfour");
        let remote = version("Draft", "one\ntwo\nthree");
        let suggestions = suggest(&local, &remote);
        assert_eq!(suggestions[0].resolution, ResolutionType::KeepLocal);
    }

    #[test]
    fn test_suggest_rewrite_keeps_both() {
        let local = version("Draft", "alpha\nbeta");
        let remote = version("Draft", "gamma\ndelta");
        let suggestions = suggest(&local, &remote);
        assert_eq!(
            suggestions[0].resolution,
            ResolutionType::CreateSeparateVersions
        );
    }
}
