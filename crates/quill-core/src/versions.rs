//! Version manager.
//!
//! Creates, stores, and promotes note versions; tracks which version is
//! current and which are pending synchronization. Promotion is the only
//! path that mutates a note's title/content.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::db::{
    Database, LibSqlNoteRepository, LibSqlVersionRepository, NoteRepository, VersionRepository,
};
use crate::error::{Error, Result};
use crate::events::{EventBus, NoteEvent};
use crate::models::{Note, NoteId, NoteVersion, VersionId, VersionSyncStatus};

/// Thread-safe version manager sharing the engine's database handle
#[derive(Clone)]
pub struct VersionManager {
    db: Arc<Mutex<Database>>,
    events: EventBus,
    config: EngineConfig,
}

impl VersionManager {
    /// Create a manager over a shared database handle
    #[must_use]
    pub fn new(db: Arc<Mutex<Database>>, events: EventBus, config: EngineConfig) -> Self {
        Self { db, events, config }
    }

    /// Create a new `pending` version of a note.
    ///
    /// Does not touch the note's current pointer. The version's parent is
    /// what the editing device saw: its own latest pending version when it
    /// has been editing offline, otherwise the note's current version.
    /// Sequential edits from one device therefore chain instead of
    /// conflicting with each other.
    pub async fn create_version(
        &self,
        note_id: NoteId,
        author_id: &str,
        title: &str,
        content: &str,
        device_id: &str,
    ) -> Result<NoteVersion> {
        validate_payload(&self.config, title, content)?;

        let db = self.db.lock().await;
        let notes = LibSqlNoteRepository::new(db.connection());
        let note = notes
            .get(note_id)
            .await?
            .ok_or_else(|| Error::Validation(format!("unknown note {note_id}")))?;

        let versions = LibSqlVersionRepository::new(db.connection());
        let parent = versions
            .pending_for_note(note_id)
            .await?
            .into_iter()
            .rev()
            .find(|v| v.author_id == author_id && v.device_id == device_id)
            .map(|v| v.id)
            .or(note.current_version_id);

        let version = NoteVersion::new(note_id, author_id, device_id, title, content, parent);
        LibSqlVersionRepository::new(db.connection())
            .insert(&version)
            .await?;

        tracing::debug!(
            note = %note_id,
            version = %version.id,
            author = author_id,
            "Created pending version"
        );
        Ok(version)
    }

    /// Transition a `pending` version to `synced`.
    ///
    /// Idempotent: re-invoking on an already-synced version is a no-op.
    pub async fn mark_synchronized(&self, version_id: VersionId) -> Result<()> {
        let db = self.db.lock().await;
        let versions = LibSqlVersionRepository::new(db.connection());
        let version = versions
            .get(version_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("version {version_id}")))?;

        match version.sync_status {
            VersionSyncStatus::Synced => Ok(()),
            VersionSyncStatus::Pending => {
                versions
                    .set_sync_status(version_id, VersionSyncStatus::Synced)
                    .await
            }
            VersionSyncStatus::Conflict => Err(Error::InvalidState(format!(
                "version {version_id} is in conflict and must be resolved first"
            ))),
        }
    }

    /// Atomically update the note's current pointer to a synced version.
    ///
    /// Broadcasts a `NoteUpdated` event to the version's note topic.
    pub async fn set_current_version(
        &self,
        note_id: NoteId,
        version_id: VersionId,
        actor_id: &str,
    ) -> Result<()> {
        let version = {
            let db = self.db.lock().await;
            let version = LibSqlVersionRepository::new(db.connection())
                .get(version_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("version {version_id}")))?;

            LibSqlNoteRepository::new(db.connection())
                .promote_version(note_id, version_id)
                .await?;
            version
        };

        tracing::info!(note = %note_id, version = %version_id, actor = actor_id, "Promoted version");
        self.events
            .publish(NoteEvent::NoteUpdated {
                note_id,
                version_id,
                title: version.title.clone(),
                content: version.content.clone(),
                content_hash: version.content_hash.clone(),
                origin_user_id: version.author_id.clone(),
                origin_device_id: version.device_id.clone(),
            })
            .await;
        Ok(())
    }

    /// Pending versions authored by the user, oldest first
    pub async fn get_pending_sync_versions(&self, user_id: &str) -> Result<Vec<NoteVersion>> {
        let db = self.db.lock().await;
        LibSqlVersionRepository::new(db.connection())
            .pending_for_user(user_id)
            .await
    }

    /// Get a version by ID
    pub async fn get_version(&self, version_id: VersionId) -> Result<Option<NoteVersion>> {
        let db = self.db.lock().await;
        LibSqlVersionRepository::new(db.connection())
            .get(version_id)
            .await
    }

    /// All versions of a note, newest first
    pub async fn list_versions(&self, note_id: NoteId) -> Result<Vec<NoteVersion>> {
        let db = self.db.lock().await;
        LibSqlVersionRepository::new(db.connection())
            .list_for_note(note_id)
            .await
    }

    /// Get a note by ID, excluding soft-deleted notes
    pub async fn get_note(&self, note_id: NoteId) -> Result<Option<Note>> {
        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection()).get(note_id).await
    }
}

/// Reject titles/contents outside the configured size limits
pub(crate) fn validate_payload(config: &EngineConfig, title: &str, content: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::Validation("title must not be empty".into()));
    }
    if title.chars().count() > config.max_title_len {
        return Err(Error::Validation(format!(
            "title exceeds {} characters",
            config.max_title_len
        )));
    }
    if content.len() > config.max_content_len {
        return Err(Error::Validation(format!(
            "content exceeds {} bytes",
            config.max_content_len
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_payload_limits() {
        let config = EngineConfig::default();
        assert!(validate_payload(&config, "Draft", "body").is_ok());
        assert!(validate_payload(&config, "   ", "body").is_err());
        assert!(validate_payload(&config, &"x".repeat(501), "body").is_err());
        assert!(validate_payload(&config, "Draft", &"x".repeat(1024 * 1024 + 1)).is_err());
    }
}
