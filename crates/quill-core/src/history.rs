//! Append-only history log.
//!
//! Audit record of what happened to a note/version. Entries are immutable
//! and ordered by timestamp, insertion order breaking ties; retention is an
//! administrative concern outside this core.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{Database, HistoryRepository, LibSqlHistoryRepository};
use crate::error::Result;
use crate::models::{HistoryAction, HistoryEntry, NoteId, VersionId};

/// Thread-safe history log sharing the engine's database handle
#[derive(Clone)]
pub struct HistoryLog {
    db: Arc<Mutex<Database>>,
}

impl HistoryLog {
    /// Create a log over a shared database handle
    #[must_use]
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Append one entry.
    ///
    /// Storage failures surface to the caller; this log never retries.
    pub async fn add_entry(
        &self,
        note_id: NoteId,
        version_id: Option<VersionId>,
        user_id: &str,
        action: HistoryAction,
        description: &str,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlHistoryRepository::new(db.connection())
            .append(note_id, version_id, user_id, action, description, metadata)
            .await
    }

    /// Entries for a note, newest first
    pub async fn entries_for_note(&self, note_id: NoteId, limit: usize) -> Result<Vec<HistoryEntry>> {
        let db = self.db.lock().await;
        LibSqlHistoryRepository::new(db.connection())
            .for_note(note_id, limit)
            .await
    }
}
