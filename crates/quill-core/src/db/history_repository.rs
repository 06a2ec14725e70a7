//! History repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use crate::error::{Error, Result};
use crate::models::{HistoryAction, HistoryEntry, NoteId, VersionId};
use libsql::{params, Connection, Row};

/// Trait for history storage operations (async)
#[allow(async_fn_in_trait)]
pub trait HistoryRepository {
    /// Append one entry; entries are never updated or deleted
    async fn append(
        &self,
        note_id: NoteId,
        version_id: Option<VersionId>,
        user_id: &str,
        action: HistoryAction,
        description: &str,
        metadata: serde_json::Value,
    ) -> Result<()>;

    /// Entries for a note, newest first, rowid breaking timestamp ties
    async fn for_note(&self, note_id: NoteId, limit: usize) -> Result<Vec<HistoryEntry>>;
}

/// libSQL implementation of `HistoryRepository`
pub struct LibSqlHistoryRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlHistoryRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_entry(row: &Row) -> Result<HistoryEntry> {
        let note_id: String = row.get(1)?;
        let version_id: Option<String> = row.get(2)?;
        let action: String = row.get(4)?;
        let metadata: String = row.get(6)?;

        Ok(HistoryEntry {
            id: row.get(0)?,
            note_id: note_id
                .parse::<NoteId>()
                .map_err(|_| Error::Storage("corrupt note id".into()))?,
            version_id: version_id
                .map(|v| v.parse::<VersionId>())
                .transpose()
                .map_err(|_| Error::Storage("corrupt version id".into()))?,
            user_id: row.get(3)?,
            action: action.parse::<HistoryAction>().map_err(Error::Storage)?,
            description: row.get(5)?,
            metadata: serde_json::from_str(&metadata)?,
            created_at: row.get(7)?,
        })
    }
}

impl HistoryRepository for LibSqlHistoryRepository<'_> {
    async fn append(
        &self,
        note_id: NoteId,
        version_id: Option<VersionId>,
        user_id: &str,
        action: HistoryAction,
        description: &str,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn
            .execute(
                "INSERT INTO history
                    (note_id, version_id, user_id, action, description, metadata, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    note_id.as_str(),
                    version_id.map(|v| v.as_str()),
                    user_id,
                    action.as_str(),
                    description,
                    serde_json::to_string(&metadata)?,
                    now
                ],
            )
            .await?;
        Ok(())
    }

    async fn for_note(&self, note_id: NoteId, limit: usize) -> Result<Vec<HistoryEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, note_id, version_id, user_id, action, description, metadata, created_at
                 FROM history WHERE note_id = ?
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?",
                params![note_id.as_str(), limit as i64],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_entry(&row)?);
        }
        Ok(entries)
    }
}
