//! Note repository implementation

use crate::error::{Error, Result};
use crate::models::{Note, NoteId, Sharing, VersionId};
use libsql::{params, Connection, Row};

/// Trait for note storage operations (async)
#[allow(async_fn_in_trait)]
pub trait NoteRepository {
    /// Insert a new note
    async fn insert(&self, note: &Note) -> Result<()>;

    /// Get a note by ID, excluding soft-deleted notes
    async fn get(&self, id: NoteId) -> Result<Option<Note>>;

    /// Get a note by ID, including soft-deleted notes
    async fn get_any(&self, id: NoteId) -> Result<Option<Note>>;

    /// Atomically promote a synced version to be the note's current version.
    ///
    /// The note's title/content mirror the promoted version. Fails with
    /// `InvalidState` when the version is not `synced` or belongs to a
    /// different note.
    async fn promote_version(&self, note_id: NoteId, version_id: VersionId) -> Result<()>;

    /// Find a live note by the same user with the same title created at or
    /// after `window_start` (Unix ms). Powers duplicate-create absorption.
    async fn find_recent_by_title(
        &self,
        owner_id: &str,
        title: &str,
        window_start: i64,
    ) -> Result<Option<Note>>;

    /// Soft delete a note; returns false when it was already gone
    async fn soft_delete(&self, id: NoteId) -> Result<bool>;
}

/// libSQL implementation of `NoteRepository`
pub struct LibSqlNoteRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlNoteRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_note(row: &Row) -> Result<Note> {
        let id: String = row.get(0)?;
        let current_version_id: Option<String> = row.get(4)?;
        let sharing: String = row.get(5)?;

        Ok(Note {
            id: id
                .parse()
                .map_err(|_| Error::Storage("corrupt note id".into()))?,
            title: row.get(1)?,
            content: row.get(2)?,
            owner_id: row.get(3)?,
            current_version_id: current_version_id
                .map(|v| v.parse::<VersionId>())
                .transpose()
                .map_err(|_| Error::Storage("corrupt current version id".into()))?,
            sharing: sharing
                .parse::<Sharing>()
                .map_err(Error::Storage)?,
            is_deleted: row.get::<i32>(6)? != 0,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    async fn get_where(&self, condition: &str, id: NoteId) -> Result<Option<Note>> {
        let sql = format!(
            "SELECT id, title, content, owner_id, current_version_id, sharing,
                    is_deleted, created_at, updated_at
             FROM notes WHERE id = ?{condition}"
        );
        let mut rows = self.conn.query(&sql, [id.as_str()]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_note(&row)?)),
            None => Ok(None),
        }
    }
}

impl NoteRepository for LibSqlNoteRepository<'_> {
    async fn insert(&self, note: &Note) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO notes (id, title, content, owner_id, current_version_id,
                                    sharing, is_deleted, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    note.id.as_str(),
                    note.title.clone(),
                    note.content.clone(),
                    note.owner_id.clone(),
                    note.current_version_id.map(|v| v.as_str()),
                    note.sharing.as_str(),
                    i64::from(note.is_deleted),
                    note.created_at,
                    note.updated_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: NoteId) -> Result<Option<Note>> {
        self.get_where(" AND is_deleted = 0", id).await
    }

    async fn get_any(&self, id: NoteId) -> Result<Option<Note>> {
        self.get_where("", id).await
    }

    async fn promote_version(&self, note_id: NoteId, version_id: VersionId) -> Result<()> {
        // Savepoints nest inside a caller's open transaction (conflict
        // resolution wraps promotion and history in one) and stand alone
        // otherwise
        self.conn.execute("SAVEPOINT promote", ()).await?;

        let result = self.promote_in_tx(note_id, version_id).await;
        match result {
            Ok(()) => {
                self.conn.execute("RELEASE promote", ()).await?;
                Ok(())
            }
            Err(e) => {
                self.conn.execute("ROLLBACK TO promote", ()).await.ok();
                self.conn.execute("RELEASE promote", ()).await.ok();
                Err(e)
            }
        }
    }

    async fn find_recent_by_title(
        &self,
        owner_id: &str,
        title: &str,
        window_start: i64,
    ) -> Result<Option<Note>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, title, content, owner_id, current_version_id, sharing,
                        is_deleted, created_at, updated_at
                 FROM notes
                 WHERE owner_id = ? AND title = ? AND is_deleted = 0 AND created_at >= ?
                 ORDER BY created_at ASC
                 LIMIT 1",
                params![owner_id, title, window_start],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_note(&row)?)),
            None => Ok(None),
        }
    }

    async fn soft_delete(&self, id: NoteId) -> Result<bool> {
        let now = chrono::Utc::now().timestamp_millis();
        let affected = self
            .conn
            .execute(
                "UPDATE notes SET is_deleted = 1, updated_at = ? WHERE id = ? AND is_deleted = 0",
                params![now, id.as_str()],
            )
            .await?;
        Ok(affected > 0)
    }
}

impl LibSqlNoteRepository<'_> {
    async fn promote_in_tx(&self, note_id: NoteId, version_id: VersionId) -> Result<()> {
        let mut rows = self
            .conn
            .query(
                "SELECT note_id, title, content, sync_status FROM note_versions WHERE id = ?",
                [version_id.as_str()],
            )
            .await?;

        let row = rows
            .next()
            .await?
            .ok_or_else(|| Error::NotFound(format!("version {version_id}")))?;

        let owning_note: String = row.get(0)?;
        let title: String = row.get(1)?;
        let content: String = row.get(2)?;
        let sync_status: String = row.get(3)?;

        if owning_note != note_id.as_str() {
            return Err(Error::InvalidState(format!(
                "version {version_id} does not belong to note {note_id}"
            )));
        }
        if sync_status != "synced" {
            return Err(Error::InvalidState(format!(
                "version {version_id} is {sync_status}, only synced versions can become current"
            )));
        }

        let now = chrono::Utc::now().timestamp_millis();
        let affected = self
            .conn
            .execute(
                "UPDATE notes
                 SET current_version_id = ?, title = ?, content = ?, updated_at = ?
                 WHERE id = ? AND is_deleted = 0",
                params![version_id.as_str(), title, content, now, note_id.as_str()],
            )
            .await?;

        if affected == 0 {
            return Err(Error::NotFound(format!("note {note_id}")));
        }
        Ok(())
    }
}
