//! Conflict repository implementation

use crate::error::{Error, Result};
use crate::models::{Conflict, ConflictId, ConflictStatus, NoteId, ResolutionType, VersionId};
use libsql::{params, Connection, Row};

/// Trait for conflict storage operations (async)
#[allow(async_fn_in_trait)]
pub trait ConflictRepository {
    /// Insert a conflict unless one already exists for the same version
    /// pair; returns the stored record either way
    async fn insert_or_existing(&self, conflict: Conflict) -> Result<Conflict>;

    /// Get a conflict by ID
    async fn get(&self, id: ConflictId) -> Result<Option<Conflict>>;

    /// Pending conflicts on a note, oldest first
    async fn pending_for_note(&self, note_id: NoteId) -> Result<Vec<Conflict>>;

    /// All pending conflicts, oldest first
    async fn pending_all(&self) -> Result<Vec<Conflict>>;

    /// Close a pending conflict exactly once; returns false when it was
    /// already resolved (or never existed)
    async fn close(
        &self,
        id: ConflictId,
        resolution: ResolutionType,
        resolved_by: &str,
    ) -> Result<bool>;
}

/// libSQL implementation of `ConflictRepository`
pub struct LibSqlConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &Row) -> Result<Conflict> {
        let id: String = row.get(0)?;
        let note_id: String = row.get(1)?;
        let local: String = row.get(2)?;
        let remote: String = row.get(3)?;
        let status: String = row.get(5)?;
        let resolution: Option<String> = row.get(6)?;

        Ok(Conflict {
            id: id
                .parse()
                .map_err(|_| Error::Storage("corrupt conflict id".into()))?,
            note_id: note_id
                .parse::<NoteId>()
                .map_err(|_| Error::Storage("corrupt note id".into()))?,
            local_version_id: local
                .parse::<VersionId>()
                .map_err(|_| Error::Storage("corrupt local version id".into()))?,
            remote_version_id: remote
                .parse::<VersionId>()
                .map_err(|_| Error::Storage("corrupt remote version id".into()))?,
            detected_at: row.get(4)?,
            status: status.parse::<ConflictStatus>().map_err(Error::Storage)?,
            resolution: resolution
                .map(|r| r.parse::<ResolutionType>())
                .transpose()
                .map_err(Error::Storage)?,
            resolved_at: row.get(7)?,
            resolved_by: row.get(8)?,
        })
    }

    async fn query_conflicts(&self, sql: &str, param: Option<String>) -> Result<Vec<Conflict>> {
        let mut rows = match param {
            Some(value) => self.conn.query(sql, [value]).await?,
            None => self.conn.query(sql, ()).await?,
        };

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(Self::parse_conflict(&row)?);
        }
        Ok(conflicts)
    }

    async fn get_by_pair(&self, local: VersionId, remote: VersionId) -> Result<Option<Conflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, note_id, local_version_id, remote_version_id, detected_at,
                        status, resolution, resolved_at, resolved_by
                 FROM conflicts WHERE local_version_id = ? AND remote_version_id = ?",
                params![local.as_str(), remote.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_conflict(&row)?)),
            None => Ok(None),
        }
    }
}

impl ConflictRepository for LibSqlConflictRepository<'_> {
    async fn insert_or_existing(&self, conflict: Conflict) -> Result<Conflict> {
        // The unique (local, remote) index makes re-detection a no-op
        self.conn
            .execute(
                "INSERT INTO conflicts
                    (id, note_id, local_version_id, remote_version_id, detected_at,
                     status, resolution, resolved_at, resolved_by)
                 VALUES (?, ?, ?, ?, ?, ?, NULL, NULL, NULL)
                 ON CONFLICT (local_version_id, remote_version_id) DO NOTHING",
                params![
                    conflict.id.as_str(),
                    conflict.note_id.as_str(),
                    conflict.local_version_id.as_str(),
                    conflict.remote_version_id.as_str(),
                    conflict.detected_at,
                    conflict.status.as_str()
                ],
            )
            .await?;

        self.get_by_pair(conflict.local_version_id, conflict.remote_version_id)
            .await?
            .ok_or_else(|| Error::Storage("conflict insert lost".into()))
    }

    async fn get(&self, id: ConflictId) -> Result<Option<Conflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, note_id, local_version_id, remote_version_id, detected_at,
                        status, resolution, resolved_at, resolved_by
                 FROM conflicts WHERE id = ?",
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_conflict(&row)?)),
            None => Ok(None),
        }
    }

    async fn pending_for_note(&self, note_id: NoteId) -> Result<Vec<Conflict>> {
        self.query_conflicts(
            "SELECT id, note_id, local_version_id, remote_version_id, detected_at,
                    status, resolution, resolved_at, resolved_by
             FROM conflicts WHERE note_id = ? AND status = 'pending'
             ORDER BY detected_at ASC, id ASC",
            Some(note_id.as_str()),
        )
        .await
    }

    async fn pending_all(&self) -> Result<Vec<Conflict>> {
        self.query_conflicts(
            "SELECT id, note_id, local_version_id, remote_version_id, detected_at,
                    status, resolution, resolved_at, resolved_by
             FROM conflicts WHERE status = 'pending'
             ORDER BY detected_at ASC, id ASC",
            None,
        )
        .await
    }

    async fn close(
        &self,
        id: ConflictId,
        resolution: ResolutionType,
        resolved_by: &str,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp_millis();
        let affected = self
            .conn
            .execute(
                "UPDATE conflicts
                 SET status = 'resolved', resolution = ?, resolved_at = ?, resolved_by = ?
                 WHERE id = ? AND status = 'pending'",
                params![resolution.as_str(), now, resolved_by, id.as_str()],
            )
            .await?;
        Ok(affected > 0)
    }
}
