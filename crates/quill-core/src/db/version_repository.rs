//! Note version repository implementation

use crate::error::{Error, Result};
use crate::models::{NoteId, NoteVersion, VersionId, VersionSyncStatus};
use libsql::{params, Connection, Row};

/// Longest parent chain the ancestry walk will follow. Divergence nearly
/// always shows up within a handful of links; the cap bounds pathological
/// self-referential data.
const MAX_ANCESTRY_DEPTH: usize = 256;

/// Trait for version storage operations (async)
#[allow(async_fn_in_trait)]
pub trait VersionRepository {
    /// Insert a new version
    async fn insert(&self, version: &NoteVersion) -> Result<()>;

    /// Get a version by ID
    async fn get(&self, id: VersionId) -> Result<Option<NoteVersion>>;

    /// All versions of a note, newest first
    async fn list_for_note(&self, note_id: NoteId) -> Result<Vec<NoteVersion>>;

    /// Pending versions authored by a user, oldest first
    async fn pending_for_user(&self, author_id: &str) -> Result<Vec<NoteVersion>>;

    /// Pending versions of a note, oldest first
    async fn pending_for_note(&self, note_id: NoteId) -> Result<Vec<NoteVersion>>;

    /// Set a version's sync status
    async fn set_sync_status(&self, id: VersionId, status: VersionSyncStatus) -> Result<()>;

    /// Mark a version as superseded by a merged version
    async fn mark_superseded(&self, id: VersionId, by: VersionId) -> Result<()>;

    /// IDs of the version and its ancestors, following parent links from
    /// `id` backwards, nearest first
    async fn ancestor_chain(&self, id: VersionId) -> Result<Vec<VersionId>>;
}

/// libSQL implementation of `VersionRepository`
pub struct LibSqlVersionRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlVersionRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_version(row: &Row) -> Result<NoteVersion> {
        let id: String = row.get(0)?;
        let note_id: String = row.get(1)?;
        let parent: Option<String> = row.get(7)?;
        let sync_status: String = row.get(8)?;
        let superseded_by: Option<String> = row.get(9)?;

        Ok(NoteVersion {
            id: id
                .parse()
                .map_err(|_| Error::Storage("corrupt version id".into()))?,
            note_id: note_id
                .parse()
                .map_err(|_| Error::Storage("corrupt note id".into()))?,
            author_id: row.get(2)?,
            device_id: row.get(3)?,
            title: row.get(4)?,
            content: row.get(5)?,
            content_hash: row.get(6)?,
            parent_version_id: parent
                .map(|v| v.parse::<VersionId>())
                .transpose()
                .map_err(|_| Error::Storage("corrupt parent version id".into()))?,
            sync_status: sync_status
                .parse::<VersionSyncStatus>()
                .map_err(Error::Storage)?,
            superseded_by: superseded_by
                .map(|v| v.parse::<VersionId>())
                .transpose()
                .map_err(|_| Error::Storage("corrupt superseded_by id".into()))?,
            created_at: row.get(10)?,
        })
    }

    async fn query_versions(
        &self,
        condition: &str,
        order: &str,
        param: String,
    ) -> Result<Vec<NoteVersion>> {
        let sql = format!(
            "SELECT id, note_id, author_id, device_id, title, content, content_hash,
                    parent_version_id, sync_status, superseded_by, created_at
             FROM note_versions WHERE {condition} ORDER BY {order}"
        );
        let mut rows = self.conn.query(&sql, [param]).await?;

        let mut versions = Vec::new();
        while let Some(row) = rows.next().await? {
            versions.push(Self::parse_version(&row)?);
        }
        Ok(versions)
    }
}

impl VersionRepository for LibSqlVersionRepository<'_> {
    async fn insert(&self, version: &NoteVersion) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO note_versions
                    (id, note_id, author_id, device_id, title, content, content_hash,
                     parent_version_id, sync_status, superseded_by, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    version.id.as_str(),
                    version.note_id.as_str(),
                    version.author_id.clone(),
                    version.device_id.clone(),
                    version.title.clone(),
                    version.content.clone(),
                    version.content_hash.clone(),
                    version.parent_version_id.map(|v| v.as_str()),
                    version.sync_status.as_str(),
                    version.superseded_by.map(|v| v.as_str()),
                    version.created_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: VersionId) -> Result<Option<NoteVersion>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, note_id, author_id, device_id, title, content, content_hash,
                        parent_version_id, sync_status, superseded_by, created_at
                 FROM note_versions WHERE id = ?",
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_version(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_for_note(&self, note_id: NoteId) -> Result<Vec<NoteVersion>> {
        self.query_versions("note_id = ?", "created_at DESC, id DESC", note_id.as_str())
            .await
    }

    async fn pending_for_user(&self, author_id: &str) -> Result<Vec<NoteVersion>> {
        self.query_versions(
            "author_id = ? AND sync_status = 'pending'",
            "created_at ASC, id ASC",
            author_id.to_string(),
        )
        .await
    }

    async fn pending_for_note(&self, note_id: NoteId) -> Result<Vec<NoteVersion>> {
        self.query_versions(
            "note_id = ? AND sync_status = 'pending'",
            "created_at ASC, id ASC",
            note_id.as_str(),
        )
        .await
    }

    async fn set_sync_status(&self, id: VersionId, status: VersionSyncStatus) -> Result<()> {
        let affected = self
            .conn
            .execute(
                "UPDATE note_versions SET sync_status = ? WHERE id = ?",
                params![status.as_str(), id.as_str()],
            )
            .await?;
        if affected == 0 {
            return Err(Error::NotFound(format!("version {id}")));
        }
        Ok(())
    }

    async fn mark_superseded(&self, id: VersionId, by: VersionId) -> Result<()> {
        self.conn
            .execute(
                "UPDATE note_versions SET superseded_by = ? WHERE id = ?",
                params![by.as_str(), id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn ancestor_chain(&self, id: VersionId) -> Result<Vec<VersionId>> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);

        while let Some(current) = cursor {
            if chain.len() >= MAX_ANCESTRY_DEPTH || chain.contains(&current) {
                break;
            }
            chain.push(current);

            let mut rows = self
                .conn
                .query(
                    "SELECT parent_version_id FROM note_versions WHERE id = ?",
                    [current.as_str()],
                )
                .await?;

            cursor = match rows.next().await? {
                Some(row) => {
                    let parent: Option<String> = row.get(0)?;
                    parent
                        .map(|v| v.parse::<VersionId>())
                        .transpose()
                        .map_err(|_| Error::Storage("corrupt parent version id".into()))?
                }
                None => None,
            };
        }

        Ok(chain)
    }
}
