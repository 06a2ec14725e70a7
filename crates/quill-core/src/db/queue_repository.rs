//! Sync queue repository implementation

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::models::{
    CreatePayload, NoteId, QueueItemId, QueueItemStatus, QueueOperation, SyncQueueItem, VersionId,
};
use libsql::{params, Connection, Row};

/// Trait for sync queue storage operations (async)
#[allow(async_fn_in_trait)]
pub trait QueueRepository {
    /// Insert a new queue item
    async fn insert(&self, item: &SyncQueueItem) -> Result<()>;

    /// Get a queue item by ID
    async fn get(&self, id: QueueItemId) -> Result<Option<SyncQueueItem>>;

    /// Pending items in enqueue order. Items scheduled for a future retry
    /// are included; the coordinator skips them without reordering.
    async fn pending_in_order(&self) -> Result<Vec<SyncQueueItem>>;

    /// Items queued by a user, oldest first; feeds "needs attention" UIs
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<SyncQueueItem>>;

    /// Persist status/attempt/backoff changes for an item
    async fn update(&self, item: &SyncQueueItem) -> Result<()>;

    /// Count items per status, optionally scoped to one user
    async fn counts_by_status(&self, user_id: Option<&str>) -> Result<HashMap<QueueItemStatus, u64>>;

    /// Delete terminal synced/duplicate items enqueued before `cutoff`
    /// (Unix ms); returns the number purged
    async fn purge_terminal_before(&self, cutoff: i64) -> Result<u64>;
}

/// libSQL implementation of `QueueRepository`
pub struct LibSqlQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_item(row: &Row) -> Result<SyncQueueItem> {
        let id: String = row.get(0)?;
        let operation: String = row.get(1)?;
        let note_id: String = row.get(2)?;
        let version_id: Option<String> = row.get(3)?;
        let payload: Option<String> = row.get(6)?;
        let status: String = row.get(11)?;

        Ok(SyncQueueItem {
            id: id
                .parse()
                .map_err(|_| Error::Storage("corrupt queue item id".into()))?,
            operation: operation
                .parse::<QueueOperation>()
                .map_err(Error::Storage)?,
            note_id: note_id
                .parse::<NoteId>()
                .map_err(|_| Error::Storage("corrupt note id".into()))?,
            version_id: version_id
                .map(|v| v.parse::<VersionId>())
                .transpose()
                .map_err(|_| Error::Storage("corrupt version id".into()))?,
            user_id: row.get(4)?,
            device_id: row.get(5)?,
            payload: payload
                .map(|raw| serde_json::from_str::<CreatePayload>(&raw))
                .transpose()?,
            enqueued_at: row.get(7)?,
            attempts: u32::try_from(row.get::<i64>(8)?)
                .map_err(|_| Error::Storage("corrupt attempt count".into()))?,
            max_attempts: u32::try_from(row.get::<i64>(9)?)
                .map_err(|_| Error::Storage("corrupt attempt limit".into()))?,
            next_attempt_at: row.get(10)?,
            status: status.parse::<QueueItemStatus>().map_err(Error::Storage)?,
            last_error: row.get(12)?,
        })
    }
}

impl QueueRepository for LibSqlQueueRepository<'_> {
    async fn insert(&self, item: &SyncQueueItem) -> Result<()> {
        let payload = item
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn
            .execute(
                "INSERT INTO sync_queue
                    (id, operation, note_id, version_id, user_id, device_id, payload,
                     enqueued_at, attempts, max_attempts, next_attempt_at, status, last_error)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    item.id.as_str(),
                    item.operation.as_str(),
                    item.note_id.as_str(),
                    item.version_id.map(|v| v.as_str()),
                    item.user_id.clone(),
                    item.device_id.clone(),
                    payload,
                    item.enqueued_at,
                    i64::from(item.attempts),
                    i64::from(item.max_attempts),
                    item.next_attempt_at,
                    item.status.as_str(),
                    item.last_error.clone()
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: QueueItemId) -> Result<Option<SyncQueueItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, operation, note_id, version_id, user_id, device_id, payload,
                        enqueued_at, attempts, max_attempts, next_attempt_at, status, last_error
                 FROM sync_queue WHERE id = ?",
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_item(&row)?)),
            None => Ok(None),
        }
    }

    async fn pending_in_order(&self) -> Result<Vec<SyncQueueItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, operation, note_id, version_id, user_id, device_id, payload,
                        enqueued_at, attempts, max_attempts, next_attempt_at, status, last_error
                 FROM sync_queue
                 WHERE status = 'pending'
                 ORDER BY enqueued_at ASC, id ASC",
                (),
            )
            .await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(Self::parse_item(&row)?);
        }
        Ok(items)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<SyncQueueItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, operation, note_id, version_id, user_id, device_id, payload,
                        enqueued_at, attempts, max_attempts, next_attempt_at, status, last_error
                 FROM sync_queue
                 WHERE user_id = ?
                 ORDER BY enqueued_at ASC, id ASC",
                [user_id],
            )
            .await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(Self::parse_item(&row)?);
        }
        Ok(items)
    }

    async fn update(&self, item: &SyncQueueItem) -> Result<()> {
        let affected = self
            .conn
            .execute(
                "UPDATE sync_queue
                 SET attempts = ?, next_attempt_at = ?, status = ?, last_error = ?
                 WHERE id = ?",
                params![
                    i64::from(item.attempts),
                    item.next_attempt_at,
                    item.status.as_str(),
                    item.last_error.clone(),
                    item.id.as_str()
                ],
            )
            .await?;
        if affected == 0 {
            return Err(Error::NotFound(format!("queue item {}", item.id)));
        }
        Ok(())
    }

    async fn counts_by_status(
        &self,
        user_id: Option<&str>,
    ) -> Result<HashMap<QueueItemStatus, u64>> {
        let mut rows = match user_id {
            Some(user) => {
                self.conn
                    .query(
                        "SELECT status, COUNT(*) FROM sync_queue WHERE user_id = ? GROUP BY status",
                        [user],
                    )
                    .await?
            }
            None => {
                self.conn
                    .query("SELECT status, COUNT(*) FROM sync_queue GROUP BY status", ())
                    .await?
            }
        };

        let mut counts = HashMap::new();
        while let Some(row) = rows.next().await? {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            counts.insert(
                status.parse::<QueueItemStatus>().map_err(Error::Storage)?,
                u64::try_from(count).unwrap_or(0),
            );
        }
        Ok(counts)
    }

    async fn purge_terminal_before(&self, cutoff: i64) -> Result<u64> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM sync_queue
                 WHERE status IN ('synced', 'duplicate') AND enqueued_at < ?",
                [cutoff],
            )
            .await?;
        Ok(affected)
    }
}
