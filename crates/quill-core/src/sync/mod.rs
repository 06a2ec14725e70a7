//! Synchronization coordinator.
//!
//! The offline/online bridge: queues edits made while disconnected, replays
//! them against store state, retries transient failures with exponential
//! backoff, and absorbs duplicate offline creates. Queue processing is
//! single-flight per process; items run in enqueue order and a scheduled
//! retry is never reordered ahead of older work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::conflict::ConflictDetector;
use crate::db::{
    Database, LibSqlNoteRepository, LibSqlQueueRepository, LibSqlVersionRepository,
    NoteRepository, QueueRepository, VersionRepository,
};
use crate::error::{Error, Result};
use crate::history::HistoryLog;
use crate::models::{
    CreatePayload, HistoryAction, Note, NoteId, NoteVersion, QueueItemStatus, QueueOperation,
    Sharing, SyncQueueItem, VersionSyncStatus,
};
use crate::versions::VersionManager;

/// Outcome of one queue pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// False when another pass was already in flight and this call no-oped
    pub ran: bool,
    /// Items examined this pass
    pub processed: usize,
    pub synced: usize,
    pub conflicts: usize,
    pub duplicates: usize,
    pub failed: usize,
    /// Items skipped because their retry is scheduled in the future
    pub deferred: usize,
}

/// Aggregate queue counts plus coordinator state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub pending: u64,
    pub synced: u64,
    pub conflict: u64,
    pub duplicate: u64,
    pub failed: u64,
    pub online: bool,
    pub in_progress: bool,
}

/// Thread-safe synchronization coordinator
#[derive(Clone)]
pub struct SyncCoordinator {
    db: Arc<Mutex<Database>>,
    versions: VersionManager,
    detector: ConflictDetector,
    history: HistoryLog,
    config: EngineConfig,
    online: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
}

/// Clears the single-flight latch when a pass ends, on every exit path
struct FlightGuard(Arc<AtomicBool>);

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncCoordinator {
    /// Create a coordinator over the shared database handle and services
    #[must_use]
    pub fn new(
        db: Arc<Mutex<Database>>,
        versions: VersionManager,
        detector: ConflictDetector,
        history: HistoryLog,
        config: EngineConfig,
    ) -> Self {
        Self {
            db,
            versions,
            detector,
            history,
            config,
            online: Arc::new(AtomicBool::new(true)),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the coordinator currently considers itself online
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// The engine configuration this coordinator runs with
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Flip connectivity; switching to online kicks a queue pass
    pub async fn set_online(&self, online: bool) -> Result<SyncReport> {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            tracing::info!("Connectivity restored, replaying sync queue");
            return self.process_sync_queue().await;
        }
        Ok(SyncReport::default())
    }

    /// Record an edit made while disconnected.
    ///
    /// Creates a pending version, enqueues an `edit` item, and appends an
    /// `offline_edit` history entry. When online, immediately triggers
    /// queue processing. Returns the created version.
    pub async fn save_offline_edit(
        &self,
        note_id: NoteId,
        user_id: &str,
        title: &str,
        content: &str,
        device_id: &str,
    ) -> Result<NoteVersion> {
        let version = self
            .versions
            .create_version(note_id, user_id, title, content, device_id)
            .await?;

        let item = SyncQueueItem::new(
            QueueOperation::Edit,
            note_id,
            Some(version.id),
            user_id,
            device_id,
            self.config.max_sync_attempts,
        );
        {
            let db = self.db.lock().await;
            LibSqlQueueRepository::new(db.connection()).insert(&item).await?;
        }

        self.history
            .add_entry(
                note_id,
                Some(version.id),
                user_id,
                HistoryAction::OfflineEdit,
                "edit captured while offline",
                serde_json::json!({ "device": device_id }),
            )
            .await?;

        if self.is_online() {
            self.process_sync_queue().await?;
        }
        Ok(version)
    }

    /// Queue a note creation made while disconnected.
    ///
    /// The note itself is created when the queue item is processed, under
    /// the returned pre-allocated ID, so retried submissions can be
    /// absorbed as duplicates.
    pub async fn save_offline_create(
        &self,
        user_id: &str,
        device_id: &str,
        title: &str,
        content: &str,
    ) -> Result<NoteId> {
        crate::versions::validate_payload(&self.config, title, content)?;

        let note_id = NoteId::new();
        let item = SyncQueueItem::new(
            QueueOperation::Create,
            note_id,
            None,
            user_id,
            device_id,
            self.config.max_sync_attempts,
        )
        .with_payload(CreatePayload {
            title: title.to_string(),
            content: content.to_string(),
        });

        {
            let db = self.db.lock().await;
            LibSqlQueueRepository::new(db.connection()).insert(&item).await?;
        }

        if self.is_online() {
            self.process_sync_queue().await?;
        }
        Ok(note_id)
    }

    /// Queue a note deletion made while disconnected
    pub async fn save_offline_delete(
        &self,
        note_id: NoteId,
        user_id: &str,
        device_id: &str,
    ) -> Result<()> {
        let item = SyncQueueItem::new(
            QueueOperation::Delete,
            note_id,
            None,
            user_id,
            device_id,
            self.config.max_sync_attempts,
        );
        {
            let db = self.db.lock().await;
            LibSqlQueueRepository::new(db.connection()).insert(&item).await?;
        }

        if self.is_online() {
            self.process_sync_queue().await?;
        }
        Ok(())
    }

    /// Replay pending queue items in enqueue order.
    ///
    /// Single-flight: a call while another pass is in progress is a no-op
    /// (`ran = false` in the report).
    pub async fn process_sync_queue(&self) -> Result<SyncReport> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(SyncReport::default());
        }
        let _guard = FlightGuard(Arc::clone(&self.in_flight));

        let items = {
            let db = self.db.lock().await;
            LibSqlQueueRepository::new(db.connection())
                .pending_in_order()
                .await?
        };

        let mut report = SyncReport {
            ran: true,
            ..SyncReport::default()
        };
        let now = chrono::Utc::now().timestamp_millis();

        for mut item in items {
            if item.next_attempt_at > now {
                report.deferred += 1;
                continue;
            }
            report.processed += 1;

            match self.process_item(&item).await {
                Ok(status) => {
                    item.status = status;
                    item.last_error = None;
                    {
                        let db = self.db.lock().await;
                        LibSqlQueueRepository::new(db.connection()).update(&item).await?;
                    }
                    match status {
                        QueueItemStatus::Synced => report.synced += 1,
                        QueueItemStatus::Conflict => report.conflicts += 1,
                        QueueItemStatus::Duplicate => report.duplicates += 1,
                        QueueItemStatus::Pending | QueueItemStatus::Failed => {}
                    }
                }
                Err(error) if error.is_retryable() => {
                    self.handle_sync_error(&mut item, &error).await?;
                    if item.status == QueueItemStatus::Failed {
                        report.failed += 1;
                    }
                }
                Err(error) => {
                    // Permanent: validation and state errors never retry
                    self.fail_item(&mut item, &error).await?;
                    report.failed += 1;
                }
            }
        }

        tracing::debug!(
            processed = report.processed,
            synced = report.synced,
            conflicts = report.conflicts,
            duplicates = report.duplicates,
            failed = report.failed,
            deferred = report.deferred,
            "Sync queue pass complete"
        );
        Ok(report)
    }

    /// Record a transient failure on an item: bump the attempt count, fail
    /// terminally at the retry budget, otherwise reschedule with
    /// exponential backoff (base delay × 2^attempts).
    pub async fn handle_sync_error(&self, item: &mut SyncQueueItem, error: &Error) -> Result<()> {
        item.attempts += 1;
        item.last_error = Some(error.to_string());

        if item.attempts >= item.max_attempts {
            item.status = QueueItemStatus::Failed;
            tracing::warn!(
                item = %item.id,
                attempts = item.attempts,
                error = %error,
                "Queue item exhausted its retry budget"
            );
            self.history
                .add_entry(
                    item.note_id,
                    item.version_id,
                    &item.user_id,
                    HistoryAction::SyncFailed,
                    "synchronization failed and needs attention",
                    serde_json::json!({
                        "attempts": item.attempts,
                        "error": error.to_string(),
                    }),
                )
                .await?;
        } else {
            let delay = self.config.backoff_delay(item.attempts);
            item.next_attempt_at = chrono::Utc::now().timestamp_millis()
                + i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
            tracing::debug!(
                item = %item.id,
                attempts = item.attempts,
                retry_in_ms = delay.as_millis(),
                "Rescheduled queue item"
            );
        }

        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).update(item).await
    }

    /// Re-enqueue the note's pending versions with a single-attempt budget
    /// and process immediately
    pub async fn force_sync_note(&self, note_id: NoteId, user_id: &str) -> Result<SyncReport> {
        let pending = {
            let db = self.db.lock().await;
            LibSqlVersionRepository::new(db.connection())
                .pending_for_note(note_id)
                .await?
        };

        let mine: Vec<_> = pending.into_iter().filter(|v| v.author_id == user_id).collect();
        if mine.is_empty() {
            return Ok(SyncReport {
                ran: true,
                ..SyncReport::default()
            });
        }

        {
            let db = self.db.lock().await;
            let queue = LibSqlQueueRepository::new(db.connection());
            for version in &mine {
                let item = SyncQueueItem::new(
                    QueueOperation::Edit,
                    note_id,
                    Some(version.id),
                    user_id,
                    &version.device_id,
                    1,
                );
                queue.insert(&item).await?;
            }
        }

        tracing::info!(note = %note_id, versions = mine.len(), "Force-syncing note");
        self.process_sync_queue().await
    }

    /// Queue items for a user, oldest first. Failed items surface here as
    /// "needs attention" rather than disappearing.
    pub async fn queue_items(&self, user_id: &str) -> Result<Vec<SyncQueueItem>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .list_for_user(user_id)
            .await
    }

    /// Aggregate queue counts, connectivity, and whether a pass is running
    pub async fn get_sync_status(&self, user_id: Option<&str>) -> Result<SyncStatus> {
        let counts = {
            let db = self.db.lock().await;
            LibSqlQueueRepository::new(db.connection())
                .counts_by_status(user_id)
                .await?
        };

        let count = |status: QueueItemStatus| counts.get(&status).copied().unwrap_or(0);
        Ok(SyncStatus {
            pending: count(QueueItemStatus::Pending),
            synced: count(QueueItemStatus::Synced),
            conflict: count(QueueItemStatus::Conflict),
            duplicate: count(QueueItemStatus::Duplicate),
            failed: count(QueueItemStatus::Failed),
            online: self.is_online(),
            in_progress: self.in_flight.load(Ordering::SeqCst),
        })
    }

    /// Purge terminal synced/duplicate items older than the threshold.
    ///
    /// History entries are never touched. Returns the number purged.
    pub async fn cleanup_sync_history(&self, max_age_days: u32) -> Result<u64> {
        let cutoff = chrono::Utc::now().timestamp_millis()
            - i64::from(max_age_days) * 24 * 60 * 60 * 1000;

        let purged = {
            let db = self.db.lock().await;
            LibSqlQueueRepository::new(db.connection())
                .purge_terminal_before(cutoff)
                .await?
        };
        if purged > 0 {
            tracing::info!(purged, max_age_days, "Purged terminal sync queue items");
        }
        Ok(purged)
    }

    async fn process_item(&self, item: &SyncQueueItem) -> Result<QueueItemStatus> {
        match item.operation {
            QueueOperation::Edit => self.process_edit(item).await,
            QueueOperation::Create => self.process_create(item).await,
            QueueOperation::Delete => self.process_delete(item).await,
        }
    }

    async fn process_edit(&self, item: &SyncQueueItem) -> Result<QueueItemStatus> {
        let version_id = item
            .version_id
            .ok_or_else(|| Error::Validation("edit item carries no version".into()))?;
        let version = self
            .versions
            .get_version(version_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("version {version_id}")))?;

        match version.sync_status {
            // A prior pass (or force-sync duplicate) already conflicted it
            VersionSyncStatus::Conflict => return Ok(QueueItemStatus::Conflict),
            VersionSyncStatus::Pending => {
                let conflicts = self.detector.detect_conflicts(item.note_id).await?;
                if conflicts.iter().any(|c| c.local_version_id == version_id) {
                    let db = self.db.lock().await;
                    LibSqlVersionRepository::new(db.connection())
                        .set_sync_status(version_id, VersionSyncStatus::Conflict)
                        .await?;
                    return Ok(QueueItemStatus::Conflict);
                }
            }
            VersionSyncStatus::Synced => {}
        }

        let note = self
            .versions
            .get_note(item.note_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("note {}", item.note_id)))?;

        self.versions.mark_synchronized(version_id).await?;

        // Promote fast-forwards only; a version already buried in the
        // current lineage must not move the pointer backwards
        let fast_forward = match note.current_version_id {
            None => true,
            Some(current_id) => {
                let db = self.db.lock().await;
                LibSqlVersionRepository::new(db.connection())
                    .ancestor_chain(version_id)
                    .await?
                    .contains(&current_id)
            }
        };
        if fast_forward {
            self.versions
                .set_current_version(item.note_id, version_id, &item.user_id)
                .await?;
        }

        self.history
            .add_entry(
                item.note_id,
                Some(version_id),
                &item.user_id,
                HistoryAction::SyncComplete,
                "offline edit synchronized",
                serde_json::json!({ "device": item.device_id }),
            )
            .await?;
        Ok(QueueItemStatus::Synced)
    }

    async fn process_create(&self, item: &SyncQueueItem) -> Result<QueueItemStatus> {
        let payload = item
            .payload
            .as_ref()
            .ok_or_else(|| Error::Validation("create item carries no payload".into()))?;

        let window_ms = i64::try_from(self.config.create_dedup_window.as_millis())
            .unwrap_or(i64::MAX);
        let window_start = chrono::Utc::now().timestamp_millis() - window_ms;

        {
            let db = self.db.lock().await;
            let notes = LibSqlNoteRepository::new(db.connection());

            if let Some(existing) = notes
                .find_recent_by_title(&item.user_id, &payload.title, window_start)
                .await?
            {
                if existing.id != item.note_id {
                    tracing::info!(
                        note = %item.note_id,
                        existing = %existing.id,
                        "Absorbed duplicate offline create"
                    );
                    return Ok(QueueItemStatus::Duplicate);
                }
                // Our own earlier attempt already landed
                return Ok(QueueItemStatus::Synced);
            }

            let now = chrono::Utc::now().timestamp_millis();
            let note = Note {
                id: item.note_id,
                title: payload.title.clone(),
                content: payload.content.clone(),
                owner_id: item.user_id.clone(),
                current_version_id: None,
                sharing: Sharing::Private,
                is_deleted: false,
                created_at: now,
                updated_at: now,
            };
            notes.insert(&note).await?;

            let mut first = NoteVersion::new(
                item.note_id,
                &item.user_id,
                &item.device_id,
                &payload.title,
                &payload.content,
                None,
            );
            first.sync_status = VersionSyncStatus::Synced;
            LibSqlVersionRepository::new(db.connection()).insert(&first).await?;
            notes.promote_version(item.note_id, first.id).await?;
        }

        self.history
            .add_entry(
                item.note_id,
                None,
                &item.user_id,
                HistoryAction::NoteCreated,
                "offline note creation synchronized",
                serde_json::json!({ "device": item.device_id }),
            )
            .await?;
        Ok(QueueItemStatus::Synced)
    }

    async fn process_delete(&self, item: &SyncQueueItem) -> Result<QueueItemStatus> {
        let deleted = {
            let db = self.db.lock().await;
            let notes = LibSqlNoteRepository::new(db.connection());
            match notes.get_any(item.note_id).await? {
                // Already gone either way: deletion is idempotent
                None => false,
                Some(note) if note.is_deleted => false,
                Some(_) => notes.soft_delete(item.note_id).await?,
            }
        };

        if deleted {
            self.history
                .add_entry(
                    item.note_id,
                    None,
                    &item.user_id,
                    HistoryAction::NoteDeleted,
                    "offline note deletion synchronized",
                    serde_json::json!({ "device": item.device_id }),
                )
                .await?;
        }
        Ok(QueueItemStatus::Synced)
    }

    async fn fail_item(&self, item: &mut SyncQueueItem, error: &Error) -> Result<()> {
        item.attempts += 1;
        item.status = QueueItemStatus::Failed;
        item.last_error = Some(error.to_string());
        tracing::warn!(item = %item.id, error = %error, "Queue item failed permanently");

        {
            let db = self.db.lock().await;
            LibSqlQueueRepository::new(db.connection()).update(item).await?;
        }
        self.history
            .add_entry(
                item.note_id,
                item.version_id,
                &item.user_id,
                HistoryAction::SyncFailed,
                "synchronization failed and needs attention",
                serde_json::json!({ "error": error.to_string() }),
            )
            .await
    }
}
