//! Engine assembly.
//!
//! Wires the services over one shared database handle, event bus, and
//! configuration. The CRUD/sharing/transport layers outside this core talk
//! to the engine through the service handles exposed here.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::access::{AccessResolver, OwnerOnlyAccess};
use crate::config::EngineConfig;
use crate::conflict::{ConflictDetector, ConflictResolver};
use crate::db::{
    Database, HistoryRepository, LibSqlHistoryRepository, LibSqlNoteRepository,
    LibSqlVersionRepository, NoteRepository, VersionRepository,
};
use crate::error::Result;
use crate::events::EventBus;
use crate::history::HistoryLog;
use crate::models::{HistoryAction, Note, NoteId, NoteVersion, VersionSyncStatus};
use crate::presence::PresenceTracker;
use crate::sync::SyncCoordinator;
use crate::versions::VersionManager;

/// The assembled sync/conflict engine
#[derive(Clone)]
pub struct Engine {
    db: Arc<Mutex<Database>>,
    /// Version creation, promotion, and pending lookups
    pub versions: VersionManager,
    /// Append-only audit log
    pub history: HistoryLog,
    /// Divergence detection
    pub detector: ConflictDetector,
    /// Resolution strategies
    pub resolver: ConflictResolver,
    /// Offline queue and retry machinery
    pub sync: SyncCoordinator,
    /// Durable editing/device session state
    pub presence: PresenceTracker,
    /// Event bus the gateway subscribes to
    pub events: EventBus,
    /// Access-list seam supplied by the sharing layer
    pub access: Arc<dyn AccessResolver>,
}

impl Engine {
    /// Open an engine over a database file
    pub async fn open(
        db_path: impl Into<PathBuf>,
        config: EngineConfig,
        access: Arc<dyn AccessResolver>,
    ) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| crate::Error::Storage(e.to_string()))?;
        }
        let db = Database::open(&db_path).await?;
        Ok(Self::assemble(db, config, access))
    }

    /// Open an in-memory engine (primarily for tests)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::assemble(
            db,
            EngineConfig::default(),
            Arc::new(OwnerOnlyAccess),
        ))
    }

    /// Open an in-memory engine with explicit config and access resolver
    pub async fn open_in_memory_with(
        config: EngineConfig,
        access: Arc<dyn AccessResolver>,
    ) -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::assemble(db, config, access))
    }

    fn assemble(db: Database, config: EngineConfig, access: Arc<dyn AccessResolver>) -> Self {
        let db = Arc::new(Mutex::new(db));
        let events = EventBus::new();

        let versions = VersionManager::new(Arc::clone(&db), events.clone(), config.clone());
        let history = HistoryLog::new(Arc::clone(&db));
        let detector = ConflictDetector::new(Arc::clone(&db), events.clone(), Arc::clone(&access));
        let resolver = ConflictResolver::new(Arc::clone(&db), events.clone());
        let sync = SyncCoordinator::new(
            Arc::clone(&db),
            versions.clone(),
            detector.clone(),
            history.clone(),
            config,
        );
        let presence = PresenceTracker::new(Arc::clone(&db));

        Self {
            db,
            versions,
            history,
            detector,
            resolver,
            sync,
            presence,
            events,
            access,
        }
    }

    /// Create a note with its first synced version, already promoted.
    ///
    /// This is the online creation path the CRUD layer uses; offline
    /// creations go through `SyncCoordinator::save_offline_create`.
    pub async fn create_note(
        &self,
        owner_id: &str,
        title: &str,
        content: &str,
        device_id: &str,
    ) -> Result<Note> {
        crate::versions::validate_payload(self.sync_config(), title, content)?;

        let note = Note::new(owner_id, title, content);
        let mut first = NoteVersion::new(note.id, owner_id, device_id, title, content, None);
        first.sync_status = VersionSyncStatus::Synced;

        {
            let db = self.db.lock().await;
            LibSqlNoteRepository::new(db.connection()).insert(&note).await?;
            LibSqlVersionRepository::new(db.connection()).insert(&first).await?;
            LibSqlNoteRepository::new(db.connection())
                .promote_version(note.id, first.id)
                .await?;
            LibSqlHistoryRepository::new(db.connection())
                .append(
                    note.id,
                    Some(first.id),
                    owner_id,
                    HistoryAction::NoteCreated,
                    "note created",
                    serde_json::json!({ "device": device_id }),
                )
                .await?;
        }

        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection())
            .get(note.id)
            .await?
            .ok_or_else(|| crate::Error::Storage("note insert lost".into()))
    }

    /// Get a note by ID, excluding soft-deleted notes
    pub async fn get_note(&self, note_id: NoteId) -> Result<Option<Note>> {
        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection()).get(note_id).await
    }

    fn sync_config(&self) -> &EngineConfig {
        self.sync.config()
    }
}
