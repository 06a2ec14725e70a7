//! Durable presence state.
//!
//! Editing and device sessions live in the store; the gateway's in-memory
//! connection registry is an index over these rows and is rebuilt from them
//! after a restart. This service owns the row lifecycle so the transport
//! layer never touches SQL.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{Database, LibSqlSessionRepository, SessionRepository};
use crate::error::Result;
use crate::models::{DeviceSession, EditingSession, NoteId};

/// Thread-safe presence tracker sharing the engine's database handle
#[derive(Clone)]
pub struct PresenceTracker {
    db: Arc<Mutex<Database>>,
}

impl PresenceTracker {
    /// Create a tracker over a shared database handle
    #[must_use]
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Activate the editing session for a (note, user) pair.
    ///
    /// Returns true only when this call activated the session; a repeated
    /// start is a refresh, so callers broadcast `user_editing` exactly once
    /// per activation.
    pub async fn start_editing(
        &self,
        note_id: NoteId,
        user_id: &str,
        device_id: &str,
    ) -> Result<bool> {
        let session = EditingSession::start(note_id, user_id, device_id);
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection())
            .start_editing(&session)
            .await
    }

    /// Close the editing session; returns true when one was active
    pub async fn stop_editing(&self, note_id: NoteId, user_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection())
            .stop_editing(note_id, user_id)
            .await
    }

    /// Refresh an active editing session's activity timestamp
    pub async fn touch_editing(&self, note_id: NoteId, user_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection())
            .touch_editing(note_id, user_id)
            .await
    }

    /// Who is actively editing a note
    pub async fn editors_of(&self, note_id: NoteId) -> Result<Vec<EditingSession>> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection())
            .active_for_note(note_id)
            .await
    }

    /// Active editing sessions opened from one device
    pub async fn sessions_for_device(&self, device_id: &str) -> Result<Vec<EditingSession>> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection())
            .active_for_device(device_id)
            .await
    }

    /// Active editing sessions with no activity since `cutoff` (Unix ms)
    pub async fn stale_sessions(&self, cutoff: i64) -> Result<Vec<EditingSession>> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection())
            .stale_active(cutoff)
            .await
    }

    /// Register or refresh a device's live channel
    pub async fn connect_device(&self, device_id: &str, user_id: &str) -> Result<()> {
        let session = DeviceSession::connect(device_id, user_id);
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection())
            .upsert_device(&session)
            .await
    }

    /// Refresh a device's last-seen timestamp
    pub async fn touch_device(&self, device_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection())
            .touch_device(device_id)
            .await
    }

    /// Drop a device's session row on disconnect
    pub async fn disconnect_device(&self, device_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection())
            .remove_device(device_id)
            .await
    }

    /// All known device sessions; the gateway rebuilds its registry from
    /// these after a restart
    pub async fn devices(&self) -> Result<Vec<DeviceSession>> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection()).all_devices().await
    }
}
