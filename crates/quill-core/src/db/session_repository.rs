//! Presence session repository implementation

use crate::error::{Error, Result};
use crate::models::{DeviceSession, EditingSession, NoteId, SessionStatus};
use libsql::{params, Connection, Row};

/// Trait for presence session storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SessionRepository {
    /// Start (or re-activate) the editing session for a (note, user) pair.
    ///
    /// Returns true when this call activated the session, false when it
    /// was already active (a refresh, not a new activation).
    async fn start_editing(&self, session: &EditingSession) -> Result<bool>;

    /// Mark the editing session inactive; returns false when there was no
    /// active session
    async fn stop_editing(&self, note_id: NoteId, user_id: &str) -> Result<bool>;

    /// Refresh an active session's last-activity timestamp
    async fn touch_editing(&self, note_id: NoteId, user_id: &str) -> Result<()>;

    /// Active editing sessions on a note
    async fn active_for_note(&self, note_id: NoteId) -> Result<Vec<EditingSession>>;

    /// Active editing sessions opened from a device; stopped together when
    /// the device's channel closes
    async fn active_for_device(&self, device_id: &str) -> Result<Vec<EditingSession>>;

    /// Active editing sessions with no activity since `cutoff` (Unix ms)
    async fn stale_active(&self, cutoff: i64) -> Result<Vec<EditingSession>>;

    /// Register or refresh a device session
    async fn upsert_device(&self, session: &DeviceSession) -> Result<()>;

    /// Refresh a device session's last-seen timestamp
    async fn touch_device(&self, device_id: &str) -> Result<()>;

    /// Remove a device session on disconnect
    async fn remove_device(&self, device_id: &str) -> Result<()>;

    /// All device sessions; the gateway rebuilds its registry from these
    async fn all_devices(&self) -> Result<Vec<DeviceSession>>;
}

/// libSQL implementation of `SessionRepository`
pub struct LibSqlSessionRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSessionRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_editing(row: &Row) -> Result<EditingSession> {
        let note_id: String = row.get(0)?;
        let status: String = row.get(3)?;

        Ok(EditingSession {
            note_id: note_id
                .parse::<NoteId>()
                .map_err(|_| Error::Storage("corrupt note id".into()))?,
            user_id: row.get(1)?,
            device_id: row.get(2)?,
            status: status.parse::<SessionStatus>().map_err(Error::Storage)?,
            started_at: row.get(4)?,
            last_activity_at: row.get(5)?,
        })
    }
}

impl SessionRepository for LibSqlSessionRepository<'_> {
    async fn start_editing(&self, session: &EditingSession) -> Result<bool> {
        // Upsert keyed on (note, user); only an inactive-to-active flip or
        // a fresh row counts as an activation
        let mut rows = self
            .conn
            .query(
                "SELECT status FROM editing_sessions WHERE note_id = ? AND user_id = ?",
                params![session.note_id.as_str(), session.user_id.clone()],
            )
            .await?;

        let already_active = match rows.next().await? {
            Some(row) => row.get::<String>(0)? == "active",
            None => false,
        };

        self.conn
            .execute(
                "INSERT INTO editing_sessions
                    (note_id, user_id, device_id, status, started_at, last_activity_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT (note_id, user_id) DO UPDATE SET
                    device_id = excluded.device_id,
                    status = excluded.status,
                    last_activity_at = excluded.last_activity_at",
                params![
                    session.note_id.as_str(),
                    session.user_id.clone(),
                    session.device_id.clone(),
                    session.status.as_str(),
                    session.started_at,
                    session.last_activity_at
                ],
            )
            .await?;

        Ok(!already_active)
    }

    async fn stop_editing(&self, note_id: NoteId, user_id: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp_millis();
        let affected = self
            .conn
            .execute(
                "UPDATE editing_sessions
                 SET status = 'inactive', last_activity_at = ?
                 WHERE note_id = ? AND user_id = ? AND status = 'active'",
                params![now, note_id.as_str(), user_id],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn touch_editing(&self, note_id: NoteId, user_id: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn
            .execute(
                "UPDATE editing_sessions SET last_activity_at = ?
                 WHERE note_id = ? AND user_id = ? AND status = 'active'",
                params![now, note_id.as_str(), user_id],
            )
            .await?;
        Ok(())
    }

    async fn active_for_note(&self, note_id: NoteId) -> Result<Vec<EditingSession>> {
        let mut rows = self
            .conn
            .query(
                "SELECT note_id, user_id, device_id, status, started_at, last_activity_at
                 FROM editing_sessions WHERE note_id = ? AND status = 'active'",
                [note_id.as_str()],
            )
            .await?;

        let mut sessions = Vec::new();
        while let Some(row) = rows.next().await? {
            sessions.push(Self::parse_editing(&row)?);
        }
        Ok(sessions)
    }

    async fn active_for_device(&self, device_id: &str) -> Result<Vec<EditingSession>> {
        let mut rows = self
            .conn
            .query(
                "SELECT note_id, user_id, device_id, status, started_at, last_activity_at
                 FROM editing_sessions WHERE device_id = ? AND status = 'active'",
                [device_id],
            )
            .await?;

        let mut sessions = Vec::new();
        while let Some(row) = rows.next().await? {
            sessions.push(Self::parse_editing(&row)?);
        }
        Ok(sessions)
    }

    async fn stale_active(&self, cutoff: i64) -> Result<Vec<EditingSession>> {
        let mut rows = self
            .conn
            .query(
                "SELECT note_id, user_id, device_id, status, started_at, last_activity_at
                 FROM editing_sessions WHERE status = 'active' AND last_activity_at < ?",
                [cutoff],
            )
            .await?;

        let mut sessions = Vec::new();
        while let Some(row) = rows.next().await? {
            sessions.push(Self::parse_editing(&row)?);
        }
        Ok(sessions)
    }

    async fn upsert_device(&self, session: &DeviceSession) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO device_sessions (device_id, user_id, connected_at, last_seen_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT (device_id) DO UPDATE SET
                    user_id = excluded.user_id,
                    connected_at = excluded.connected_at,
                    last_seen_at = excluded.last_seen_at",
                params![
                    session.device_id.clone(),
                    session.user_id.clone(),
                    session.connected_at,
                    session.last_seen_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn touch_device(&self, device_id: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn
            .execute(
                "UPDATE device_sessions SET last_seen_at = ? WHERE device_id = ?",
                params![now, device_id],
            )
            .await?;
        Ok(())
    }

    async fn remove_device(&self, device_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM device_sessions WHERE device_id = ?", [device_id])
            .await?;
        Ok(())
    }

    async fn all_devices(&self) -> Result<Vec<DeviceSession>> {
        let mut rows = self
            .conn
            .query(
                "SELECT device_id, user_id, connected_at, last_seen_at FROM device_sessions",
                (),
            )
            .await?;

        let mut sessions = Vec::new();
        while let Some(row) = rows.next().await? {
            sessions.push(DeviceSession {
                device_id: row.get(0)?,
                user_id: row.get(1)?,
                connected_at: row.get(2)?,
                last_seen_at: row.get(3)?,
            });
        }
        Ok(sessions)
    }
}
