//! Live connection registry and broadcast fan-out.
//!
//! One channel per (user, device). The registry is an in-memory index over
//! the durable `device_sessions`/`editing_sessions` rows owned by the
//! engine's presence tracker; it can always be rebuilt from them after a
//! restart. Delivery is scoped by the note's access list, which the
//! sharing layer supplies through the engine's `AccessResolver`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::Message;
use quill_core::models::NoteId;
use quill_core::{Engine, NoteEvent};
use tokio::sync::{mpsc, RwLock};

use crate::ws::Envelope;

struct ClientHandle {
    user_id: String,
    tx: mpsc::UnboundedSender<Message>,
    last_seen: Instant,
}

/// Registry of live channels plus the broadcast rules of the gateway
pub struct PresenceRegistry {
    engine: Engine,
    channels: RwLock<HashMap<String, ClientHandle>>,
    inactivity_timeout: Duration,
}

impl PresenceRegistry {
    pub fn new(engine: Engine, inactivity_timeout: Duration) -> Self {
        Self {
            engine,
            channels: RwLock::new(HashMap::new()),
            inactivity_timeout,
        }
    }

    /// Rebuild in-memory presence from the durable session rows.
    ///
    /// Channels cannot be restored (clients must reconnect), so stale rows
    /// from before the restart are cleared and their editing sessions
    /// stopped.
    pub async fn restore(&self) -> quill_core::Result<()> {
        let devices = self.engine.presence.devices().await?;
        for device in &devices {
            for session in self
                .engine
                .presence
                .sessions_for_device(&device.device_id)
                .await?
            {
                self.engine
                    .presence
                    .stop_editing(session.note_id, &session.user_id)
                    .await?;
            }
            self.engine
                .presence
                .disconnect_device(&device.device_id)
                .await?;
        }
        if !devices.is_empty() {
            tracing::info!(stale = devices.len(), "Cleared device sessions from previous run");
        }
        Ok(())
    }

    /// Register a live channel for a (user, device) pair
    pub async fn register(
        &self,
        user_id: &str,
        device_id: &str,
        tx: mpsc::UnboundedSender<Message>,
    ) -> quill_core::Result<()> {
        self.engine.presence.connect_device(device_id, user_id).await?;

        let mut channels = self.channels.write().await;
        channels.insert(
            device_id.to_string(),
            ClientHandle {
                user_id: user_id.to_string(),
                tx,
                last_seen: Instant::now(),
            },
        );
        tracing::info!(user = user_id, device = device_id, "Channel registered");
        Ok(())
    }

    /// Drop a channel and force-stop the editing sessions it carried
    pub async fn unregister(&self, device_id: &str) -> quill_core::Result<()> {
        {
            let mut channels = self.channels.write().await;
            channels.remove(device_id);
        }

        for session in self.engine.presence.sessions_for_device(device_id).await? {
            if self
                .engine
                .presence
                .stop_editing(session.note_id, &session.user_id)
                .await?
            {
                self.broadcast_editing(session.note_id, &session.user_id, false)
                    .await?;
            }
        }
        self.engine.presence.disconnect_device(device_id).await?;
        tracing::info!(device = device_id, "Channel unregistered");
        Ok(())
    }

    /// Record activity on a device's channel
    pub async fn touch(&self, device_id: &str) -> quill_core::Result<()> {
        {
            let mut channels = self.channels.write().await;
            if let Some(handle) = channels.get_mut(device_id) {
                handle.last_seen = Instant::now();
            }
        }
        self.engine.presence.touch_device(device_id).await
    }

    /// Start (or refresh) an editing session.
    ///
    /// Broadcasts `user_editing: true` exactly once per activation; a
    /// repeated start refreshes the session without re-broadcasting.
    pub async fn start_editing(
        &self,
        note_id: NoteId,
        user_id: &str,
        device_id: &str,
    ) -> quill_core::Result<()> {
        let activated = self
            .engine
            .presence
            .start_editing(note_id, user_id, device_id)
            .await?;
        if activated {
            self.broadcast_editing(note_id, user_id, true).await?;
        }
        Ok(())
    }

    /// Stop an editing session; broadcasts only when one was active
    pub async fn stop_editing(&self, note_id: NoteId, user_id: &str) -> quill_core::Result<()> {
        if self.engine.presence.stop_editing(note_id, user_id).await? {
            self.broadcast_editing(note_id, user_id, false).await?;
        }
        Ok(())
    }

    /// Relay a note update to every other user with access to the note
    pub async fn note_updated(
        &self,
        note_id: NoteId,
        data: serde_json::Value,
        origin_user_id: &str,
    ) -> quill_core::Result<()> {
        let envelope = Envelope::new("note_updated", data);
        self.broadcast_to_note(note_id, Some(origin_user_id), None, &envelope)
            .await
    }

    /// Notify every user with access, including the detecting user's other
    /// devices, that a conflict exists
    pub async fn conflict_detected(
        &self,
        note_id: NoteId,
        data: serde_json::Value,
        origin_device_id: Option<&str>,
    ) -> quill_core::Result<()> {
        let envelope = Envelope::new("conflict_detected", data);
        self.broadcast_to_note(note_id, None, origin_device_id, &envelope)
            .await
    }

    /// Fan an engine event out to the devices that should hear it
    pub async fn broadcast_event(&self, event: &NoteEvent) -> quill_core::Result<()> {
        match event {
            NoteEvent::NoteUpdated {
                note_id,
                version_id,
                title,
                content,
                content_hash,
                origin_user_id,
                origin_device_id,
            } => {
                let envelope = Envelope::new(
                    "note_updated",
                    serde_json::json!({
                        "note_id": note_id.as_str(),
                        "version_id": version_id.as_str(),
                        "title": title,
                        "content": content,
                        "content_hash": content_hash,
                        "origin_device_id": origin_device_id,
                    }),
                );
                self.broadcast_to_note(*note_id, Some(origin_user_id), None, &envelope)
                    .await
            }
            NoteEvent::ConflictDetected {
                note_id,
                conflict_id,
                detected_by,
            } => {
                let envelope = Envelope::new(
                    "conflict_detected",
                    serde_json::json!({
                        "note_id": note_id.as_str(),
                        "conflict_id": conflict_id.as_str(),
                        "detected_by": detected_by,
                    }),
                );
                self.broadcast_to_note(*note_id, None, None, &envelope).await
            }
            NoteEvent::ConflictResolved {
                note_id,
                conflict_id,
                resolution,
                resolved_by,
            } => {
                let envelope = Envelope::new(
                    "conflict_resolved",
                    serde_json::json!({
                        "note_id": note_id.as_str(),
                        "conflict_id": conflict_id.as_str(),
                        "resolution": resolution.as_str(),
                        "resolved_by": resolved_by,
                    }),
                );
                self.broadcast_to_note(*note_id, None, None, &envelope).await
            }
        }
    }

    /// Close channels idle past the inactivity threshold and ping the rest.
    ///
    /// Force-stopped editing sessions broadcast `user_editing: false` the
    /// same as an explicit stop.
    pub async fn sweep_inactive(&self) -> quill_core::Result<()> {
        let stale: Vec<String> = {
            let mut channels = self.channels.write().await;
            let stale: Vec<String> = channels
                .iter()
                .filter(|(_, handle)| handle.last_seen.elapsed() > self.inactivity_timeout)
                .map(|(device, _)| device.clone())
                .collect();

            for device in &stale {
                if let Some(handle) = channels.remove(device) {
                    let _ = handle.tx.send(Message::Close(None));
                }
            }
            for handle in channels.values() {
                let _ = handle.tx.send(Message::Ping(Vec::new().into()));
            }
            stale
        };

        for device in stale {
            tracing::info!(device = %device, "Closed inactive channel");
            self.unregister(&device).await?;
        }

        // Editing sessions can also go stale while their channel stays
        // alive (a reader who stopped typing); force-stop those too
        let editing_timeout = self.engine.sync.config().editing_inactivity_timeout;
        let cutoff = chrono::Utc::now().timestamp_millis()
            - i64::try_from(editing_timeout.as_millis()).unwrap_or(i64::MAX);
        for session in self.engine.presence.stale_sessions(cutoff).await? {
            if self
                .engine
                .presence
                .stop_editing(session.note_id, &session.user_id)
                .await?
            {
                tracing::info!(
                    note = %session.note_id,
                    user = %session.user_id,
                    "Force-stopped stale editing session"
                );
                self.broadcast_editing(session.note_id, &session.user_id, false)
                    .await?;
            }
        }
        Ok(())
    }

    /// Number of live channels
    pub async fn connection_count(&self) -> usize {
        self.channels.read().await.len()
    }

    async fn broadcast_editing(
        &self,
        note_id: NoteId,
        editing_user: &str,
        editing: bool,
    ) -> quill_core::Result<()> {
        let envelope = Envelope::new(
            "user_editing",
            serde_json::json!({
                "note_id": note_id.as_str(),
                "user_id": editing_user,
                "editing": editing,
            }),
        );
        self.broadcast_to_note(note_id, Some(editing_user), None, &envelope)
            .await
    }

    async fn broadcast_to_note(
        &self,
        note_id: NoteId,
        exclude_user: Option<&str>,
        exclude_device: Option<&str>,
        envelope: &Envelope,
    ) -> quill_core::Result<()> {
        let Some(note) = self.engine.get_note(note_id).await? else {
            return Ok(());
        };
        let audience = self.engine.access.access_list(&note).await;

        let message = Message::Text(serde_json::to_string(envelope)?.into());
        let channels = self.channels.read().await;
        for (device, handle) in channels.iter() {
            if Some(handle.user_id.as_str()) == exclude_user {
                continue;
            }
            if Some(device.as_str()) == exclude_device {
                continue;
            }
            if !audience.iter().any(|user| user == &handle.user_id) {
                continue;
            }
            // A full or closed channel is the sweeper's problem, not ours
            let _ = handle.tx.send(message.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::access::testing::StaticAccess;
    use quill_core::EngineConfig;

    async fn shared_note_setup() -> (Arc<PresenceRegistry>, NoteId, mpsc::UnboundedReceiver<Message>)
    {
        // user-1 owns the note; user-2 is a collaborator with a channel
        let access = StaticAccess::new();
        let engine =
            Engine::open_in_memory_with(EngineConfig::default(), Arc::new(access.clone()))
                .await
                .unwrap();
        let note = engine.create_note("user-1", "Draft", "v0", "device-1").await.unwrap();
        access.grant(note.id, "user-2");

        let registry = Arc::new(PresenceRegistry::new(engine, Duration::from_secs(60)));
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register("user-2", "device-2", tx).await.unwrap();
        (registry, note.id, rx)
    }

    fn drain_envelopes(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Envelope> {
        let mut envelopes = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let Message::Text(text) = message {
                envelopes.push(serde_json::from_str(&text).unwrap());
            }
        }
        envelopes
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_repeated_start_editing_broadcasts_once() {
        let (registry, note_id, mut rx) = shared_note_setup().await;

        registry.start_editing(note_id, "user-1", "device-1").await.unwrap();
        registry.start_editing(note_id, "user-1", "device-1").await.unwrap();

        let envelopes = drain_envelopes(&mut rx);
        let editing: Vec<_> = envelopes.iter().filter(|e| e.kind == "user_editing").collect();
        assert_eq!(editing.len(), 1);
        assert_eq!(editing[0].data["editing"], serde_json::json!(true));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_editing_broadcasts_exactly_once() {
        let (registry, note_id, mut rx) = shared_note_setup().await;

        registry.start_editing(note_id, "user-1", "device-1").await.unwrap();
        registry.stop_editing(note_id, "user-1").await.unwrap();
        registry.stop_editing(note_id, "user-1").await.unwrap();

        let envelopes = drain_envelopes(&mut rx);
        let stops: Vec<_> = envelopes
            .iter()
            .filter(|e| e.kind == "user_editing" && e.data["editing"] == serde_json::json!(false))
            .collect();
        assert_eq!(stops.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_note_update_excludes_origin_user() {
        let (registry, note_id, mut rx) = shared_note_setup().await;

        // user-2's own update must not echo back to user-2
        registry
            .note_updated(note_id, serde_json::json!({ "note_id": note_id.as_str() }), "user-2")
            .await
            .unwrap();
        assert!(drain_envelopes(&mut rx).is_empty());

        // user-1's update reaches user-2
        registry
            .note_updated(note_id, serde_json::json!({ "note_id": note_id.as_str() }), "user-1")
            .await
            .unwrap();
        let envelopes = drain_envelopes(&mut rx);
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].kind, "note_updated");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_conflict_broadcast_reaches_all_users() {
        let (registry, note_id, mut rx) = shared_note_setup().await;

        registry
            .conflict_detected(
                note_id,
                serde_json::json!({ "note_id": note_id.as_str(), "conflict_type": "edit" }),
                Some("device-9"),
            )
            .await
            .unwrap();

        let envelopes = drain_envelopes(&mut rx);
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].kind, "conflict_detected");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unregister_stops_editing_sessions() {
        let (registry, note_id, mut rx) = shared_note_setup().await;

        // user-2 edits from its registered device, then the channel dies
        registry.start_editing(note_id, "user-2", "device-2").await.unwrap();
        registry.unregister("device-2").await.unwrap();

        // user-2's channel is gone, so nothing arrives there; the durable
        // session is closed
        let sessions = registry.engine.presence.editors_of(note_id).await.unwrap();
        assert!(sessions.is_empty());
        drain_envelopes(&mut rx);
        assert_eq!(registry.connection_count().await, 0);
    }
}
