//! Note event bus.
//!
//! Publish/subscribe layer decoupling the engine (version manager, conflict
//! detector, resolver) from transport-specific delivery. Topics are note
//! identifiers; the gateway typically takes the firehose subscription and
//! scopes delivery by access list itself.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

use crate::models::{ConflictId, NoteId, ResolutionType, VersionId};

const CHANNEL_CAPACITY: usize = 256;

/// Something collaborators should hear about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NoteEvent {
    /// A new version became the note's current version
    NoteUpdated {
        note_id: NoteId,
        version_id: VersionId,
        title: String,
        content: String,
        content_hash: String,
        origin_user_id: String,
        origin_device_id: String,
    },
    /// Divergent versions were detected on a note
    ConflictDetected {
        note_id: NoteId,
        conflict_id: ConflictId,
        detected_by: String,
    },
    /// A conflict was resolved
    ConflictResolved {
        note_id: NoteId,
        conflict_id: ConflictId,
        resolution: ResolutionType,
        resolved_by: String,
    },
}

impl NoteEvent {
    /// Note this event concerns
    #[must_use]
    pub const fn note_id(&self) -> NoteId {
        match self {
            Self::NoteUpdated { note_id, .. }
            | Self::ConflictDetected { note_id, .. }
            | Self::ConflictResolved { note_id, .. } => *note_id,
        }
    }
}

/// Per-note broadcast registry plus a firehose channel.
///
/// Cheap to clone; all clones share the same channels.
#[derive(Clone)]
pub struct EventBus {
    topics: Arc<RwLock<HashMap<NoteId, broadcast::Sender<NoteEvent>>>>,
    firehose: broadcast::Sender<NoteEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        let (firehose, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            firehose,
        }
    }

    /// Publish an event to its note topic and the firehose.
    ///
    /// Send failures mean nobody is listening; that is not an error.
    pub async fn publish(&self, event: NoteEvent) {
        let note_id = event.note_id();
        {
            let topics = self.topics.read().await;
            if let Some(sender) = topics.get(&note_id) {
                let _ = sender.send(event.clone());
            }
        }
        let _ = self.firehose.send(event);
    }

    /// Subscribe to one note's events, creating the topic if needed
    pub async fn subscribe(&self, note_id: NoteId) -> broadcast::Receiver<NoteEvent> {
        {
            let topics = self.topics.read().await;
            if let Some(sender) = topics.get(&note_id) {
                return sender.subscribe();
            }
        }

        let mut topics = self.topics.write().await;
        // Double-check after acquiring write lock
        if let Some(sender) = topics.get(&note_id) {
            return sender.subscribe();
        }
        let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
        topics.insert(note_id, sender);
        receiver
    }

    /// Subscribe to every event regardless of note
    #[must_use]
    pub fn subscribe_all(&self) -> broadcast::Receiver<NoteEvent> {
        self.firehose.subscribe()
    }

    /// Drop topics nobody subscribes to anymore
    pub async fn prune(&self) {
        let mut topics = self.topics.write().await;
        topics.retain(|_, sender| sender.receiver_count() > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn updated_event(note_id: NoteId) -> NoteEvent {
        NoteEvent::NoteUpdated {
            note_id,
            version_id: VersionId::new(),
            title: "Draft".into(),
            content: "v1".into(),
            content_hash: "abc".into(),
            origin_user_id: "user-1".into(),
            origin_device_id: "device-1".into(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_topic_subscriber_receives_only_its_note() {
        let bus = EventBus::new();
        let note_a = NoteId::new();
        let note_b = NoteId::new();

        let mut rx = bus.subscribe(note_a).await;
        bus.publish(updated_event(note_b)).await;
        bus.publish(updated_event(note_a)).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.note_id(), note_a);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_firehose_receives_everything() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_all();

        bus.publish(updated_event(NoteId::new())).await;
        bus.publish(updated_event(NoteId::new())).await;

        assert!(rx.recv().await.is_ok());
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_prune_drops_idle_topics() {
        let bus = EventBus::new();
        let note_id = NoteId::new();
        drop(bus.subscribe(note_id).await);

        bus.prune().await;
        let topics = bus.topics.read().await;
        assert!(topics.is_empty());
    }
}
