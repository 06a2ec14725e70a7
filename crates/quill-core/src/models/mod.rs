//! Data models for Quill

mod conflict;
mod history;
mod note;
mod queue;
mod session;
mod version;

pub use conflict::{Conflict, ConflictComplexity, ConflictId, ConflictStatus, ResolutionType};
pub use history::{HistoryAction, HistoryEntry};
pub use note::{Note, NoteId, Sharing};
pub use queue::{
    CreatePayload, QueueItemId, QueueItemStatus, QueueOperation, SyncQueueItem,
};
pub use session::{DeviceSession, EditingSession, SessionStatus};
pub use version::{content_hash, NoteVersion, VersionId, VersionSyncStatus};
