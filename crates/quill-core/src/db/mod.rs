//! Database layer for Quill

mod conflict_repository;
mod connection;
mod history_repository;
mod migrations;
mod note_repository;
mod queue_repository;
mod session_repository;
mod version_repository;

pub use conflict_repository::{ConflictRepository, LibSqlConflictRepository};
pub use connection::Database;
pub use history_repository::{HistoryRepository, LibSqlHistoryRepository};
pub use note_repository::{LibSqlNoteRepository, NoteRepository};
pub use queue_repository::{LibSqlQueueRepository, QueueRepository};
pub use session_repository::{LibSqlSessionRepository, SessionRepository};
pub use version_repository::{LibSqlVersionRepository, VersionRepository};
