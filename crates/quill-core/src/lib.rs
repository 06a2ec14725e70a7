//! quill-core - Core library for Quill
//!
//! This crate contains the shared models, storage layer, and the
//! synchronization/conflict-resolution engine used by the Quill gateway:
//! version tracking, offline edit queuing with retry, conflict detection
//! and resolution, append-only history, and the note event bus.

pub mod access;
pub mod config;
pub mod conflict;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod models;
pub mod presence;
pub mod sync;
pub mod versions;

pub use access::{AccessResolver, OwnerOnlyAccess};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Error, Result};
pub use events::{EventBus, NoteEvent};
pub use models::{Note, NoteId, NoteVersion, VersionId};
