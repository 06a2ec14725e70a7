//! End-to-end scenarios for the sync/conflict engine.
//!
//! Each test drives the engine the way the CRUD and transport layers do:
//! online edits go through the version manager directly, offline edits
//! through the sync coordinator's queue.

use pretty_assertions::assert_eq;
use quill_core::error::Error;
use quill_core::models::{
    HistoryAction, NoteVersion, QueueItemStatus, ResolutionType, VersionSyncStatus,
};
use quill_core::conflict::MergeData;
use quill_core::{Engine, NoteId};

const USER: &str = "user-1";
const DEVICE_1: &str = "device-1";
const DEVICE_2: &str = "device-2";

async fn engine() -> Engine {
    Engine::open_in_memory().await.unwrap()
}

/// Make an online edit: create the version and synchronize it immediately,
/// the way the CRUD layer does when the client is connected.
async fn online_edit(
    engine: &Engine,
    note_id: NoteId,
    user: &str,
    title: &str,
    content: &str,
    device: &str,
) -> NoteVersion {
    let version = engine
        .versions
        .create_version(note_id, user, title, content, device)
        .await
        .unwrap();
    engine.versions.mark_synchronized(version.id).await.unwrap();
    engine
        .versions
        .set_current_version(note_id, version.id, user)
        .await
        .unwrap();
    version
}

#[tokio::test(flavor = "multi_thread")]
async fn current_version_is_always_synced() {
    let engine = engine().await;
    let note = engine.create_note(USER, "Draft", "v0", DEVICE_1).await.unwrap();

    engine
        .sync
        .save_offline_edit(note.id, USER, "Draft", "v1", DEVICE_1)
        .await
        .unwrap();

    let note = engine.get_note(note.id).await.unwrap().unwrap();
    let current = engine
        .versions
        .get_version(note.current_version_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.sync_status, VersionSyncStatus::Synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn promoting_pending_version_is_rejected() {
    let engine = engine().await;
    let note = engine.create_note(USER, "Draft", "v0", DEVICE_1).await.unwrap();

    let pending = engine
        .versions
        .create_version(note.id, USER, "Draft", "v1", DEVICE_1)
        .await
        .unwrap();

    let result = engine
        .versions
        .set_current_version(note.id, pending.id, USER)
        .await;
    assert!(matches!(result, Err(Error::InvalidState(_))));

    // The pointer did not move
    let note = engine.get_note(note.id).await.unwrap().unwrap();
    assert_ne!(note.current_version_id, Some(pending.id));
}

#[tokio::test(flavor = "multi_thread")]
async fn mark_synchronized_is_idempotent() {
    let engine = engine().await;
    let note = engine.create_note(USER, "Draft", "v0", DEVICE_1).await.unwrap();

    let version = engine
        .versions
        .create_version(note.id, USER, "Draft", "v1", DEVICE_1)
        .await
        .unwrap();

    engine.versions.mark_synchronized(version.id).await.unwrap();
    engine.versions.mark_synchronized(version.id).await.unwrap();

    let stored = engine.versions.get_version(version.id).await.unwrap().unwrap();
    assert_eq!(stored.sync_status, VersionSyncStatus::Synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn promoted_version_round_trips_content_and_hash() {
    let engine = engine().await;
    let note = engine.create_note(USER, "Draft", "v0", DEVICE_1).await.unwrap();

    let version = online_edit(&engine, note.id, USER, "Final", "the final text", DEVICE_1).await;

    let note = engine.get_note(note.id).await.unwrap().unwrap();
    assert_eq!(note.current_version_id, Some(version.id));
    assert_eq!(note.title, "Final");
    assert_eq!(note.content, "the final text");

    let current = engine.versions.get_version(version.id).await.unwrap().unwrap();
    assert_eq!(current.content, version.content);
    assert_eq!(current.content_hash, version.content_hash);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_edits_produce_exactly_one_conflict() {
    let engine = engine().await;
    let note = engine.create_note(USER, "Draft", "v0", DEVICE_1).await.unwrap();

    // Device 1 edits while offline
    engine.sync.set_online(false).await.unwrap();
    let local = engine
        .sync
        .save_offline_edit(note.id, USER, "Draft", "v1", DEVICE_1)
        .await
        .unwrap();

    // Device 2 edits online before device 1 reconnects
    let remote = online_edit(&engine, note.id, USER, "Draft", "v2", DEVICE_2).await;

    // Device 1 reconnects
    engine.sync.set_online(true).await.unwrap();

    let conflicts = engine.detector.get_pending_conflicts(USER).await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].local_version_id, local.id);
    assert_eq!(conflicts[0].remote_version_id, remote.id);

    // The diverged version is blocked, the current pointer untouched
    let local = engine.versions.get_version(local.id).await.unwrap().unwrap();
    assert_eq!(local.sync_status, VersionSyncStatus::Conflict);
    let note = engine.get_note(note.id).await.unwrap().unwrap();
    assert_eq!(note.current_version_id, Some(remote.id));

    // Re-detection does not duplicate the record
    let again = engine.detector.detect_conflicts(note.id).await.unwrap();
    assert!(again.is_empty() || again.len() == 1);
    let conflicts = engine.detector.get_pending_conflicts(USER).await.unwrap();
    assert_eq!(conflicts.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_budget_exhaustion_fails_terminally() {
    let engine = engine().await;
    let note = engine.create_note(USER, "Draft", "v0", DEVICE_1).await.unwrap();

    engine.sync.set_online(false).await.unwrap();
    engine
        .sync
        .save_offline_edit(note.id, USER, "Draft", "v1", DEVICE_1)
        .await
        .unwrap();

    let mut item = engine.sync.queue_items(USER).await.unwrap().remove(0);
    assert_eq!(item.max_attempts, 3);

    for _ in 0..3 {
        let error = Error::Storage("connection reset".into());
        engine.sync.handle_sync_error(&mut item, &error).await.unwrap();
        assert!(item.attempts <= item.max_attempts);
    }

    assert_eq!(item.status, QueueItemStatus::Failed);
    assert_eq!(item.attempts, 3);

    // No further retry is scheduled: a queue pass finds nothing to do
    let report = engine.sync.process_sync_queue().await.unwrap();
    assert!(report.ran);
    assert_eq!(report.processed, 0);

    // The failure is surfaced, not swallowed
    let items = engine.sync.queue_items(USER).await.unwrap();
    assert_eq!(items[0].status, QueueItemStatus::Failed);
    assert!(items[0].last_error.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_offline_creates_are_absorbed() {
    let engine = engine().await;

    engine.sync.set_online(false).await.unwrap();
    let first = engine
        .sync
        .save_offline_create(USER, DEVICE_1, "Shopping list", "milk")
        .await
        .unwrap();
    let second = engine
        .sync
        .save_offline_create(USER, DEVICE_1, "Shopping list", "milk")
        .await
        .unwrap();

    engine.sync.set_online(true).await.unwrap();

    let status = engine.sync.get_sync_status(Some(USER)).await.unwrap();
    assert_eq!(status.synced, 1);
    assert_eq!(status.duplicate, 1);

    // Only the first create materialized a note
    assert!(engine.get_note(first).await.unwrap().is_some());
    assert!(engine.get_note(second).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn keep_remote_resolution_keeps_current_and_records_history() {
    let engine = engine().await;
    let note = engine.create_note(USER, "Draft", "v0", DEVICE_1).await.unwrap();

    engine.sync.set_online(false).await.unwrap();
    let local = engine
        .sync
        .save_offline_edit(note.id, USER, "Draft", "v1", DEVICE_1)
        .await
        .unwrap();
    let remote = online_edit(&engine, note.id, USER, "Draft", "v2", DEVICE_2).await;
    engine.sync.set_online(true).await.unwrap();

    let conflict = engine.detector.get_pending_conflicts(USER).await.unwrap().remove(0);
    let outcome = engine
        .resolver
        .resolve_conflict(conflict.id, ResolutionType::KeepRemote, None, USER)
        .await
        .unwrap();
    assert_eq!(outcome.promoted_version_id, Some(remote.id));

    let note = engine.get_note(note.id).await.unwrap().unwrap();
    assert_eq!(note.current_version_id, Some(remote.id));

    // Exactly one conflict_resolved entry
    let entries = engine.history.entries_for_note(note.id, 100).await.unwrap();
    let resolved: Vec<_> = entries
        .iter()
        .filter(|e| e.action == HistoryAction::ConflictResolved)
        .collect();
    assert_eq!(resolved.len(), 1);

    // The losing version remains retrievable
    let local = engine.versions.get_version(local.id).await.unwrap().unwrap();
    assert_eq!(local.content, "v1");

    // Resolution is terminal
    let again = engine
        .resolver
        .resolve_conflict(conflict.id, ResolutionType::KeepLocal, None, USER)
        .await;
    assert!(matches!(again, Err(Error::NotFound(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn keep_local_resolution_promotes_the_local_version() {
    let engine = engine().await;
    let note = engine.create_note(USER, "Draft", "v0", DEVICE_1).await.unwrap();

    engine.sync.set_online(false).await.unwrap();
    let local = engine
        .sync
        .save_offline_edit(note.id, USER, "Draft", "v1", DEVICE_1)
        .await
        .unwrap();
    online_edit(&engine, note.id, USER, "Draft", "v2", DEVICE_2).await;
    engine.sync.set_online(true).await.unwrap();

    let conflict = engine.detector.get_pending_conflicts(USER).await.unwrap().remove(0);
    engine
        .resolver
        .resolve_conflict(conflict.id, ResolutionType::KeepLocal, None, USER)
        .await
        .unwrap();

    let note = engine.get_note(note.id).await.unwrap().unwrap();
    assert_eq!(note.current_version_id, Some(local.id));
    assert_eq!(note.content, "v1");

    let local = engine.versions.get_version(local.id).await.unwrap().unwrap();
    assert_eq!(local.sync_status, VersionSyncStatus::Synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn manual_merge_supersedes_both_sources() {
    let engine = engine().await;
    let note = engine.create_note(USER, "Draft", "v0", DEVICE_1).await.unwrap();

    engine.sync.set_online(false).await.unwrap();
    let local = engine
        .sync
        .save_offline_edit(note.id, USER, "Draft", "v1", DEVICE_1)
        .await
        .unwrap();
    let remote = online_edit(&engine, note.id, USER, "Draft", "v2", DEVICE_2).await;
    engine.sync.set_online(true).await.unwrap();

    let conflict = engine.detector.get_pending_conflicts(USER).await.unwrap().remove(0);

    // Merge data is required
    let missing = engine
        .resolver
        .resolve_conflict(conflict.id, ResolutionType::ManualMerge, None, USER)
        .await;
    assert!(matches!(missing, Err(Error::Validation(_))));

    let outcome = engine
        .resolver
        .resolve_conflict(
            conflict.id,
            ResolutionType::ManualMerge,
            Some(MergeData {
                title: "Draft".into(),
                content: "v1 + v2".into(),
            }),
            USER,
        )
        .await
        .unwrap();

    let merged_id = outcome.promoted_version_id.unwrap();
    let note = engine.get_note(note.id).await.unwrap().unwrap();
    assert_eq!(note.current_version_id, Some(merged_id));
    assert_eq!(note.content, "v1 + v2");

    for source in [local.id, remote.id] {
        let version = engine.versions.get_version(source).await.unwrap().unwrap();
        assert_eq!(version.superseded_by, Some(merged_id));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn separate_versions_resolution_can_fork() {
    let engine = engine().await;
    let note = engine.create_note(USER, "Draft", "v0", DEVICE_1).await.unwrap();

    engine.sync.set_online(false).await.unwrap();
    engine
        .sync
        .save_offline_edit(note.id, USER, "Draft", "my rewrite", DEVICE_1)
        .await
        .unwrap();
    let remote = online_edit(&engine, note.id, USER, "Draft", "their rewrite", DEVICE_2).await;
    engine.sync.set_online(true).await.unwrap();

    let conflict = engine.detector.get_pending_conflicts(USER).await.unwrap().remove(0);
    let outcome = engine
        .resolver
        .resolve_conflict(
            conflict.id,
            ResolutionType::CreateSeparateVersions,
            Some(MergeData {
                title: "Draft (fork)".into(),
                content: "my rewrite".into(),
            }),
            USER,
        )
        .await
        .unwrap();

    // The original keeps its current version; the fork carries the edit
    let note = engine.get_note(note.id).await.unwrap().unwrap();
    assert_eq!(note.current_version_id, Some(remote.id));

    let fork = engine.get_note(outcome.fork_note_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(fork.title, "Draft (fork)");
    assert_eq!(fork.content, "my rewrite");
    assert_eq!(fork.owner_id, USER);
}

#[tokio::test(flavor = "multi_thread")]
async fn force_sync_uses_single_attempt_budget() {
    let engine = engine().await;
    let note = engine.create_note(USER, "Draft", "v0", DEVICE_1).await.unwrap();

    engine.sync.set_online(false).await.unwrap();
    engine
        .sync
        .save_offline_edit(note.id, USER, "Draft", "v1", DEVICE_1)
        .await
        .unwrap();

    let report = engine.sync.force_sync_note(note.id, USER).await.unwrap();
    assert!(report.ran);
    assert!(report.synced >= 1);

    let items = engine.sync.queue_items(USER).await.unwrap();
    assert!(items.iter().any(|i| i.max_attempts == 1));

    let note = engine.get_note(note.id).await.unwrap().unwrap();
    assert_eq!(note.content, "v1");
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_delete_is_idempotent() {
    let engine = engine().await;
    let note = engine.create_note(USER, "Draft", "v0", DEVICE_1).await.unwrap();

    engine.sync.set_online(false).await.unwrap();
    engine
        .sync
        .save_offline_delete(note.id, USER, DEVICE_1)
        .await
        .unwrap();
    engine
        .sync
        .save_offline_delete(note.id, USER, DEVICE_1)
        .await
        .unwrap();
    engine.sync.set_online(true).await.unwrap();

    assert!(engine.get_note(note.id).await.unwrap().is_none());

    // Both items synchronized; the second was a no-op
    let status = engine.sync.get_sync_status(Some(USER)).await.unwrap();
    assert_eq!(status.synced, 2);
    assert_eq!(status.failed, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn cleanup_purges_only_terminal_items() {
    let engine = engine().await;
    let note = engine.create_note(USER, "Draft", "v0", DEVICE_1).await.unwrap();

    // One synced item, one still pending
    engine
        .sync
        .save_offline_edit(note.id, USER, "Draft", "v1", DEVICE_1)
        .await
        .unwrap();
    engine.sync.set_online(false).await.unwrap();
    engine
        .sync
        .save_offline_edit(note.id, USER, "Draft", "v2", DEVICE_1)
        .await
        .unwrap();

    // Zero-day threshold: everything terminal is old enough to purge
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let purged = engine.sync.cleanup_sync_history(0).await.unwrap();
    assert_eq!(purged, 1);

    let items = engine.sync.queue_items(USER).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].status, QueueItemStatus::Pending);

    // History is untouched by queue cleanup
    let entries = engine.history.entries_for_note(note.id, 100).await.unwrap();
    assert!(!entries.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_edit_chain_fast_forwards_in_order() {
    let engine = engine().await;
    let note = engine.create_note(USER, "Draft", "v0", DEVICE_1).await.unwrap();

    engine.sync.set_online(false).await.unwrap();
    engine
        .sync
        .save_offline_edit(note.id, USER, "Draft", "v1", DEVICE_1)
        .await
        .unwrap();
    engine.sync.set_online(true).await.unwrap();

    // A second edit on top of the synchronized first one
    let second = engine
        .sync
        .save_offline_edit(note.id, USER, "Draft", "v2", DEVICE_1)
        .await
        .unwrap();

    let note = engine.get_note(note.id).await.unwrap().unwrap();
    assert_eq!(note.current_version_id, Some(second.id));
    assert_eq!(note.content, "v2");

    let conflicts = engine.detector.get_pending_conflicts(USER).await.unwrap();
    assert!(conflicts.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn chained_offline_edits_from_one_device_do_not_conflict() {
    let engine = engine().await;
    let note = engine.create_note(USER, "Draft", "v0", DEVICE_1).await.unwrap();

    engine.sync.set_online(false).await.unwrap();
    engine
        .sync
        .save_offline_edit(note.id, USER, "Draft", "v1", DEVICE_1)
        .await
        .unwrap();
    let second = engine
        .sync
        .save_offline_edit(note.id, USER, "Draft", "v2", DEVICE_1)
        .await
        .unwrap();
    engine.sync.set_online(true).await.unwrap();

    let conflicts = engine.detector.get_pending_conflicts(USER).await.unwrap();
    assert!(conflicts.is_empty());

    let note = engine.get_note(note.id).await.unwrap().unwrap();
    assert_eq!(note.current_version_id, Some(second.id));
    assert_eq!(note.content, "v2");
}

#[tokio::test(flavor = "multi_thread")]
async fn pending_versions_listed_per_user_in_order() {
    let engine = engine().await;
    let note = engine.create_note(USER, "Draft", "v0", DEVICE_1).await.unwrap();

    engine.sync.set_online(false).await.unwrap();
    let first = engine
        .sync
        .save_offline_edit(note.id, USER, "Draft", "v1", DEVICE_1)
        .await
        .unwrap();
    let second = engine
        .sync
        .save_offline_edit(note.id, USER, "Draft", "v2", DEVICE_1)
        .await
        .unwrap();

    let pending = engine.versions.get_pending_sync_versions(USER).await.unwrap();
    let ids: Vec<_> = pending.iter().map(|v| v.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);

    assert!(engine
        .versions
        .get_pending_sync_versions("someone-else")
        .await
        .unwrap()
        .is_empty());
}
