//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;
    if version >= CURRENT_VERSION {
        return Ok(());
    }

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Execute a migration's statements inside one transaction
async fn apply(conn: &Connection, statements: &[&str], version: i32) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: notes, versions, sync queue, conflicts, history
async fn migrate_v1(conn: &Connection) -> Result<()> {
    let statements = [
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Notes table; title/content mirror the current version
        "CREATE TABLE IF NOT EXISTS notes (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            current_version_id TEXT,
            sharing TEXT NOT NULL DEFAULT 'private',
            is_deleted INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_notes_owner ON notes(owner_id)",
        "CREATE INDEX IF NOT EXISTS idx_notes_updated ON notes(updated_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_notes_deleted ON notes(is_deleted)",
        // Immutable version snapshots
        "CREATE TABLE IF NOT EXISTS note_versions (
            id TEXT PRIMARY KEY,
            note_id TEXT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
            author_id TEXT NOT NULL,
            device_id TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            parent_version_id TEXT,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            superseded_by TEXT,
            created_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_versions_note ON note_versions(note_id, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_versions_status ON note_versions(sync_status)",
        "CREATE INDEX IF NOT EXISTS idx_versions_author_status
            ON note_versions(author_id, sync_status)",
        // Offline operation queue
        "CREATE TABLE IF NOT EXISTS sync_queue (
            id TEXT PRIMARY KEY,
            operation TEXT NOT NULL,
            note_id TEXT NOT NULL,
            version_id TEXT,
            user_id TEXT NOT NULL,
            device_id TEXT NOT NULL,
            payload TEXT,
            enqueued_at INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL,
            next_attempt_at INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            last_error TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status, enqueued_at)",
        "CREATE INDEX IF NOT EXISTS idx_sync_queue_user ON sync_queue(user_id, status)",
        // Divergent version pairs awaiting resolution
        "CREATE TABLE IF NOT EXISTS conflicts (
            id TEXT PRIMARY KEY,
            note_id TEXT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
            local_version_id TEXT NOT NULL,
            remote_version_id TEXT NOT NULL,
            detected_at INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            resolution TEXT,
            resolved_at INTEGER,
            resolved_by TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_conflicts_note ON conflicts(note_id, status)",
        "CREATE INDEX IF NOT EXISTS idx_conflicts_status ON conflicts(status, detected_at)",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_conflicts_version_pair
            ON conflicts(local_version_id, remote_version_id)",
        // Append-only audit log; rowid breaks timestamp ties
        "CREATE TABLE IF NOT EXISTS history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            note_id TEXT NOT NULL,
            version_id TEXT,
            user_id TEXT NOT NULL,
            action TEXT NOT NULL,
            description TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_history_note ON history(note_id, created_at DESC)",
        // Record migration version
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    apply(conn, &statements, 1).await
}

/// Migration to version 2: presence session tracking
async fn migrate_v2(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS editing_sessions (
            note_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            device_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            started_at INTEGER NOT NULL,
            last_activity_at INTEGER NOT NULL,
            PRIMARY KEY (note_id, user_id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_editing_sessions_activity
            ON editing_sessions(status, last_activity_at)",
        "CREATE TABLE IF NOT EXISTS device_sessions (
            device_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            connected_at INTEGER NOT NULL,
            last_seen_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_device_sessions_user ON device_sessions(user_id)",
        "INSERT INTO schema_version (version) VALUES (2)",
    ];

    apply(conn, &statements, 2).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    async fn setup() -> Connection {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_idempotent() {
        let conn = setup().await;
        run(&conn).await.unwrap();
        run(&conn).await.unwrap(); // Should not fail

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_all_tables_created() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        for table in [
            "notes",
            "note_versions",
            "sync_queue",
            "conflicts",
            "history",
            "editing_sessions",
            "device_sessions",
        ] {
            let mut rows = conn
                .query(
                    "SELECT EXISTS(
                        SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?
                    )",
                    [table],
                )
                .await
                .unwrap();

            let exists = rows
                .next()
                .await
                .unwrap()
                .is_some_and(|row| row.get::<i32>(0).unwrap() != 0);

            assert!(exists, "missing table: {table}");
        }
    }
}
