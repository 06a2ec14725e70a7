//! Conflict detector.
//!
//! Compares a note's pending versions against the current version's lineage
//! and records a conflict whenever the two cannot be strictly ordered. The
//! tie-break is deliberately conservative: when in doubt, flag a conflict
//! rather than silently pick a winner.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::access::AccessResolver;
use crate::db::{
    ConflictRepository, Database, HistoryRepository, LibSqlConflictRepository,
    LibSqlHistoryRepository, LibSqlNoteRepository, LibSqlVersionRepository, NoteRepository,
    VersionRepository,
};
use crate::error::{Error, Result};
use crate::events::{EventBus, NoteEvent};
use crate::models::{
    Conflict, ConflictComplexity, ConflictId, HistoryAction, NoteId, NoteVersion,
};

/// Thread-safe conflict detector sharing the engine's database handle
#[derive(Clone)]
pub struct ConflictDetector {
    db: Arc<Mutex<Database>>,
    events: EventBus,
    access: Arc<dyn AccessResolver>,
}

impl ConflictDetector {
    /// Create a detector over a shared database handle
    #[must_use]
    pub fn new(db: Arc<Mutex<Database>>, events: EventBus, access: Arc<dyn AccessResolver>) -> Self {
        Self { db, events, access }
    }

    /// Examine the note's pending versions against the current lineage.
    ///
    /// A pending version whose parent is the current version fast-forwards
    /// cleanly; one that is already part of the current ancestry is stale;
    /// everything else diverged concurrently and yields a conflict record.
    /// Re-detection returns the existing record for a version pair instead
    /// of duplicating it.
    pub async fn detect_conflicts(&self, note_id: NoteId) -> Result<Vec<Conflict>> {
        let mut created = Vec::new();
        let conflicts = {
            let db = self.db.lock().await;
            let notes = LibSqlNoteRepository::new(db.connection());
            let versions = LibSqlVersionRepository::new(db.connection());
            let conflict_repo = LibSqlConflictRepository::new(db.connection());

            let note = notes
                .get(note_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("note {note_id}")))?;

            let Some(current_id) = note.current_version_id else {
                // Nothing synchronized yet; the first version always wins
                return Ok(Vec::new());
            };

            let ancestry: HashSet<_> = versions
                .ancestor_chain(current_id)
                .await?
                .into_iter()
                .collect();

            let mut conflicts = Vec::new();
            for pending in versions.pending_for_note(note_id).await? {
                if pending.id == current_id || ancestry.contains(&pending.id) {
                    // Already incorporated into the current lineage
                    continue;
                }
                let pending_chain = versions.ancestor_chain(pending.id).await?;
                if pending_chain.contains(&current_id) {
                    // Strict descendant of current: clean fast-forward
                    continue;
                }

                let candidate = Conflict::new(note_id, pending.id, current_id);
                let candidate_id = candidate.id;
                let stored = conflict_repo.insert_or_existing(candidate).await?;
                if stored.id == candidate_id {
                    LibSqlHistoryRepository::new(db.connection())
                        .append(
                            note_id,
                            Some(pending.id),
                            &pending.author_id,
                            HistoryAction::ConflictDetected,
                            "divergent edits detected",
                            serde_json::json!({
                                "local_version": pending.id.as_str(),
                                "remote_version": current_id.as_str(),
                            }),
                        )
                        .await?;
                    created.push((stored.clone(), pending.author_id.clone()));
                }
                conflicts.push(stored);
            }
            conflicts
        };

        for (conflict, author) in &created {
            tracing::info!(
                note = %conflict.note_id,
                conflict = %conflict.id,
                "Conflict detected"
            );
            self.events
                .publish(NoteEvent::ConflictDetected {
                    note_id: conflict.note_id,
                    conflict_id: conflict.id,
                    detected_by: author.clone(),
                })
                .await;
        }

        Ok(conflicts)
    }

    /// Heuristic classification of a conflict's divergence.
    ///
    /// Pure function of the two versions' title/content; no side effects.
    pub async fn analyze_conflict_complexity(
        &self,
        conflict_id: ConflictId,
    ) -> Result<ConflictComplexity> {
        let (local, remote) = self.conflict_versions(conflict_id).await?;
        Ok(classify(&local, &remote))
    }

    /// Unresolved conflicts visible to the user, as owner or collaborator
    pub async fn get_pending_conflicts(&self, user_id: &str) -> Result<Vec<Conflict>> {
        let candidates = {
            let db = self.db.lock().await;
            let conflict_repo = LibSqlConflictRepository::new(db.connection());
            let notes = LibSqlNoteRepository::new(db.connection());

            let mut candidates = Vec::new();
            for conflict in conflict_repo.pending_all().await? {
                if let Some(note) = notes.get(conflict.note_id).await? {
                    candidates.push((conflict, note));
                }
            }
            candidates
        };

        let mut visible = Vec::new();
        for (conflict, note) in candidates {
            if self.access.access_list(&note).await.iter().any(|u| u == user_id) {
                visible.push(conflict);
            }
        }
        Ok(visible)
    }

    /// Both versions of a conflict, local first
    pub(crate) async fn conflict_versions(
        &self,
        conflict_id: ConflictId,
    ) -> Result<(NoteVersion, NoteVersion)> {
        let db = self.db.lock().await;
        let conflict = LibSqlConflictRepository::new(db.connection())
            .get(conflict_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {conflict_id}")))?;

        let versions = LibSqlVersionRepository::new(db.connection());
        let local = versions
            .get(conflict.local_version_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("version {}", conflict.local_version_id)))?;
        let remote = versions
            .get(conflict.remote_version_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("version {}", conflict.remote_version_id)))?;
        Ok((local, remote))
    }
}

/// Classify how far two versions diverge.
///
/// Symmetric: `classify(a, b) == classify(b, a)`.
#[must_use]
pub fn classify(a: &NoteVersion, b: &NoteVersion) -> ConflictComplexity {
    if a.content_hash == b.content_hash {
        return ConflictComplexity::TitleOnly;
    }
    if line_overlap(&a.content, &b.content) >= 0.5 {
        ConflictComplexity::Localized
    } else {
        ConflictComplexity::Rewrite
    }
}

/// Jaccard similarity over the two contents' line sets, in `[0, 1]`
#[allow(clippy::cast_precision_loss)]
fn line_overlap(a: &str, b: &str) -> f64 {
    let lines_a: HashSet<&str> = a.lines().filter(|l| !l.trim().is_empty()).collect();
    let lines_b: HashSet<&str> = b.lines().filter(|l| !l.trim().is_empty()).collect();

    if lines_a.is_empty() && lines_b.is_empty() {
        return 1.0;
    }

    let intersection = lines_a.intersection(&lines_b).count();
    let union = lines_a.union(&lines_b).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NoteId;
    use pretty_assertions::assert_eq;

    fn version(title: &str, content: &str) -> NoteVersion {
        NoteVersion::new(NoteId::new(), "user-1", "device-1", title, content, None)
    }

    #[test]
    fn test_classify_title_only() {
        let a = version("Draft", "same body");
        let b = version("Final", "same body");
        assert_eq!(classify(&a, &b), ConflictComplexity::TitleOnly);
    }

    #[test]
    fn test_classify_localized() {
        let a = version("Draft", "line one\nline two\nline three\nline four");
        let b = version("Draft", "line one\nline two\nline three\nchanged");
        assert_eq!(classify(&a, &b), ConflictComplexity::Localized);
    }

    #[test]
    fn test_classify_rewrite() {
        let a = version("Draft", "alpha\nbeta\ngamma");
        let b = version("Draft", "entirely\ndifferent\ndocument");
        assert_eq!(classify(&a, &b), ConflictComplexity::Rewrite);
    }

    #[test]
    fn test_classify_symmetric() {
        let pairs = [
            (version("A", "x\ny"), version("B", "x\ny")),
            (version("A", "x\ny\nz"), version("A", "x\nq\nz")),
            (version("A", "one"), version("A", "two")),
        ];
        for (a, b) in &pairs {
            assert_eq!(classify(a, b), classify(b, a));
        }
    }

    #[test]
    fn test_line_overlap_bounds() {
        assert!((line_overlap("", "") - 1.0).abs() < f64::EPSILON);
        assert!((line_overlap("a\nb", "a\nb") - 1.0).abs() < f64::EPSILON);
        assert!(line_overlap("a", "b").abs() < f64::EPSILON);
    }
}
