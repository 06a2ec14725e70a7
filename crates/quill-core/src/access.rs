//! Access-list seam.
//!
//! The sharing/permission layer decides who may see a note; this core only
//! consumes the resulting list when scoping conflict queries and broadcast
//! delivery. Deployments register their own resolver; the default grants
//! access to the owner alone.

use async_trait::async_trait;

use crate::models::Note;

/// Supplies the users allowed to see a note: the owner plus any
/// collaborators the sharing layer has granted permission to.
#[async_trait]
pub trait AccessResolver: Send + Sync {
    /// Users with access to `note`, owner included
    async fn access_list(&self, note: &Note) -> Vec<String>;
}

/// Resolver for deployments without a sharing layer: owner-only access
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerOnlyAccess;

#[async_trait]
impl AccessResolver for OwnerOnlyAccess {
    async fn access_list(&self, note: &Note) -> Vec<String> {
        vec![note.owner_id.clone()]
    }
}

pub mod testing {
    //! In-memory resolver for exercising shared-note scenarios in tests

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::{async_trait, AccessResolver, Note};
    use crate::models::NoteId;

    /// Shared note → collaborators map; the owner is always included.
    ///
    /// Clones share the same underlying map, so grants made after the
    /// resolver was handed to an engine are visible to it.
    #[derive(Debug, Clone, Default)]
    pub struct StaticAccess {
        collaborators: Arc<Mutex<HashMap<NoteId, Vec<String>>>>,
    }

    impl StaticAccess {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        pub fn grant(&self, note_id: NoteId, user_id: impl Into<String>) {
            self.collaborators
                .lock()
                .expect("access map poisoned")
                .entry(note_id)
                .or_default()
                .push(user_id.into());
        }
    }

    #[async_trait]
    impl AccessResolver for StaticAccess {
        async fn access_list(&self, note: &Note) -> Vec<String> {
            let mut users = vec![note.owner_id.clone()];
            if let Some(extra) = self
                .collaborators
                .lock()
                .expect("access map poisoned")
                .get(&note.id)
            {
                users.extend(extra.iter().cloned());
            }
            users.dedup();
            users
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_owner_only_access() {
        let note = Note::new("user-1", "Draft", "v1");
        let resolver = OwnerOnlyAccess;
        assert_eq!(resolver.access_list(&note).await, vec!["user-1".to_string()]);
    }
}
