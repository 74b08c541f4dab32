//! Ghost-Entity Synthesizer
//!
//! Consumer documents carry audit snapshots of the user who created or last
//! touched them. When that user no longer exists, a placeholder row is built
//! from the snapshot, marked deleted, and queued. The queue is bulk-inserted
//! ahead of every batch flush so foreign keys to it always resolve.

use crate::db::{RelationalStore, TableSpec};
use crate::document::{first_str, reference_id, str_at};
use crate::error::Result;
use crate::etl::cache::{EntityCache, EntityKind};
use crate::migrators::users;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info};

/// Identifiers shorter than this are legacy placeholders, not users.
pub const MIN_USER_ID_LEN: usize = 5;

pub static USER_GHOSTS: TableSpec = TableSpec {
    table: users::MAIN_TABLE,
    columns: GhostUser::COLUMNS,
    key: &["id"],
    policy: crate::db::ConflictPolicy::PreserveFirst,
    stage: crate::db::FlushStage::Ghost,
    parent_column: None,
    foreign_keys: &[
        crate::db::ForeignKey::new("role_id", users::ROLES_TABLE, "id"),
        crate::db::ForeignKey::new("area_id", users::AREAS_TABLE, "id"),
        crate::db::ForeignKey::new("subarea_id", users::SUBAREAS_TABLE, "id"),
    ],
};

crate::table_record! {
    /// Non-authoritative user row synthesized from an audit snapshot.
    pub struct GhostUser in USER_GHOSTS {
        id: String,
        firstname: Option<String>,
        lastname: Option<String>,
        email: Option<String>,
        username: Option<String>,
        role_id: Option<String>,
        area_id: Option<String>,
        subarea_id: Option<String>,
        deleted: bool,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    }
}

/// Catalog references embedded in a snapshot, already resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotParents {
    pub role_id: Option<String>,
    pub area_id: Option<String>,
    pub subarea_id: Option<String>,
}

/// Identifier named by a user fragment, if it is long enough to be real.
pub fn user_id(fragment: &Value) -> Option<String> {
    reference_id(fragment).filter(|id| id.chars().count() >= MIN_USER_ID_LEN)
}

#[derive(Debug, Default)]
pub struct GhostQueue {
    pending: Vec<GhostUser>,
    inserted: u64,
}

impl GhostQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the fragment's user id, queueing a ghost row when the id is
    /// unknown. The id is returned even when a ghost is queued, so the
    /// referencing foreign key is always populated.
    pub fn ensure_or_queue_ghost(
        &mut self,
        fragment: &Value,
        parents: SnapshotParents,
        cache: &mut EntityCache,
    ) -> Option<String> {
        let id = user_id(fragment)?;
        if cache.has(EntityKind::User, &id) {
            return Some(id);
        }

        let now = Utc::now();
        let ghost = if fragment.is_object() {
            GhostUser {
                id: id.clone(),
                firstname: first_str(fragment, &["firstname", "firstName"])
                    .or_else(|| Some("Restored".to_string())),
                lastname: first_str(fragment, &["lastname", "lastName"])
                    .or_else(|| Some("User".to_string())),
                email: str_at(fragment, "email"),
                username: first_str(fragment, &["username", "userName"]),
                role_id: parents.role_id,
                area_id: parents.area_id,
                subarea_id: parents.subarea_id,
                deleted: true,
                created_at: now,
                updated_at: now,
            }
        } else {
            GhostUser {
                id: id.clone(),
                firstname: None,
                lastname: None,
                email: None,
                username: None,
                role_id: None,
                area_id: None,
                subarea_id: None,
                deleted: true,
                created_at: now,
                updated_at: now,
            }
        };

        debug!("Queued ghost user {}", id);
        self.pending.push(ghost);
        cache.remember(EntityKind::User, id.clone());
        Some(id)
    }

    /// Queue position to hand back to `discard_since`.
    pub fn checkpoint(&self) -> usize {
        self.pending.len()
    }

    /// Drop ghosts queued after `checkpoint` and forget their ids. Used when
    /// the document that named them is skipped.
    pub fn discard_since(&mut self, checkpoint: usize, cache: &mut EntityCache) -> usize {
        if checkpoint >= self.pending.len() {
            return 0;
        }
        let dropped: Vec<GhostUser> = self.pending.drain(checkpoint..).collect();
        for ghost in &dropped {
            cache.forget(EntityKind::User, &ghost.id);
            debug!("Discarded ghost user {}", ghost.id);
        }
        dropped.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Ghost rows actually written this run.
    pub fn inserted(&self) -> u64 {
        self.inserted
    }

    /// Insert queued ghosts, deduplicated by id, leaving the transaction open
    /// for the batch that needs them.
    pub async fn flush(&mut self, store: &mut dyn RelationalStore) -> Result<u64> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let mut seen = HashSet::new();
        let rows: Vec<_> = self
            .pending
            .drain(..)
            .filter(|g| seen.insert(g.id.clone()))
            .map(crate::db::Record::into_row)
            .collect();
        let queued = rows.len();
        let affected = store.insert_rows(&USER_GHOSTS, rows).await?;
        self.inserted += affected;
        info!("👻 Restored {} ghost users ({} queued)", affected, queued);
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_known_user_is_not_queued() {
        let mut cache = EntityCache::new();
        cache.remember(EntityKind::User, "user-001");
        let mut queue = GhostQueue::new();
        let id = queue.ensure_or_queue_ghost(&json!({"id": "user-001"}), SnapshotParents::default(), &mut cache);
        assert_eq!(id.as_deref(), Some("user-001"));
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_unknown_user_is_queued_once() {
        let mut cache = EntityCache::new();
        let mut queue = GhostQueue::new();
        let snapshot = json!({"_id": {"$oid": "user-002"}, "firstName": "Eva", "email": "eva@example.com"});
        for _ in 0..3 {
            let id = queue.ensure_or_queue_ghost(&snapshot, SnapshotParents::default(), &mut cache);
            assert_eq!(id.as_deref(), Some("user-002"));
        }
        assert_eq!(queue.pending(), 1);
        assert!(cache.has(EntityKind::User, "user-002"));
        let ghost = &queue.pending[0];
        assert_eq!(ghost.firstname.as_deref(), Some("Eva"));
        assert_eq!(ghost.lastname.as_deref(), Some("User"));
        assert!(ghost.deleted);
    }

    #[test]
    fn test_short_ids_are_ignored() {
        let mut cache = EntityCache::new();
        let mut queue = GhostQueue::new();
        assert_eq!(queue.ensure_or_queue_ghost(&json!({"id": "1234"}), SnapshotParents::default(), &mut cache), None);
        assert_eq!(queue.ensure_or_queue_ghost(&json!({}), SnapshotParents::default(), &mut cache), None);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_scalar_snapshot_has_no_names() {
        let mut cache = EntityCache::new();
        let mut queue = GhostQueue::new();
        let id = queue.ensure_or_queue_ghost(&json!("user-scalar"), SnapshotParents::default(), &mut cache);
        assert_eq!(id.as_deref(), Some("user-scalar"));
        assert_eq!(queue.pending[0].firstname, None);
    }

    #[test]
    fn test_discard_since_forgets_only_later_ghosts() {
        let mut cache = EntityCache::new();
        let mut queue = GhostQueue::new();
        queue.ensure_or_queue_ghost(&json!({"id": "user-kept"}), SnapshotParents::default(), &mut cache);
        let mark = queue.checkpoint();
        queue.ensure_or_queue_ghost(&json!({"id": "user-dropped"}), SnapshotParents::default(), &mut cache);

        assert_eq!(queue.discard_since(mark, &mut cache), 1);
        assert_eq!(queue.pending(), 1);
        assert!(cache.has(EntityKind::User, "user-kept"));
        assert!(!cache.has(EntityKind::User, "user-dropped"));
        assert_eq!(queue.discard_since(mark, &mut cache), 0);
    }

    #[tokio::test]
    async fn test_flush_writes_deleted_rows() {
        let mut cache = EntityCache::new();
        let mut queue = GhostQueue::new();
        let mut store = MemoryStore::new();
        queue.ensure_or_queue_ghost(&json!({"id": "user-003", "firstname": "Ana"}), SnapshotParents::default(), &mut cache);
        assert_eq!(queue.flush(&mut store).await.unwrap(), 1);
        store.commit().await.unwrap();
        let row = store.find(users::MAIN_TABLE, "id", "user-003").unwrap();
        assert_eq!(row.get("deleted"), Some(&crate::db::SqlValue::Bool(Some(true))));
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.inserted(), 1);
    }
}
