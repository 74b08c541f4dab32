//! Shared-Entity Resolver
//!
//! Turns entity fragments embedded in a document into identifiers usable as
//! foreign keys. Cache hits cost nothing; misses upsert the entity right away
//! (parents before children) and remember it. Users are never written
//! authoritatively from a consumer document: an unknown user becomes a ghost.

use crate::db::{Record, RelationalStore, Row, TableSpec};
use crate::document::{first_str, path, reference_id, str_at};
use crate::error::Result;
use crate::etl::cache::{EntityCache, EntityKind};
use crate::etl::ghost::{self, GhostQueue, SnapshotParents};
use crate::migrators::shared::CustomerRow;
use crate::migrators::users::{AreaRow, RoleRow, SubareaRow};
use serde_json::Value;
use tracing::debug;

/// Identifiers resolved for one document before decomposition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharedRefs {
    pub customer_id: Option<String>,
    pub created_by_user_id: Option<String>,
    pub updated_by_user_id: Option<String>,
}

pub struct EntityResolver<'a> {
    cache: &'a mut EntityCache,
    ghosts: &'a mut GhostQueue,
    store: &'a mut dyn RelationalStore,
}

impl<'a> EntityResolver<'a> {
    pub fn new(
        cache: &'a mut EntityCache,
        ghosts: &'a mut GhostQueue,
        store: &'a mut dyn RelationalStore,
    ) -> Self {
        Self {
            cache,
            ghosts,
            store,
        }
    }

    pub fn cache(&self) -> &EntityCache {
        &*self.cache
    }

    /// Load the store's identifiers for `kind` once per run.
    pub async fn ensure_loaded(&mut self, kind: EntityKind) -> Result<()> {
        if self.cache.is_loaded(kind) {
            return Ok(());
        }
        let (table, column) = kind.source();
        let ids = self.store.fetch_ids(table, column).await?;
        debug!("Preloaded {} {} ids from {}", ids.len(), kind, table);
        self.cache.preload(kind, ids);
        Ok(())
    }

    /// Resolve a fragment of the given kind to its identifier.
    pub async fn resolve(&mut self, kind: EntityKind, fragment: &Value) -> Result<Option<String>> {
        match kind {
            EntityKind::User => self.resolve_user(fragment).await,
            _ => self.resolve_catalog(kind, fragment).await,
        }
    }

    /// User named by an audit snapshot such as `createdBy: {user: {...}}`.
    pub async fn audit_user(&mut self, doc: &Value, field: &str) -> Result<Option<String>> {
        match path(doc, field).filter(|s| s.is_object()).and_then(|s| s.get("user")) {
            Some(user) if !user.is_null() => self.resolve_user(user).await,
            _ => Ok(None),
        }
    }

    /// Customer referenced by `customerId` (or the snake_case legacy field).
    pub async fn customer(&mut self, doc: &Value) -> Result<Option<String>> {
        match first_str(doc, &["customerId", "customer_id"]) {
            Some(id) => self.resolve(EntityKind::Customer, &Value::String(id)).await,
            None => Ok(None),
        }
    }

    /// Customer and audit users, the references every collection carries.
    pub async fn standard_refs(&mut self, doc: &Value) -> Result<SharedRefs> {
        Ok(SharedRefs {
            customer_id: self.customer(doc).await?,
            created_by_user_id: self.audit_user(doc, "createdBy").await?,
            updated_by_user_id: self.audit_user(doc, "updatedBy").await?,
        })
    }

    async fn resolve_user(&mut self, fragment: &Value) -> Result<Option<String>> {
        let Some(id) = ghost::user_id(fragment) else {
            return Ok(None);
        };
        self.ensure_loaded(EntityKind::User).await?;
        if self.cache.has(EntityKind::User, &id) {
            return Ok(Some(id));
        }

        let parents = SnapshotParents {
            role_id: self.resolve_nested(EntityKind::Role, fragment, "role").await?,
            area_id: self.resolve_nested(EntityKind::Area, fragment, "area").await?,
            subarea_id: self.resolve_nested(EntityKind::Subarea, fragment, "subarea").await?,
        };
        Ok(self.ghosts.ensure_or_queue_ghost(fragment, parents, self.cache))
    }

    async fn resolve_nested(
        &mut self,
        kind: EntityKind,
        fragment: &Value,
        field: &str,
    ) -> Result<Option<String>> {
        match path(fragment, field).filter(|v| v.is_object()) {
            Some(nested) => self.resolve_catalog(kind, nested).await,
            None => Ok(None),
        }
    }

    async fn resolve_catalog(&mut self, kind: EntityKind, fragment: &Value) -> Result<Option<String>> {
        let Some(id) = reference_id(fragment) else {
            return Ok(None);
        };
        self.ensure_loaded(kind).await?;
        if self.cache.has(kind, &id) {
            return Ok(Some(id));
        }
        let Some((spec, row)) = entity_row(kind, &id, fragment) else {
            return Ok(None);
        };
        self.store.execute_one(spec, row).await?;
        debug!("Upserted {} {}", kind, id);
        self.cache.remember(kind, id.clone());
        Ok(Some(id))
    }
}

fn entity_row(kind: EntityKind, id: &str, fragment: &Value) -> Option<(&'static TableSpec, Row)> {
    let id = id.to_string();
    let name = str_at(fragment, "name");
    let entry = match kind {
        EntityKind::User => return None,
        EntityKind::Customer => (CustomerRow::table(), CustomerRow { id }.into_row()),
        EntityKind::Role => (RoleRow::table(), RoleRow { id, name }.into_row()),
        EntityKind::Area => (
            AreaRow::table(),
            AreaRow {
                id,
                name,
                descripcion: str_at(fragment, "descripcion"),
            }
            .into_row(),
        ),
        EntityKind::Subarea => (SubareaRow::table(), SubareaRow { id, name }.into_row()),
    };
    Some(entry)
}
