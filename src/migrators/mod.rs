//! Per-collection migrators
//!
//! Each source collection has one `CollectionMigrator`. The orchestrator only
//! sees the trait, picked from a static `MigratorRegistry` by `Collection`.

pub mod documents;
pub mod formbuilder;
pub mod listbuilder;
pub mod people;
pub mod processes;
pub mod processtypes;
pub mod shared;
pub mod users;
pub mod usersgroups;

use crate::db::{Record, RelationalStore, Row, TableSpec};
use crate::descriptor::Collection;
use crate::document;
use crate::error::{DecomposeError, MigrationError, Result};
use crate::etl::{BatchAccumulator, EntityCache, EntityKind, EntityResolver, GhostQueue, SharedRefs};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// One destination row, tagged with its table.
#[derive(Debug, Clone)]
pub struct Tuple {
    pub spec: &'static TableSpec,
    pub row: Row,
}

impl Tuple {
    pub fn from_record<R: Record>(record: R) -> Self {
        Self {
            spec: R::table(),
            row: record.into_row(),
        }
    }
}

/// Output of decomposing one document: a main row plus related row groups
/// keyed by table name. Every group a migrator declares is present, possibly
/// empty.
#[derive(Debug, Clone)]
pub struct Decomposed {
    pub main: Tuple,
    pub related: BTreeMap<&'static str, Vec<Tuple>>,
}

impl Decomposed {
    pub fn new<R: Record>(main: R) -> Self {
        Self {
            main: Tuple::from_record(main),
            related: BTreeMap::new(),
        }
    }

    /// Add a related group; calling it again for the same table appends.
    pub fn with<R, I>(mut self, rows: I) -> Self
    where
        R: Record,
        I: IntoIterator<Item = R>,
    {
        self.related
            .entry(R::table().table.name)
            .or_default()
            .extend(rows.into_iter().map(Tuple::from_record));
        self
    }

    pub fn related(&self, table: &str) -> &[Tuple] {
        self.related.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Main row first, then related groups.
    pub fn into_tuples(self) -> impl Iterator<Item = Tuple> {
        std::iter::once(self.main).chain(self.related.into_values().flatten())
    }
}

/// The capability set the orchestrator needs from each collection.
#[async_trait]
pub trait CollectionMigrator: Send + Sync {
    fn collection(&self) -> Collection;

    fn main_table(&self) -> &'static TableSpec;

    /// Every destination table this migrator writes, main included.
    fn tables(&self) -> &'static [&'static TableSpec];

    /// Entity kinds loaded from the store before streaming starts.
    fn preload(&self) -> &'static [EntityKind] {
        &[EntityKind::User]
    }

    /// Natural key of a document: its `_id`, unwrapped from `$oid`.
    fn primary_key(&self, doc: &Value) -> Option<String> {
        document::id_at(doc, "_id")
    }

    /// Resolve shared entities. May write through the resolver.
    async fn resolve_shared(&self, doc: &Value, resolver: &mut EntityResolver<'_>) -> Result<SharedRefs> {
        resolver.standard_refs(doc).await
    }

    /// Pure projection of one document into rows.
    fn decompose(
        &self,
        doc: &Value,
        refs: &SharedRefs,
        known: &EntityCache,
    ) -> std::result::Result<Decomposed, DecomposeError>;

    fn initialize_batches(&self, batch_size: usize) -> BatchAccumulator {
        BatchAccumulator::new(batch_size, self.tables())
    }

    /// Drain everything still buffered at end of stream.
    async fn insert_batches(
        &self,
        batches: &mut BatchAccumulator,
        ghosts: &mut GhostQueue,
        store: &mut dyn RelationalStore,
    ) -> Result<()> {
        batches.drain(ghosts, store).await
    }
}

/// Static mapping from collection to migrator, filled at startup.
pub struct MigratorRegistry {
    migrators: HashMap<Collection, Box<dyn CollectionMigrator>>,
}

impl MigratorRegistry {
    pub fn new() -> Self {
        Self {
            migrators: HashMap::new(),
        }
    }

    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(users::UsersMigrator));
        registry.register(Box::new(usersgroups::UsersGroupsMigrator));
        registry.register(Box::new(listbuilder::ListBuilderMigrator));
        registry.register(Box::new(formbuilder::FormBuilderMigrator));
        registry.register(Box::new(processtypes::ProcessTypesMigrator));
        registry.register(Box::new(processes::ProcessesMigrator));
        registry.register(Box::new(people::PeopleMigrator));
        registry.register(Box::new(documents::DocumentsMigrator));
        registry
    }

    pub fn register(&mut self, migrator: Box<dyn CollectionMigrator>) {
        self.migrators.insert(migrator.collection(), migrator);
    }

    pub fn get(&self, collection: Collection) -> Result<&dyn CollectionMigrator> {
        self.migrators
            .get(&collection)
            .map(|m| m.as_ref())
            .ok_or_else(|| MigrationError::UnknownCollection(collection.to_string()))
    }

    /// Every table any migrator writes, plus shared-entity tables.
    pub fn all_tables(&self) -> Vec<&'static TableSpec> {
        let mut tables: Vec<&'static TableSpec> = shared::TABLES.to_vec();
        let mut collections: Vec<_> = self.migrators.keys().copied().collect();
        collections.sort();
        for collection in collections {
            if let Some(migrator) = self.migrators.get(&collection) {
                tables.extend(migrator.tables().iter().copied());
            }
        }
        tables
    }
}

impl Default for MigratorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Helpers shared by the collection decomposers.
pub(crate) mod fields {
    use crate::document::{self, path};
    use crate::error::DecomposeError;
    use crate::timestamp::normalize;
    use chrono::{DateTime, Utc};
    use serde_json::Value;

    pub fn required_key(doc: &Value) -> Result<String, DecomposeError> {
        document::id_at(doc, "_id").ok_or(DecomposeError::MissingPrimaryKey)
    }

    pub fn timestamp(doc: &Value, key: &str) -> Option<DateTime<Utc>> {
        normalize(&path(doc, key))
    }

    /// `lumbreVersion` and friends appear in both spellings.
    pub fn text(doc: &Value, keys: &[&str]) -> Option<String> {
        document::first_str(doc, keys)
    }

    pub fn flag(doc: &Value, keys: &[&str]) -> Option<bool> {
        keys.iter().find_map(|k| document::bool_at(doc, k))
    }

    /// `0`-based position of an element, as stored in `order` columns.
    pub fn order(index: usize) -> i64 {
        index as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DEFAULT_ORDER;
    use std::collections::HashSet;

    #[test]
    fn test_standard_registry_covers_every_collection() {
        let registry = MigratorRegistry::standard();
        for collection in DEFAULT_ORDER {
            let migrator = registry.get(collection).unwrap();
            assert_eq!(migrator.collection(), collection);
            assert_eq!(migrator.main_table().table.schema, collection.schema());
            assert!(migrator
                .tables()
                .iter()
                .any(|t| std::ptr::eq(*t, migrator.main_table())));
        }
    }

    #[test]
    fn test_tables_are_declared_once() {
        let registry = MigratorRegistry::standard();
        let mut seen = HashSet::new();
        for spec in registry.all_tables() {
            // Ghost rows share lml_users.main with the users migrator.
            if std::ptr::eq(spec, &crate::etl::ghost::USER_GHOSTS) {
                continue;
            }
            assert!(seen.insert(spec.table), "{} declared twice", spec.table);
            assert!(spec.key.iter().all(|k| spec.columns.contains(k)));
            for fk in spec.foreign_keys {
                assert!(spec.columns.contains(&fk.column), "{}.{}", spec.table, fk.column);
            }
        }
    }

    #[test]
    fn test_fields_order_and_flag() {
        let doc = serde_json::json!({"importedFromExternal": "yes"});
        assert_eq!(fields::flag(&doc, &["imported_from_external", "importedFromExternal"]), Some(true));
        assert_eq!(fields::order(3), 3);
        assert_eq!(fields::required_key(&doc), Err(DecomposeError::MissingPrimaryKey));
    }
}
