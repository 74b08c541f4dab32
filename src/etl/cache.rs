//! Entity Cache
//!
//! Identifiers of shared entities already reconciled with the store during
//! one run. Built empty per run and dropped with it; correctness rests on the
//! store's conflict policies, the cache only saves round trips.

use crate::db::TableRef;
use crate::migrators::{shared, users};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Kinds of shared entity the pipeline reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    User,
    Customer,
    Role,
    Area,
    Subarea,
}

impl EntityKind {
    /// Table and column holding this kind's identifiers.
    pub fn source(&self) -> (TableRef, &'static str) {
        let table = match self {
            EntityKind::User => users::MAIN.table,
            EntityKind::Customer => shared::CUSTOMERS.table,
            EntityKind::Role => users::ROLES.table,
            EntityKind::Area => users::AREAS.table,
            EntityKind::Subarea => users::SUBAREAS.table,
        };
        (table, "id")
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntityKind::User => "user",
            EntityKind::Customer => "customer",
            EntityKind::Role => "role",
            EntityKind::Area => "area",
            EntityKind::Subarea => "subarea",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Default)]
pub struct EntityCache {
    known: HashMap<EntityKind, HashSet<String>>,
    loaded: HashSet<EntityKind>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, kind: EntityKind, id: &str) -> bool {
        self.known.get(&kind).is_some_and(|ids| ids.contains(id))
    }

    /// Returns `true` if the id was not known before.
    pub fn remember(&mut self, kind: EntityKind, id: impl Into<String>) -> bool {
        self.known.entry(kind).or_default().insert(id.into())
    }

    pub fn forget(&mut self, kind: EntityKind, id: &str) -> bool {
        self.known.get_mut(&kind).is_some_and(|ids| ids.remove(id))
    }

    /// Whether the store's identifiers for `kind` were loaded this run.
    pub fn is_loaded(&self, kind: EntityKind) -> bool {
        self.loaded.contains(&kind)
    }

    /// Merge identifiers read from the store and mark the kind loaded.
    pub fn preload(&mut self, kind: EntityKind, ids: impl IntoIterator<Item = String>) {
        self.known.entry(kind).or_default().extend(ids);
        self.loaded.insert(kind);
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.known.get(&kind).map_or(0, HashSet::len)
    }

    pub fn is_empty(&self) -> bool {
        self.known.values().all(HashSet::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remember_and_has() {
        let mut cache = EntityCache::new();
        assert!(!cache.has(EntityKind::User, "u-100"));
        assert!(cache.remember(EntityKind::User, "u-100"));
        assert!(!cache.remember(EntityKind::User, "u-100"));
        assert!(cache.has(EntityKind::User, "u-100"));
        assert!(!cache.has(EntityKind::Customer, "u-100"));
        assert!(cache.forget(EntityKind::User, "u-100"));
        assert!(!cache.has(EntityKind::User, "u-100"));
    }

    #[test]
    fn test_preload_marks_loaded() {
        let mut cache = EntityCache::new();
        assert!(cache.is_empty());
        cache.preload(EntityKind::Area, vec!["a1".to_string(), "a2".to_string()]);
        assert!(cache.is_loaded(EntityKind::Area));
        assert!(!cache.is_loaded(EntityKind::Role));
        assert_eq!(cache.len(EntityKind::Area), 2);
    }
}
