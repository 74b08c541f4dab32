//! Collection Migration Descriptors
//!
//! Static per-collection configuration and the global migration order. The
//! registry validates the order against declared dependencies when it is
//! built, so an inconsistent table is rejected before anything destructive
//! runs.

use crate::error::{MigrationError, Result};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Source collections this tool knows how to migrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Collection {
    Users,
    UsersGroups,
    ListBuilder,
    FormBuilder,
    ProcessTypes,
    Processes,
    People,
    Documents,
}

impl Collection {
    pub const ALL: [Collection; 8] = [
        Collection::Users,
        Collection::UsersGroups,
        Collection::ListBuilder,
        Collection::FormBuilder,
        Collection::ProcessTypes,
        Collection::Processes,
        Collection::People,
        Collection::Documents,
    ];

    /// Name of the collection in the source store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Users => "lml_users_mesa4core",
            Collection::UsersGroups => "lml_usersgroups_mesa4core",
            Collection::ListBuilder => "lml_listbuilder_mesa4core",
            Collection::FormBuilder => "lml_formbuilder_mesa4core",
            Collection::ProcessTypes => "lml_processtypes_mesa4core",
            Collection::Processes => "lml_processes_mesa4core",
            Collection::People => "lml_people_mesa4core",
            Collection::Documents => "lml_documents_mesa4core",
        }
    }

    /// Destination namespace.
    pub fn schema(&self) -> &'static str {
        match self {
            Collection::Users => "lml_users",
            Collection::UsersGroups => "lml_usersgroups",
            Collection::ListBuilder => "lml_listbuilder",
            Collection::FormBuilder => "lml_formbuilder",
            Collection::ProcessTypes => "lml_processtypes",
            Collection::Processes => "lml_processes",
            Collection::People => "lml_people",
            Collection::Documents => "lml_documents",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = MigrationError;

    /// Accepts the source name (`lml_users_mesa4core`), the schema name
    /// (`lml_users`) or the short name (`users`).
    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Collection::ALL
            .iter()
            .copied()
            .find(|c| {
                c.as_str() == wanted
                    || c.schema() == wanted
                    || c.schema().trim_start_matches("lml_") == wanted
            })
            .ok_or_else(|| MigrationError::UnknownCollection(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// Authoritative origin of its own shared entities.
    TruthSource,
    /// Needs other collections migrated first.
    Consumer,
    /// Authoritative, but reads entities owned by another truth source.
    TruthSourceWithDependency,
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CollectionKind::TruthSource => "truth_source",
            CollectionKind::Consumer => "consumer",
            CollectionKind::TruthSourceWithDependency => "truth_source_with_dependency",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionDescriptor {
    pub collection: Collection,
    pub schema: &'static str,
    pub primary_key: &'static str,
    pub kind: CollectionKind,
    pub depends_on: Vec<Collection>,
    pub description: &'static str,
}

lazy_static! {
    static ref DESCRIPTORS: Vec<CollectionDescriptor> = vec![
        CollectionDescriptor {
            collection: Collection::Users,
            schema: Collection::Users.schema(),
            primary_key: "id",
            kind: CollectionKind::TruthSource,
            depends_on: vec![],
            description: "Users, with roles, areas, subareas, positions and signature types",
        },
        CollectionDescriptor {
            collection: Collection::UsersGroups,
            schema: Collection::UsersGroups.schema(),
            primary_key: "id",
            kind: CollectionKind::TruthSourceWithDependency,
            depends_on: vec![Collection::Users],
            description: "User groups and their membership",
        },
        CollectionDescriptor {
            collection: Collection::ListBuilder,
            schema: Collection::ListBuilder.schema(),
            primary_key: "listbuilder_id",
            kind: CollectionKind::Consumer,
            depends_on: vec![Collection::Users],
            description: "List view definitions",
        },
        CollectionDescriptor {
            collection: Collection::FormBuilder,
            schema: Collection::FormBuilder.schema(),
            primary_key: "formbuilder_id",
            kind: CollectionKind::Consumer,
            depends_on: vec![Collection::Users],
            description: "Form definitions and their elements",
        },
        CollectionDescriptor {
            collection: Collection::ProcessTypes,
            schema: Collection::ProcessTypes.schema(),
            primary_key: "processtype_id",
            kind: CollectionKind::Consumer,
            depends_on: vec![Collection::Users, Collection::ListBuilder, Collection::FormBuilder],
            description: "Process type templates",
        },
        CollectionDescriptor {
            collection: Collection::Processes,
            schema: Collection::Processes.schema(),
            primary_key: "process_id",
            kind: CollectionKind::Consumer,
            depends_on: vec![Collection::Users, Collection::ProcessTypes],
            description: "Process instances with movements and documents",
        },
        CollectionDescriptor {
            collection: Collection::People,
            schema: Collection::People.schema(),
            primary_key: "people_id",
            kind: CollectionKind::Consumer,
            depends_on: vec![Collection::Users],
            description: "Natural and legal persons",
        },
        CollectionDescriptor {
            collection: Collection::Documents,
            schema: Collection::Documents.schema(),
            primary_key: "document_id",
            kind: CollectionKind::Consumer,
            depends_on: vec![Collection::Users],
            description: "Digital documents with participants, recipients and workflow",
        },
    ];
}

/// Default global order; must be a topological order of `DESCRIPTORS`.
pub const DEFAULT_ORDER: [Collection; 8] = [
    Collection::Users,
    Collection::UsersGroups,
    Collection::ListBuilder,
    Collection::FormBuilder,
    Collection::ProcessTypes,
    Collection::Processes,
    Collection::People,
    Collection::Documents,
];

/// Descriptors plus a validated global order.
#[derive(Debug, Clone)]
pub struct DescriptorRegistry {
    descriptors: HashMap<Collection, CollectionDescriptor>,
    order: Vec<Collection>,
}

impl DescriptorRegistry {
    /// Build a registry, rejecting orders that do not respect dependencies.
    pub fn new(descriptors: Vec<CollectionDescriptor>, order: Vec<Collection>) -> Result<Self> {
        let descriptors: HashMap<_, _> = descriptors
            .into_iter()
            .map(|d| (d.collection, d))
            .collect();
        validate_order(&descriptors, &order)?;
        Ok(Self { descriptors, order })
    }

    /// The built-in descriptor table with the default order.
    pub fn standard() -> Result<Self> {
        Self::new(DESCRIPTORS.clone(), DEFAULT_ORDER.to_vec())
    }

    pub fn get(&self, collection: Collection) -> Result<&CollectionDescriptor> {
        self.descriptors
            .get(&collection)
            .ok_or_else(|| MigrationError::UnknownCollection(collection.to_string()))
    }

    pub fn migration_order(&self) -> &[Collection] {
        &self.order
    }

    /// Every declared dependency of `collection` must be in `completed`.
    /// Reports the first missing one in declaration order.
    pub fn check_dependencies(
        &self,
        collection: Collection,
        completed: &HashSet<Collection>,
    ) -> Result<()> {
        let descriptor = self.get(collection)?;
        match descriptor.depends_on.iter().find(|d| !completed.contains(d)) {
            Some(missing) => Err(MigrationError::DependencyNotMigrated {
                collection: collection.to_string(),
                missing: missing.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Collections that depend on `collection`, directly or transitively.
    pub fn dependents_of(&self, collection: Collection) -> Vec<Collection> {
        let mut found: Vec<Collection> = Vec::new();
        let mut frontier = vec![collection];
        while let Some(current) = frontier.pop() {
            for candidate in &self.order {
                let depends = self
                    .descriptors
                    .get(candidate)
                    .map(|d| d.depends_on.contains(&current))
                    .unwrap_or(false);
                if depends && !found.contains(candidate) {
                    found.push(*candidate);
                    frontier.push(*candidate);
                }
            }
        }
        found.sort_by_key(|c| self.position(*c));
        found
    }

    fn position(&self, collection: Collection) -> usize {
        self.order
            .iter()
            .position(|c| *c == collection)
            .unwrap_or(usize::MAX)
    }
}

fn validate_order(
    descriptors: &HashMap<Collection, CollectionDescriptor>,
    order: &[Collection],
) -> Result<()> {
    let mut seen: HashSet<Collection> = HashSet::new();
    for collection in order {
        let descriptor = descriptors.get(collection).ok_or_else(|| {
            MigrationError::InvalidOrder(format!("{} has no descriptor", collection))
        })?;
        if !seen.insert(*collection) {
            return Err(MigrationError::InvalidOrder(format!(
                "{} appears more than once",
                collection
            )));
        }
        for dependency in &descriptor.depends_on {
            if dependency == collection {
                return Err(MigrationError::InvalidOrder(format!(
                    "{} depends on itself",
                    collection
                )));
            }
            if !seen.contains(dependency) {
                return Err(MigrationError::InvalidOrder(format!(
                    "{} is ordered before its dependency {}",
                    collection, dependency
                )));
            }
        }
    }
    if let Some(missing) = descriptors.keys().find(|c| !seen.contains(c)) {
        return Err(MigrationError::InvalidOrder(format!(
            "{} is missing from the migration order",
            missing
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_is_valid() {
        let registry = DescriptorRegistry::standard().unwrap();
        assert_eq!(registry.migration_order().len(), 8);
        assert_eq!(registry.migration_order()[0], Collection::Users);
    }

    #[test]
    fn test_rejects_dependency_after_dependent() {
        // Processes before process types is the mistake this check exists for.
        let order = vec![
            Collection::Users,
            Collection::UsersGroups,
            Collection::Processes,
            Collection::ListBuilder,
            Collection::FormBuilder,
            Collection::ProcessTypes,
            Collection::People,
            Collection::Documents,
        ];
        let err = DescriptorRegistry::new(DESCRIPTORS.clone(), order).unwrap_err();
        match err {
            MigrationError::InvalidOrder(msg) => {
                assert!(msg.contains("lml_processes_mesa4core"));
                assert!(msg.contains("lml_processtypes_mesa4core"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_rejects_incomplete_order() {
        let order = vec![Collection::Users];
        assert!(DescriptorRegistry::new(DESCRIPTORS.clone(), order).is_err());
    }

    #[test]
    fn test_check_dependencies_names_missing() {
        let registry = DescriptorRegistry::standard().unwrap();
        let completed: HashSet<_> = [Collection::Users].into_iter().collect();
        assert!(registry.check_dependencies(Collection::People, &completed).is_ok());
        let err = registry
            .check_dependencies(Collection::ProcessTypes, &completed)
            .unwrap_err();
        assert!(err.to_string().contains("lml_listbuilder_mesa4core"));
    }

    #[test]
    fn test_dependents_are_transitive() {
        let registry = DescriptorRegistry::standard().unwrap();
        let dependents = registry.dependents_of(Collection::ListBuilder);
        assert_eq!(dependents, vec![Collection::ProcessTypes, Collection::Processes]);
        assert_eq!(registry.dependents_of(Collection::Users).len(), 7);
        assert!(registry.dependents_of(Collection::People).is_empty());
    }

    #[test]
    fn test_parse_collection_names() {
        assert_eq!("lml_people_mesa4core".parse::<Collection>().unwrap(), Collection::People);
        assert_eq!("lml_processtypes".parse::<Collection>().unwrap(), Collection::ProcessTypes);
        assert_eq!("usersgroups".parse::<Collection>().unwrap(), Collection::UsersGroups);
        assert_eq!("documents".parse::<Collection>().unwrap(), Collection::Documents);
        assert!("lml_unknown".parse::<Collection>().is_err());
    }
}
