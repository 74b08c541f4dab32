//! `lml_usersgroups_mesa4core` → `lml_usersgroups`
//!
//! Groups and their membership. Membership is the group's full state, so a
//! group's rows are replaced on every flush instead of appended.

use super::{fields, shared, users, Decomposed};
use crate::db::{ConflictPolicy, FlushStage, ForeignKey, TableRef, TableSpec};
use crate::descriptor::Collection;
use crate::document::{array_at, bool_or, i64_at, scalar_text, str_at};
use crate::error::DecomposeError;
use crate::etl::{EntityCache, EntityKind, SharedRefs};
use crate::migrators::CollectionMigrator;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

pub const MAIN_TABLE: TableRef = TableRef::new("lml_usersgroups", "main");

pub static MAIN: TableSpec = TableSpec {
    table: MAIN_TABLE,
    columns: GroupRow::COLUMNS,
    key: &["id"],
    policy: ConflictPolicy::PreserveFirst,
    stage: FlushStage::Main,
    parent_column: None,
    foreign_keys: &[
        ForeignKey::new("customer_id", shared::CUSTOMERS_TABLE, "id"),
        ForeignKey::new("created_by_user_id", users::MAIN_TABLE, "id"),
        ForeignKey::new("updated_by_user_id", users::MAIN_TABLE, "id"),
    ],
};

pub static MEMBERS: TableSpec = TableSpec {
    table: TableRef::new("lml_usersgroups", "members"),
    columns: MemberRow::COLUMNS,
    key: &["group_id", "user_id"],
    policy: ConflictPolicy::ReplaceChildren,
    stage: FlushStage::Child,
    parent_column: Some("group_id"),
    foreign_keys: &[
        ForeignKey::new("group_id", MAIN_TABLE, "id"),
        ForeignKey::new("user_id", users::MAIN_TABLE, "id"),
    ],
};

static TABLES: &[&TableSpec] = &[&MAIN, &MEMBERS];

crate::table_record! {
    pub struct GroupRow in MAIN {
        id: String,
        name: Option<String>,
        alias: Option<String>,
        deleted: bool,
        customer_id: Option<String>,
        lumbre_version: Option<String>,
        imported_from_external: Option<bool>,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
        created_by_user_id: Option<String>,
        updated_by_user_id: Option<String>,
        __v: Option<i64>,
    }
}

crate::table_record! {
    pub struct MemberRow in MEMBERS {
        group_id: String,
        user_id: String,
    }
}

pub struct UsersGroupsMigrator;

#[async_trait]
impl CollectionMigrator for UsersGroupsMigrator {
    fn collection(&self) -> Collection {
        Collection::UsersGroups
    }

    fn main_table(&self) -> &'static TableSpec {
        &MAIN
    }

    fn tables(&self) -> &'static [&'static TableSpec] {
        TABLES
    }

    fn decompose(
        &self,
        doc: &Value,
        refs: &SharedRefs,
        known: &EntityCache,
    ) -> std::result::Result<Decomposed, DecomposeError> {
        let id = fields::required_key(doc)?;

        let group = GroupRow {
            id: id.clone(),
            name: str_at(doc, "name"),
            alias: str_at(doc, "alias"),
            deleted: bool_or(doc, "deleted", false),
            customer_id: refs.customer_id.clone(),
            lumbre_version: fields::text(doc, &["lumbre_version", "lumbreVersion"]),
            imported_from_external: fields::flag(doc, &["imported_from_external", "importedFromExternal"]),
            created_at: fields::timestamp(doc, "createdAt"),
            updated_at: fields::timestamp(doc, "updatedAt"),
            created_by_user_id: refs.created_by_user_id.clone(),
            updated_by_user_id: refs.updated_by_user_id.clone(),
            __v: i64_at(doc, "__v"),
        };

        // Members that never reached lml_users are dropped, not ghosted.
        let members = array_at(doc, "users")
            .iter()
            .filter_map(scalar_text)
            .filter(|user_id| !user_id.is_empty() && known.has(EntityKind::User, user_id))
            .map(|user_id| MemberRow {
                group_id: id.clone(),
                user_id,
            });

        Ok(Decomposed::new(group).with(members))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqlValue;
    use serde_json::json;

    #[test]
    fn test_members_filtered_to_known_users() {
        let mut known = EntityCache::new();
        known.remember(EntityKind::User, "user-0001");
        known.remember(EntityKind::User, "user-0002");

        let doc = json!({
            "_id": {"$oid": "group-0001"},
            "name": "Mesa de entradas",
            "importedFromExternal": true,
            "users": ["user-0001", {"$oid": "user-0002"}, "user-9999", "", null]
        });
        let decomposed = UsersGroupsMigrator
            .decompose(&doc, &SharedRefs::default(), &known)
            .unwrap();

        let members = decomposed.related("members");
        assert_eq!(members.len(), 2);
        assert_eq!(members[1].row[1], SqlValue::from("user-0002"));

        let imported = MAIN.column_index("imported_from_external").unwrap();
        assert_eq!(decomposed.main.row[imported], SqlValue::Bool(Some(true)));
        let deleted = MAIN.column_index("deleted").unwrap();
        assert_eq!(decomposed.main.row[deleted], SqlValue::Bool(Some(false)));
    }

    #[test]
    fn test_group_without_members_still_has_group() {
        let doc = json!({"_id": "group-0002"});
        let decomposed = UsersGroupsMigrator
            .decompose(&doc, &SharedRefs::default(), &EntityCache::new())
            .unwrap();
        assert!(decomposed.related("members").is_empty());
        assert_eq!(decomposed.main.spec.table, MAIN_TABLE);
    }
}
