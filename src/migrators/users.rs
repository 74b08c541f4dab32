//! `lml_users_mesa4core` → `lml_users`
//!
//! Truth source for users and the catalogs embedded in them (roles, areas,
//! subareas, positions, signature types). Catalogs upsert so later documents
//! can correct names; users keep the first complete insert.

use super::{fields, shared, Decomposed};
use crate::db::{ConflictPolicy, FlushStage, ForeignKey, TableRef, TableSpec};
use crate::descriptor::Collection;
use crate::document::{bool_or, first_str, i64_at, path, str_at};
use crate::error::{DecomposeError, Result};
use crate::etl::{EntityCache, EntityKind, EntityResolver, SharedRefs};
use crate::migrators::CollectionMigrator;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

pub const MAIN_TABLE: TableRef = TableRef::new("lml_users", "main");
pub const ROLES_TABLE: TableRef = TableRef::new("lml_users", "roles");
pub const AREAS_TABLE: TableRef = TableRef::new("lml_users", "areas");
pub const SUBAREAS_TABLE: TableRef = TableRef::new("lml_users", "subareas");
pub const POSITIONS_TABLE: TableRef = TableRef::new("lml_users", "positions");
pub const SIGNATURETYPES_TABLE: TableRef = TableRef::new("lml_users", "signaturetypes");

const fn catalog(table: TableRef, columns: &'static [&'static str]) -> TableSpec {
    TableSpec {
        table,
        columns,
        key: &["id"],
        policy: ConflictPolicy::UpdateCatalog,
        stage: FlushStage::Catalog,
        parent_column: None,
        foreign_keys: &[],
    }
}

pub static ROLES: TableSpec = catalog(ROLES_TABLE, RoleRow::COLUMNS);
pub static AREAS: TableSpec = catalog(AREAS_TABLE, AreaRow::COLUMNS);
pub static SUBAREAS: TableSpec = catalog(SUBAREAS_TABLE, SubareaRow::COLUMNS);
pub static POSITIONS: TableSpec = catalog(POSITIONS_TABLE, PositionRow::COLUMNS);
pub static SIGNATURETYPES: TableSpec = catalog(SIGNATURETYPES_TABLE, SignatureTypeRow::COLUMNS);

pub static MAIN: TableSpec = TableSpec {
    table: MAIN_TABLE,
    columns: UserRow::COLUMNS,
    key: &["id"],
    policy: ConflictPolicy::PreserveFirst,
    stage: FlushStage::Main,
    parent_column: None,
    foreign_keys: &[
        ForeignKey::new("role_id", ROLES_TABLE, "id"),
        ForeignKey::new("area_id", AREAS_TABLE, "id"),
        ForeignKey::new("subarea_id", SUBAREAS_TABLE, "id"),
        ForeignKey::new("position_id", POSITIONS_TABLE, "id"),
        ForeignKey::new("signaturetype_id", SIGNATURETYPES_TABLE, "id"),
        ForeignKey::new("customer_id", shared::CUSTOMERS_TABLE, "id"),
    ],
};

static TABLES: &[&TableSpec] = &[&ROLES, &AREAS, &SUBAREAS, &POSITIONS, &SIGNATURETYPES, &MAIN];

crate::table_record! {
    pub struct RoleRow in ROLES {
        id: String,
        name: Option<String>,
    }
}

crate::table_record! {
    pub struct AreaRow in AREAS {
        id: String,
        name: Option<String>,
        descripcion: Option<String>,
    }
}

crate::table_record! {
    pub struct SubareaRow in SUBAREAS {
        id: String,
        name: Option<String>,
    }
}

crate::table_record! {
    pub struct PositionRow in POSITIONS {
        id: String,
        name: Option<String>,
    }
}

crate::table_record! {
    pub struct SignatureTypeRow in SIGNATURETYPES {
        id: String,
        name: Option<String>,
        descripcion: Option<String>,
    }
}

crate::table_record! {
    pub struct UserRow in MAIN {
        id: String,
        firstname: Option<String>,
        lastname: Option<String>,
        username: Option<String>,
        email: Option<String>,
        password: Option<String>,
        role_id: Option<String>,
        area_id: Option<String>,
        subarea_id: Option<String>,
        position_id: Option<String>,
        signaturetype_id: Option<String>,
        customer_id: Option<String>,
        deleted: bool,
        user_type: Option<String>,
        license_status: Option<String>,
        signature: Option<String>,
        dni: Option<String>,
        lumbre_version: Option<String>,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
        updated_by_user_id: Option<String>,
        __v: Option<i64>,
    }
}

/// Embedded catalog entry: `{id, name, descripcion}` with a non-empty id.
struct CatalogEntry {
    id: String,
    name: Option<String>,
    descripcion: Option<String>,
}

fn catalog_entry(doc: &Value, field: &str) -> Option<CatalogEntry> {
    let entry = path(doc, field).filter(|v| v.is_object())?;
    Some(CatalogEntry {
        id: str_at(entry, "id").filter(|id| !id.is_empty())?,
        name: str_at(entry, "name"),
        descripcion: str_at(entry, "descripcion"),
    })
}

/// `createdAt` as a date, else the legacy `created_at` string written
/// without fractional seconds.
fn dual_timestamp(doc: &Value, primary: &str, legacy: &str) -> Option<DateTime<Utc>> {
    fields::timestamp(doc, primary).or_else(|| {
        let raw = path(doc, legacy)?.as_str()?;
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%SZ")
            .ok()
            .map(|naive| naive.and_utc())
    })
}

pub struct UsersMigrator;

#[async_trait]
impl CollectionMigrator for UsersMigrator {
    fn collection(&self) -> Collection {
        Collection::Users
    }

    fn main_table(&self) -> &'static TableSpec {
        &MAIN
    }

    fn tables(&self) -> &'static [&'static TableSpec] {
        TABLES
    }

    fn preload(&self) -> &'static [EntityKind] {
        &[]
    }

    /// A truth source consumes nothing upstream except the shared customer.
    async fn resolve_shared(&self, doc: &Value, resolver: &mut EntityResolver<'_>) -> Result<SharedRefs> {
        Ok(SharedRefs {
            customer_id: resolver.customer(doc).await?,
            ..SharedRefs::default()
        })
    }

    fn decompose(
        &self,
        doc: &Value,
        refs: &SharedRefs,
        _known: &EntityCache,
    ) -> std::result::Result<Decomposed, DecomposeError> {
        let id = fields::required_key(doc)?;

        let role = catalog_entry(doc, "role");
        let area = catalog_entry(doc, "area");
        let subarea = catalog_entry(doc, "subarea");
        let position = catalog_entry(doc, "position");
        let signaturetype = catalog_entry(doc, "signaturetype");

        let user = UserRow {
            id,
            firstname: str_at(doc, "firstname"),
            lastname: str_at(doc, "lastname"),
            username: str_at(doc, "username"),
            email: str_at(doc, "email"),
            password: str_at(doc, "password"),
            role_id: role.as_ref().map(|c| c.id.clone()),
            area_id: area.as_ref().map(|c| c.id.clone()),
            subarea_id: subarea.as_ref().map(|c| c.id.clone()),
            position_id: position.as_ref().map(|c| c.id.clone()),
            signaturetype_id: signaturetype.as_ref().map(|c| c.id.clone()),
            customer_id: refs.customer_id.clone(),
            deleted: bool_or(doc, "deleted", false),
            // `useerType` is a long-lived typo in the source data.
            user_type: first_str(doc, &["userType", "useerType"]),
            license_status: first_str(doc, &["license_status", "licenseStatus"]),
            signature: str_at(doc, "signature"),
            dni: str_at(doc, "dni"),
            lumbre_version: first_str(doc, &["lumbre_version", "lumbreVersion"]),
            created_at: dual_timestamp(doc, "createdAt", "created_at"),
            updated_at: dual_timestamp(doc, "updatedAt", "updated_at"),
            updated_by_user_id: str_at(doc, "updatedBy.user.id"),
            __v: i64_at(doc, "__v"),
        };

        Ok(Decomposed::new(user)
            .with(role.map(|c| RoleRow { id: c.id, name: c.name }))
            .with(area.map(|c| AreaRow {
                id: c.id,
                name: c.name,
                descripcion: c.descripcion,
            }))
            .with(subarea.map(|c| SubareaRow { id: c.id, name: c.name }))
            .with(position.map(|c| PositionRow { id: c.id, name: c.name }))
            .with(signaturetype.map(|c| SignatureTypeRow {
                id: c.id,
                name: c.name,
                descripcion: c.descripcion,
            })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqlValue;
    use serde_json::json;

    fn decompose(doc: &Value) -> Decomposed {
        UsersMigrator
            .decompose(doc, &SharedRefs::default(), &EntityCache::new())
            .unwrap()
    }

    fn value(decomposed: &Decomposed, column: &str) -> SqlValue {
        let index = MAIN.column_index(column).unwrap();
        decomposed.main.row[index].clone()
    }

    #[test]
    fn test_catalogs_come_with_the_user() {
        let doc = json!({
            "_id": {"$oid": "64a000000000000000000001"},
            "firstname": "Ana",
            "role": {"id": "r1", "name": "Admin"},
            "area": {"id": "a1", "name": "Legal", "descripcion": "Legal dept"},
            "position": {"name": "no id"}
        });
        let decomposed = decompose(&doc);
        assert_eq!(decomposed.related("roles").len(), 1);
        assert_eq!(decomposed.related("areas").len(), 1);
        assert!(decomposed.related("positions").is_empty());
        assert_eq!(value(&decomposed, "role_id"), SqlValue::from("r1"));
        assert_eq!(value(&decomposed, "position_id"), SqlValue::Text(None));
    }

    #[test]
    fn test_legacy_fields() {
        let doc = json!({
            "_id": "user-legacy",
            "useerType": "external",
            "created_at": "2024-01-15T10:30:00Z",
            "updatedAt": {"$date": "2024-02-01T08:00:00.000Z"},
            "updatedBy": {"user": {"id": "user-admin"}}
        });
        let decomposed = decompose(&doc);
        assert_eq!(value(&decomposed, "user_type"), SqlValue::from("external"));
        assert_eq!(
            value(&decomposed, "created_at"),
            SqlValue::from(DateTime::parse_from_rfc3339("2024-01-15T10:30:00Z").unwrap().with_timezone(&Utc))
        );
        assert!(!value(&decomposed, "updated_at").is_null());
        assert_eq!(value(&decomposed, "updated_by_user_id"), SqlValue::from("user-admin"));
        assert_eq!(value(&decomposed, "deleted"), SqlValue::Bool(Some(false)));
    }

    #[test]
    fn test_missing_id_is_rejected() {
        let err = UsersMigrator
            .decompose(&json!({"firstname": "x"}), &SharedRefs::default(), &EntityCache::new())
            .unwrap_err();
        assert_eq!(err, DecomposeError::MissingPrimaryKey);
    }
}
