//! `lml_people_mesa4core` → `lml_people`
//!
//! Natural and legal persons. Type-specific fields become nullable columns;
//! the free-form form groups `_3` to `_7` are kept together as JSON.

use super::{fields, shared, users, Decomposed};
use crate::db::{ConflictPolicy, FlushStage, ForeignKey, TableRef, TableSpec};
use crate::descriptor::Collection;
use crate::document::{bool_or, i64_at, is_truthy, path, str_at};
use crate::error::DecomposeError;
use crate::etl::{EntityCache, SharedRefs};
use crate::migrators::CollectionMigrator;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

pub const MAIN_TABLE: TableRef = TableRef::new("lml_people", "main");
pub const PEOPLE_TYPES_TABLE: TableRef = TableRef::new("lml_people", "people_types");
pub const PERSON_ID_TYPES_TABLE: TableRef = TableRef::new("lml_people", "person_id_types");

const DYNAMIC_FIELDS: [&str; 5] = ["_3", "_4", "_5", "_6", "_7"];

pub static PEOPLE_TYPES: TableSpec = TableSpec {
    table: PEOPLE_TYPES_TABLE,
    columns: PeopleTypeRow::COLUMNS,
    key: &["id"],
    policy: ConflictPolicy::UpdateCatalog,
    stage: FlushStage::Catalog,
    parent_column: None,
    foreign_keys: &[],
};

pub static PERSON_ID_TYPES: TableSpec = TableSpec {
    table: PERSON_ID_TYPES_TABLE,
    columns: PersonIdTypeRow::COLUMNS,
    key: &["id"],
    policy: ConflictPolicy::UpdateCatalog,
    stage: FlushStage::Catalog,
    parent_column: None,
    foreign_keys: &[],
};

pub static MAIN: TableSpec = TableSpec {
    table: MAIN_TABLE,
    columns: PersonRow::COLUMNS,
    key: &["people_id"],
    policy: ConflictPolicy::PreserveFirst,
    stage: FlushStage::Main,
    parent_column: None,
    foreign_keys: &[
        ForeignKey::new("people_type_id", PEOPLE_TYPES_TABLE, "id"),
        ForeignKey::new("person_id_type_id", PERSON_ID_TYPES_TABLE, "id"),
        ForeignKey::new("customer_id", shared::CUSTOMERS_TABLE, "id"),
        ForeignKey::new("created_by_user_id", users::MAIN_TABLE, "id"),
        ForeignKey::new("updated_by_user_id", users::MAIN_TABLE, "id"),
    ],
};

static TABLES: &[&TableSpec] = &[&PEOPLE_TYPES, &PERSON_ID_TYPES, &MAIN];

crate::table_record! {
    pub struct PeopleTypeRow in PEOPLE_TYPES {
        id: String,
        name: Option<String>,
        alias: Option<String>,
    }
}

crate::table_record! {
    pub struct PersonIdTypeRow in PERSON_ID_TYPES {
        id: String,
        name: Option<String>,
    }
}

crate::table_record! {
    pub struct PersonRow in MAIN {
        people_id: String,
        people_type_id: String,
        person_id_type_id: String,
        person_name: Option<String>,
        person_email: Option<String>,
        person_id: Option<String>,
        domicilio_humana: Option<String>,
        piso_humana: Option<String>,
        departamento_humana: Option<String>,
        tipo_persona_juridica: Option<String>,
        tipo_asociacion: Option<String>,
        tipo_organismo: Option<String>,
        tipo_sociedad: Option<String>,
        direccion_juridica: Option<String>,
        dynamic_fields: Option<Value>,
        people_content: Option<String>,
        customer_id: Option<String>,
        created_by_user_id: Option<String>,
        updated_by_user_id: Option<String>,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
        deleted: bool,
        lumbre_version: Option<String>,
        __v: Option<i64>,
    }
}

fn dynamic_fields(doc: &Value) -> Option<Value> {
    let fields: Map<String, Value> = DYNAMIC_FIELDS
        .iter()
        .filter_map(|name| {
            path(doc, name)
                .filter(|v| is_truthy(v))
                .map(|v| (name.to_string(), v.clone()))
        })
        .collect();
    (!fields.is_empty()).then_some(Value::Object(fields))
}

pub struct PeopleMigrator;

#[async_trait]
impl CollectionMigrator for PeopleMigrator {
    fn collection(&self) -> Collection {
        Collection::People
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
        _known: &EntityCache,
    ) -> std::result::Result<Decomposed, DecomposeError> {
        let id = fields::required_key(doc)?;
        let people_type_id = str_at(doc, "peopleTypeId")
            .filter(|s| !s.is_empty())
            .ok_or(DecomposeError::MissingField("peopleTypeId"))?;
        let person_id_type_id = str_at(doc, "personIdType.id")
            .filter(|s| !s.is_empty())
            .ok_or(DecomposeError::MissingField("personIdType.id"))?;

        // Missing timestamps stay NULL so reruns rebuild identical rows.
        let created_at = fields::timestamp(doc, "createdAt");
        let updated_at = fields::timestamp(doc, "updatedAt").or(created_at);

        let people_type = PeopleTypeRow {
            id: people_type_id.clone(),
            name: str_at(doc, "peopleTypeName"),
            alias: str_at(doc, "peopleTypeAlias"),
        };
        let person_id_type = PersonIdTypeRow {
            id: person_id_type_id.clone(),
            name: str_at(doc, "personIdType.name"),
        };

        let person = PersonRow {
            people_id: id,
            people_type_id,
            person_id_type_id,
            person_name: str_at(doc, "personName"),
            person_email: str_at(doc, "personEmail"),
            person_id: str_at(doc, "personId"),
            domicilio_humana: str_at(doc, "domicilio_0"),
            piso_humana: str_at(doc, "piso_1"),
            departamento_humana: str_at(doc, "departamento_2"),
            tipo_persona_juridica: str_at(doc, "tipo_de_persona_juridica_0"),
            tipo_asociacion: str_at(doc, "tipo_de_asociacion_1"),
            tipo_organismo: str_at(doc, "tipo_de_organismo_2"),
            tipo_sociedad: str_at(doc, "tipo_de_sociedad_3"),
            direccion_juridica: str_at(doc, "direccion_4"),
            dynamic_fields: dynamic_fields(doc),
            people_content: str_at(doc, "peopleContent"),
            customer_id: refs.customer_id.clone(),
            created_by_user_id: refs.created_by_user_id.clone(),
            updated_by_user_id: refs.updated_by_user_id.clone(),
            created_at,
            updated_at,
            deleted: bool_or(doc, "deleted", false),
            lumbre_version: str_at(doc, "lumbreVersion"),
            __v: i64_at(doc, "__v"),
        };

        Ok(Decomposed::new(person)
            .with(Some(people_type))
            .with(Some(person_id_type)))
    }
}
