//! `lml_processes_mesa4core` → `lml_processes`
//!
//! Process instances with their movement trail, initiator fields, attached
//! documents and a 1:1 snapshot of the last movement.

use super::{fields, shared, users, Decomposed};
use crate::db::{ConflictPolicy, FlushStage, ForeignKey, TableRef, TableSpec};
use crate::descriptor::Collection;
use crate::document::{array_at, bool_at, object_at, path, scalar_text, str_at};
use crate::error::DecomposeError;
use crate::etl::{EntityCache, SharedRefs};
use crate::migrators::CollectionMigrator;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

pub const MAIN_TABLE: TableRef = TableRef::new("lml_processes", "main");

const PARENT: &[ForeignKey] = &[ForeignKey::new("process_id", MAIN_TABLE, "process_id")];

const fn child(name: &'static str, columns: &'static [&'static str]) -> TableSpec {
    TableSpec {
        table: TableRef::new("lml_processes", name),
        columns,
        key: &[],
        policy: ConflictPolicy::Append,
        stage: FlushStage::Child,
        parent_column: Some("process_id"),
        foreign_keys: PARENT,
    }
}

pub static MAIN: TableSpec = TableSpec {
    table: MAIN_TABLE,
    columns: ProcessRow::COLUMNS,
    key: &["process_id"],
    policy: ConflictPolicy::PreserveFirst,
    stage: FlushStage::Main,
    parent_column: None,
    foreign_keys: &[
        ForeignKey::new("customer_id", shared::CUSTOMERS_TABLE, "id"),
        ForeignKey::new("created_by_user_id", users::MAIN_TABLE, "id"),
        ForeignKey::new("updated_by_user_id", users::MAIN_TABLE, "id"),
    ],
};

pub static MOVEMENTS: TableSpec = child("movements", MovementRow::COLUMNS);
pub static INITIATOR_FIELDS: TableSpec = child("initiator_fields", InitiatorFieldRow::COLUMNS);
pub static PROCESS_DOCUMENTS: TableSpec = child("process_documents", ProcessDocumentRow::COLUMNS);

pub static LAST_MOVEMENTS: TableSpec = TableSpec {
    table: TableRef::new("lml_processes", "last_movements"),
    columns: LastMovementRow::COLUMNS,
    key: &["process_id"],
    policy: ConflictPolicy::PreserveFirst,
    stage: FlushStage::Child,
    parent_column: Some("process_id"),
    foreign_keys: PARENT,
};

static TABLES: &[&TableSpec] = &[&MAIN, &MOVEMENTS, &INITIATOR_FIELDS, &PROCESS_DOCUMENTS, &LAST_MOVEMENTS];

crate::table_record! {
    pub struct ProcessRow in MAIN {
        process_id: String,
        process_number: Option<String>,
        process_type_name: Option<String>,
        process_address: Option<String>,
        process_type_id: Option<String>,
        customer_id: Option<String>,
        deleted: Option<bool>,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
        process_date: Option<DateTime<Utc>>,
        lumbre_status_name: Option<String>,
        starter_id: Option<String>,
        starter_name: Option<String>,
        starter_type: Option<String>,
        created_by_user_id: Option<String>,
        updated_by_user_id: Option<String>,
    }
}

crate::table_record! {
    pub struct MovementRow in MOVEMENTS {
        process_id: String,
        movement_at: Option<DateTime<Utc>>,
        destination_id: Option<String>,
        destination_type: Option<String>,
    }
}

crate::table_record! {
    /// One entry of the dynamic `initiatorFields` map.
    pub struct InitiatorFieldRow in INITIATOR_FIELDS {
        process_id: String,
        field_key: String,
        field_id: Option<String>,
        field_name: Option<String>,
    }
}

crate::table_record! {
    pub struct ProcessDocumentRow in PROCESS_DOCUMENTS {
        process_id: String,
        doc_type: String,
        document_id: Option<String>,
    }
}

crate::table_record! {
    pub struct LastMovementRow in LAST_MOVEMENTS {
        process_id: String,
        origin_user_id: Option<String>,
        origin_user_name: Option<String>,
        destination_user_id: Option<String>,
        destination_user_name: Option<String>,
        destination_area_name: Option<String>,
        destination_subarea_name: Option<String>,
    }
}

/// "First Last" from a user snapshot, `None` when both parts are missing.
pub(crate) fn full_name(user: &Value) -> Option<String> {
    let name = [str_at(user, "firstname"), str_at(user, "lastname")]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn last_movement(process_id: &str, doc: &Value) -> Option<LastMovementRow> {
    let movement = path(doc, "lastMovement").filter(|m| m.is_object())?;
    let origin = path(movement, "origin.user");
    let destination = path(movement, "destination.user");
    Some(LastMovementRow {
        process_id: process_id.to_string(),
        origin_user_id: origin.and_then(|u| str_at(u, "id")),
        origin_user_name: origin.and_then(full_name),
        destination_user_id: destination.and_then(|u| str_at(u, "id")),
        destination_user_name: destination.and_then(full_name),
        destination_area_name: destination.and_then(|u| str_at(u, "area.name")),
        destination_subarea_name: destination.and_then(|u| str_at(u, "subarea.name")),
    })
}

pub struct ProcessesMigrator;

#[async_trait]
impl CollectionMigrator for ProcessesMigrator {
    fn collection(&self) -> Collection {
        Collection::Processes
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

        let main = ProcessRow {
            process_id: id.clone(),
            process_number: str_at(doc, "processNumber"),
            process_type_name: str_at(doc, "processTypeName"),
            process_address: str_at(doc, "processAddress"),
            process_type_id: str_at(doc, "processTypeId"),
            customer_id: refs.customer_id.clone(),
            deleted: bool_at(doc, "deleted"),
            created_at: fields::timestamp(doc, "createdAt"),
            updated_at: fields::timestamp(doc, "updatedAt"),
            process_date: fields::timestamp(doc, "processDate"),
            lumbre_status_name: str_at(doc, "lumbreStatusName"),
            starter_id: str_at(doc, "processStarter.id"),
            starter_name: str_at(doc, "processStarter.name"),
            starter_type: str_at(doc, "processStarter.starterType"),
            created_by_user_id: refs.created_by_user_id.clone(),
            updated_by_user_id: refs.updated_by_user_id.clone(),
        };

        let movements = array_at(doc, "movements")
            .iter()
            .filter(|m| m.is_object())
            .map(|m| MovementRow {
                process_id: id.clone(),
                movement_at: fields::timestamp(m, "at"),
                destination_id: str_at(m, "id"),
                destination_type: str_at(m, "to"),
            });

        let initiator_fields = object_at(doc, "initiatorFields")
            .into_iter()
            .flatten()
            .filter(|(_, value)| value.is_object())
            .map(|(key, value)| InitiatorFieldRow {
                process_id: id.clone(),
                field_key: key.clone(),
                field_id: value.get("id").and_then(scalar_text),
                field_name: str_at(value, "name"),
            });

        let documents = [("external", "documents"), ("internal", "internalDocuments")]
            .into_iter()
            .flat_map(|(kind, field)| {
                array_at(doc, field)
                    .iter()
                    .filter(|d| d.is_object())
                    .map(move |d| (kind, d))
            })
            .map(|(kind, d)| ProcessDocumentRow {
                process_id: id.clone(),
                doc_type: kind.to_string(),
                document_id: d.get("id").and_then(scalar_text),
            });

        let last = last_movement(&id, doc);

        Ok(Decomposed::new(main)
            .with(movements)
            .with(initiator_fields)
            .with(documents)
            .with(last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqlValue;
    use serde_json::json;

    #[test]
    fn test_process_children() {
        let doc = json!({
            "_id": {"$oid": "proc-0001"},
            "processNumber": 1042,
            "processStarter": {"id": "st-1", "name": "Ana", "starterType": "person"},
            "movements": [
                {"at": {"$date": "2024-01-15T10:30:00.000Z"}, "id": "area-1", "to": "area"},
                {"at": 1705314600000i64, "id": "user-1", "to": "user"}
            ],
            "initiatorFields": {
                "dni": {"id": "f1", "name": "DNI"},
                "note": "plain value"
            },
            "documents": [{"id": "d1"}],
            "internalDocuments": [{"id": "d2"}, null],
            "lastMovement": {
                "origin": {"user": {"id": "user-1", "firstname": "Ana", "lastname": "Paz"}},
                "destination": {"user": {"id": "user-2", "firstname": "Luis", "area": {"name": "Legal"}}}
            }
        });
        let decomposed = ProcessesMigrator
            .decompose(&doc, &SharedRefs::default(), &EntityCache::new())
            .unwrap();

        let number = MAIN.column_index("process_number").unwrap();
        assert_eq!(decomposed.main.row[number], SqlValue::from("1042"));

        let movements = decomposed.related("movements");
        assert_eq!(movements.len(), 2);
        assert_eq!(movements[0].row[1], movements[1].row[1]);

        assert_eq!(decomposed.related("initiator_fields").len(), 1);
        let documents = decomposed.related("process_documents");
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[1].row[1], SqlValue::from("internal"));

        let last = &decomposed.related("last_movements")[0].row;
        assert_eq!(last[2], SqlValue::from("Ana Paz"));
        assert_eq!(last[4], SqlValue::from("Luis"));
        assert_eq!(last[5], SqlValue::from("Legal"));
        assert_eq!(last[6], SqlValue::Text(None));
    }

    #[test]
    fn test_without_last_movement() {
        let doc = json!({"_id": "proc-0002", "lastMovement": null});
        let decomposed = ProcessesMigrator
            .decompose(&doc, &SharedRefs::default(), &EntityCache::new())
            .unwrap();
        assert!(decomposed.related("last_movements").is_empty());
        assert!(decomposed.related("movements").is_empty());
    }
}
