//! `lml_processtypes_mesa4core` → `lml_processtypes`
//!
//! Process type configuration. Owns three small catalogs (type prefixes,
//! people types, initiator types) and references the user catalogs of
//! `lml_users`. Permission lists pointing at areas, subareas or roles that
//! do not exist there are dropped element by element.

use super::{fields, shared, users, Decomposed};
use crate::db::{ConflictPolicy, FlushStage, ForeignKey, TableRef, TableSpec};
use crate::descriptor::Collection;
use crate::document::{array_at, bool_at, i64_at, json_at, path, reference_id, scalar_text, str_at};
use crate::error::DecomposeError;
use crate::etl::{EntityCache, EntityKind, SharedRefs};
use crate::migrators::CollectionMigrator;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

const SCHEMA: &str = "lml_processtypes";

pub const MAIN_TABLE: TableRef = TableRef::new(SCHEMA, "main");
pub const TYPE_PREFIXES_TABLE: TableRef = TableRef::new(SCHEMA, "type_prefixes");
pub const PEOPLE_TYPES_TABLE: TableRef = TableRef::new(SCHEMA, "people_types");
pub const INITIATOR_TYPES_TABLE: TableRef = TableRef::new(SCHEMA, "initiator_types");

const fn catalog(table: TableRef, columns: &'static [&'static str]) -> TableSpec {
    TableSpec {
        table,
        columns,
        key: &["id"],
        policy: ConflictPolicy::PreserveFirst,
        stage: FlushStage::Catalog,
        parent_column: None,
        foreign_keys: &[],
    }
}

pub static TYPE_PREFIXES: TableSpec = catalog(TYPE_PREFIXES_TABLE, TypePrefixRow::COLUMNS);
pub static PEOPLE_TYPES: TableSpec = catalog(PEOPLE_TYPES_TABLE, PeopleTypeRow::COLUMNS);
pub static INITIATOR_TYPES: TableSpec = catalog(INITIATOR_TYPES_TABLE, InitiatorTypeRow::COLUMNS);

pub static MAIN: TableSpec = TableSpec {
    table: MAIN_TABLE,
    columns: ProcessTypeRow::COLUMNS,
    key: &["processtype_id"],
    policy: ConflictPolicy::PreserveFirst,
    stage: FlushStage::Main,
    parent_column: None,
    foreign_keys: &[
        ForeignKey::new("customer_id", shared::CUSTOMERS_TABLE, "id"),
        ForeignKey::new("type_prefix_id", TYPE_PREFIXES_TABLE, "id"),
        ForeignKey::new("type_correction_role_id", users::ROLES_TABLE, "id"),
        ForeignKey::new("type_reopen_role_id", users::ROLES_TABLE, "id"),
        ForeignKey::new("created_by_user_id", users::MAIN_TABLE, "id"),
        ForeignKey::new("updated_by_user_id", users::MAIN_TABLE, "id"),
    ],
};

const OWNER: ForeignKey = ForeignKey::new("processtype_id", MAIN_TABLE, "processtype_id");

/// Child keyed by `(processtype_id, <second>)`; repeats inside one
/// document are dropped.
const fn child(
    name: &'static str,
    columns: &'static [&'static str],
    key: &'static [&'static str],
    foreign_keys: &'static [ForeignKey],
) -> TableSpec {
    TableSpec {
        table: TableRef::new(SCHEMA, name),
        columns,
        key,
        policy: ConflictPolicy::PreserveFirst,
        stage: FlushStage::Child,
        parent_column: Some("processtype_id"),
        foreign_keys,
    }
}

const STARTER_PEOPLE_FKS: &[ForeignKey] = &[OWNER, ForeignKey::new("people_type_id", PEOPLE_TYPES_TABLE, "id")];
const STARTER_INITIATOR_FKS: &[ForeignKey] =
    &[OWNER, ForeignKey::new("initiator_type_id", INITIATOR_TYPES_TABLE, "id")];
const AREA_ACTION_FKS: &[ForeignKey] = &[
    OWNER,
    ForeignKey::new("area_id", users::AREAS_TABLE, "id"),
    ForeignKey::new("role_id", users::ROLES_TABLE, "id"),
];
const SUBAREA_ACTION_FKS: &[ForeignKey] = &[
    OWNER,
    ForeignKey::new("subarea_id", users::SUBAREAS_TABLE, "id"),
    ForeignKey::new("role_id", users::ROLES_TABLE, "id"),
];
const EDIT_AREA_FKS: &[ForeignKey] = &[OWNER, ForeignKey::new("area_id", users::AREAS_TABLE, "id")];
const EDIT_SUBAREA_FKS: &[ForeignKey] = &[OWNER, ForeignKey::new("subarea_id", users::SUBAREAS_TABLE, "id")];
const EDIT_ROLE_FKS: &[ForeignKey] = &[OWNER, ForeignKey::new("role_id", users::ROLES_TABLE, "id")];
const OWNER_ONLY: &[ForeignKey] = &[OWNER];

pub static STARTER_PEOPLE_TYPES: TableSpec = child(
    "starter_people_types",
    StarterPeopleTypeRow::COLUMNS,
    &["processtype_id", "people_type_id"],
    STARTER_PEOPLE_FKS,
);
pub static STARTER_INITIATOR_TYPES: TableSpec = child(
    "starter_initiator_types",
    StarterInitiatorTypeRow::COLUMNS,
    &["processtype_id", "initiator_type_id"],
    STARTER_INITIATOR_FKS,
);
pub static INSTANCE_ACTIONS_AREA: TableSpec = child(
    "instance_actions_area",
    InstanceActionAreaRow::COLUMNS,
    &["processtype_id", "area_id"],
    AREA_ACTION_FKS,
);
pub static INSTANCE_ACTIONS_SUBAREA: TableSpec = child(
    "instance_actions_subarea",
    InstanceActionSubareaRow::COLUMNS,
    &["processtype_id", "subarea_id"],
    SUBAREA_ACTION_FKS,
);
pub static INSTANCE_ACTIONS_EDIT_AREA: TableSpec = child(
    "instance_actions_edit_area",
    EditAreaRow::COLUMNS,
    &["processtype_id", "area_id"],
    EDIT_AREA_FKS,
);
pub static INSTANCE_ACTIONS_EDIT_SUBAREA: TableSpec = child(
    "instance_actions_edit_subarea",
    EditSubareaRow::COLUMNS,
    &["processtype_id", "subarea_id"],
    EDIT_SUBAREA_FKS,
);
pub static INSTANCE_ACTIONS_EDIT_ROLE: TableSpec = child(
    "instance_actions_edit_role",
    EditRoleRow::COLUMNS,
    &["processtype_id", "role_id"],
    EDIT_ROLE_FKS,
);
pub static PROCESS_FIELDS: TableSpec = child(
    "process_fields",
    ProcessFieldRow::COLUMNS,
    &["processtype_id", "field_id"],
    OWNER_ONLY,
);

static TABLES: &[&TableSpec] = &[
    &TYPE_PREFIXES,
    &PEOPLE_TYPES,
    &INITIATOR_TYPES,
    &MAIN,
    &STARTER_PEOPLE_TYPES,
    &STARTER_INITIATOR_TYPES,
    &INSTANCE_ACTIONS_AREA,
    &INSTANCE_ACTIONS_SUBAREA,
    &INSTANCE_ACTIONS_EDIT_AREA,
    &INSTANCE_ACTIONS_EDIT_SUBAREA,
    &INSTANCE_ACTIONS_EDIT_ROLE,
    &PROCESS_FIELDS,
];

crate::table_record! {
    pub struct TypePrefixRow in TYPE_PREFIXES {
        id: String,
        name: String,
    }
}

crate::table_record! {
    pub struct PeopleTypeRow in PEOPLE_TYPES {
        id: String,
        name: String,
    }
}

crate::table_record! {
    pub struct InitiatorTypeRow in INITIATOR_TYPES {
        id: String,
        name: String,
    }
}

crate::table_record! {
    pub struct ProcessTypeRow in MAIN {
        processtype_id: String,
        type_name: Option<String>,
        type_alias: Option<String>,
        type_description: Option<String>,
        type_numerator: Option<String>,
        type_comments: Option<String>,
        type_can_be_taken: Option<bool>,
        type_can_be_taken_detail: Option<String>,
        type_hide_comments_on_finished: Option<bool>,
        tad_available: Option<bool>,
        tad_url: Option<String>,
        is_editable: Option<bool>,
        published: Option<bool>,
        deleted: Option<bool>,
        user_who_associated_can_correct: Option<bool>,
        lumbre_version: Option<String>,
        _master: Option<bool>,
        __v: Option<i64>,
        _v: Option<i64>,
        listbuilder_id: Option<String>,
        formbuilder_id: Option<String>,
        customer_id: Option<String>,
        type_prefix_id: Option<String>,
        type_correction_role_id: Option<String>,
        type_reopen_role_id: Option<String>,
        calculated_props: Option<Value>,
        contenttemplate_conditionals: Option<Value>,
        process_fields_validations: Option<Value>,
        suggest: Option<Value>,
        created_by_user_id: Option<String>,
        updated_by_user_id: Option<String>,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
    }
}

crate::table_record! {
    pub struct StarterPeopleTypeRow in STARTER_PEOPLE_TYPES {
        processtype_id: String,
        people_type_id: String,
    }
}

crate::table_record! {
    pub struct StarterInitiatorTypeRow in STARTER_INITIATOR_TYPES {
        processtype_id: String,
        initiator_type_id: String,
    }
}

crate::table_record! {
    pub struct InstanceActionAreaRow in INSTANCE_ACTIONS_AREA {
        processtype_id: String,
        area_id: String,
        area_name: Option<String>,
        role_id: Option<String>,
        action: Option<String>,
    }
}

crate::table_record! {
    pub struct InstanceActionSubareaRow in INSTANCE_ACTIONS_SUBAREA {
        processtype_id: String,
        subarea_id: String,
        subarea_name: Option<String>,
        role_id: Option<String>,
        action: Option<String>,
    }
}

crate::table_record! {
    pub struct EditAreaRow in INSTANCE_ACTIONS_EDIT_AREA {
        processtype_id: String,
        area_id: String,
        area_name: Option<String>,
    }
}

crate::table_record! {
    pub struct EditSubareaRow in INSTANCE_ACTIONS_EDIT_SUBAREA {
        processtype_id: String,
        subarea_id: String,
        subarea_name: Option<String>,
    }
}

crate::table_record! {
    pub struct EditRoleRow in INSTANCE_ACTIONS_EDIT_ROLE {
        processtype_id: String,
        role_id: String,
        role_name: Option<String>,
    }
}

crate::table_record! {
    pub struct ProcessFieldRow in PROCESS_FIELDS {
        processtype_id: String,
        field_id: Option<String>,
        field_order: i64,
        class: Option<String>,
        component_name: Option<String>,
        form_property: Option<String>,
        is_hidden_on_pdf: Option<bool>,
        has_label_on_pdf: Option<bool>,
        component_props: Option<Value>,
        component_permissions: Option<Value>,
        visibility_conditions: Option<Value>,
    }
}

/// An `{id, name}` element with a usable id.
struct Named<'a> {
    id: String,
    name: Option<String>,
    value: &'a Value,
}

fn named(items: &[Value]) -> impl Iterator<Item = Named<'_>> {
    items.iter().filter(|v| v.is_object()).filter_map(|value| {
        Some(Named {
            id: value.get("id").and_then(scalar_text).filter(|id| !id.is_empty())?,
            name: str_at(value, "name"),
            value,
        })
    })
}

/// Id of an embedded role reference, kept only when the role exists.
fn known_role(known: &EntityCache, value: &Value, field: &str) -> Option<String> {
    path(value, field)
        .and_then(reference_id)
        .filter(|id| known.has(EntityKind::Role, id))
}

pub struct ProcessTypesMigrator;

#[async_trait]
impl CollectionMigrator for ProcessTypesMigrator {
    fn collection(&self) -> Collection {
        Collection::ProcessTypes
    }

    fn main_table(&self) -> &'static TableSpec {
        &MAIN
    }

    fn tables(&self) -> &'static [&'static TableSpec] {
        TABLES
    }

    fn preload(&self) -> &'static [EntityKind] {
        &[EntityKind::User, EntityKind::Role, EntityKind::Area, EntityKind::Subarea]
    }

    fn decompose(
        &self,
        doc: &Value,
        refs: &SharedRefs,
        known: &EntityCache,
    ) -> std::result::Result<Decomposed, DecomposeError> {
        let id = fields::required_key(doc)?;

        let prefix = path(doc, "typePrefix")
            .map(std::slice::from_ref)
            .and_then(|p| named(p).next())
            .map(|p| (p.id, p.name));

        let main = ProcessTypeRow {
            processtype_id: id.clone(),
            type_name: str_at(doc, "typeName"),
            type_alias: str_at(doc, "typeAlias"),
            type_description: str_at(doc, "typeDescription"),
            type_numerator: str_at(doc, "typeNumerator"),
            type_comments: str_at(doc, "typeComments"),
            type_can_be_taken: bool_at(doc, "typeCanBeTaken"),
            type_can_be_taken_detail: str_at(doc, "typeCanBeTakenDetail"),
            type_hide_comments_on_finished: bool_at(doc, "typeHideCommentsOnFinished"),
            tad_available: bool_at(doc, "tadAvailable"),
            tad_url: str_at(doc, "tadUrl"),
            is_editable: bool_at(doc, "isEditable"),
            published: bool_at(doc, "published"),
            deleted: bool_at(doc, "deleted"),
            user_who_associated_can_correct: bool_at(doc, "userWhoAssociatedCanCorrect"),
            lumbre_version: str_at(doc, "lumbreVersion"),
            _master: bool_at(doc, "_master"),
            __v: i64_at(doc, "__v"),
            _v: i64_at(doc, "_v"),
            listbuilder_id: fields::text(doc, &["listbuilderId"]),
            formbuilder_id: fields::text(doc, &["formbuilderId"]),
            customer_id: refs.customer_id.clone(),
            type_prefix_id: prefix.as_ref().map(|(prefix_id, _)| prefix_id.clone()),
            type_correction_role_id: known_role(known, doc, "typeCorrection"),
            type_reopen_role_id: known_role(known, doc, "typeReOpen"),
            calculated_props: json_at(doc, "calculatedProps"),
            contenttemplate_conditionals: json_at(doc, "contenttemplateConditionals"),
            process_fields_validations: json_at(doc, "processFieldsValidations"),
            suggest: json_at(doc, "suggest"),
            created_by_user_id: refs.created_by_user_id.clone(),
            updated_by_user_id: refs.updated_by_user_id.clone(),
            created_at: fields::timestamp(doc, "createdAt"),
            updated_at: fields::timestamp(doc, "updatedAt"),
        };

        let people_types: Vec<Named> = named(array_at(doc, "instanceStarters.peopleTypes")).collect();
        let initiator_types: Vec<Named> = named(array_at(doc, "instanceStarters.initiatorTypes")).collect();

        let action_areas = named(array_at(doc, "instanceActions.area"))
            .filter(|a| known.has(EntityKind::Area, &a.id))
            .map(|a| InstanceActionAreaRow {
                processtype_id: id.clone(),
                role_id: known_role(known, a.value, "role"),
                action: str_at(a.value, "action"),
                area_id: a.id,
                area_name: a.name,
            });
        let action_subareas = named(array_at(doc, "instanceActions.subarea"))
            .filter(|s| known.has(EntityKind::Subarea, &s.id))
            .map(|s| InstanceActionSubareaRow {
                processtype_id: id.clone(),
                role_id: known_role(known, s.value, "role"),
                action: str_at(s.value, "action"),
                subarea_id: s.id,
                subarea_name: s.name,
            });
        let edit_areas = named(array_at(doc, "instanceActionsEdit.area"))
            .filter(|a| known.has(EntityKind::Area, &a.id))
            .map(|a| EditAreaRow {
                processtype_id: id.clone(),
                area_id: a.id,
                area_name: a.name,
            });
        let edit_subareas = named(array_at(doc, "instanceActionsEdit.subarea"))
            .filter(|s| known.has(EntityKind::Subarea, &s.id))
            .map(|s| EditSubareaRow {
                processtype_id: id.clone(),
                subarea_id: s.id,
                subarea_name: s.name,
            });
        let edit_roles = named(array_at(doc, "instanceActionsEdit.role"))
            .filter(|r| known.has(EntityKind::Role, &r.id))
            .map(|r| EditRoleRow {
                processtype_id: id.clone(),
                role_id: r.id,
                role_name: r.name,
            });

        let process_fields = array_at(doc, "processFields")
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_object())
            .map(|(order, f)| ProcessFieldRow {
                processtype_id: id.clone(),
                field_id: f.get("id").and_then(scalar_text),
                field_order: fields::order(order),
                class: str_at(f, "class"),
                component_name: str_at(f, "componentName"),
                form_property: str_at(f, "formObjectToSendToServerProperty"),
                is_hidden_on_pdf: bool_at(f, "isHiddenOnPdf"),
                has_label_on_pdf: bool_at(f, "hasLabelOnPdf"),
                component_props: json_at(f, "componentProps"),
                component_permissions: json_at(f, "componentPermissions"),
                visibility_conditions: json_at(f, "visibilityDependOnConditions"),
            });

        Ok(Decomposed::new(main)
            .with(prefix.map(|(prefix_id, name)| TypePrefixRow {
                id: prefix_id,
                name: name.unwrap_or_default(),
            }))
            .with(people_types.iter().map(|p| PeopleTypeRow {
                id: p.id.clone(),
                name: p.name.clone().unwrap_or_default(),
            }))
            .with(initiator_types.iter().map(|i| InitiatorTypeRow {
                id: i.id.clone(),
                name: i.name.clone().unwrap_or_default(),
            }))
            .with(people_types.iter().map(|p| StarterPeopleTypeRow {
                processtype_id: id.clone(),
                people_type_id: p.id.clone(),
            }))
            .with(initiator_types.iter().map(|i| StarterInitiatorTypeRow {
                processtype_id: id.clone(),
                initiator_type_id: i.id.clone(),
            }))
            .with(action_areas)
            .with(action_subareas)
            .with(edit_areas)
            .with(edit_subareas)
            .with(edit_roles)
            .with(process_fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqlValue;
    use serde_json::json;

    fn known() -> EntityCache {
        let mut cache = EntityCache::new();
        cache.preload(EntityKind::Area, vec!["area-1".to_string()]);
        cache.preload(EntityKind::Subarea, vec!["sub-1".to_string()]);
        cache.preload(EntityKind::Role, vec!["role-1".to_string()]);
        cache
    }

    #[test]
    fn test_unknown_catalog_references_are_dropped() {
        let doc = json!({
            "_id": "pt-0001",
            "typeName": "Permit",
            "typeCorrection": {"id": "role-1"},
            "typeReOpen": {"id": "role-gone"},
            "instanceActions": {
                "area": [
                    {"id": "area-1", "name": "Legal", "role": {"id": "role-gone"}, "action": "view"},
                    {"id": "area-gone", "name": "Old"}
                ],
                "subarea": [{"id": "sub-1", "role": {"id": "role-1"}}]
            },
            "instanceActionsEdit": {"role": [{"id": "role-1"}, {"id": "role-2"}]}
        });
        let decomposed = ProcessTypesMigrator
            .decompose(&doc, &SharedRefs::default(), &known())
            .unwrap();

        let areas = decomposed.related("instance_actions_area");
        assert_eq!(areas.len(), 1);
        let role = INSTANCE_ACTIONS_AREA.column_index("role_id").unwrap();
        assert_eq!(areas[0].row[role], SqlValue::Text(None));

        let subareas = decomposed.related("instance_actions_subarea");
        assert_eq!(subareas[0].row[role], SqlValue::from("role-1"));
        assert_eq!(decomposed.related("instance_actions_edit_role").len(), 1);

        let main = &decomposed.main.row;
        let correction = MAIN.column_index("type_correction_role_id").unwrap();
        let reopen = MAIN.column_index("type_reopen_role_id").unwrap();
        assert_eq!(main[correction], SqlValue::from("role-1"));
        assert_eq!(main[reopen], SqlValue::Text(None));
    }

    #[test]
    fn test_starters_write_catalog_and_link() {
        let doc = json!({
            "_id": "pt-0002",
            "typePrefix": {"id": "px", "name": "EXP"},
            "instanceStarters": {
                "peopleTypes": [{"id": "pp-1", "name": "Citizen"}, {"name": "no id"}],
                "initiatorTypes": [{"id": "it-1"}]
            },
            "processFields": [{"id": 12, "componentName": "LmSelect"}]
        });
        let decomposed = ProcessTypesMigrator
            .decompose(&doc, &SharedRefs::default(), &known())
            .unwrap();
        assert_eq!(decomposed.related("type_prefixes").len(), 1);
        assert_eq!(decomposed.related("people_types").len(), 1);
        assert_eq!(decomposed.related("starter_people_types").len(), 1);
        assert_eq!(decomposed.related("initiator_types")[0].row[1], SqlValue::from(""));
        assert_eq!(decomposed.related("process_fields")[0].row[1], SqlValue::from("12"));
    }
}
