//! `lml_formbuilder_mesa4core` → `lml_formbuilder`

use super::{fields, shared, users, Decomposed};
use crate::db::{ConflictPolicy, FlushStage, ForeignKey, TableRef, TableSpec};
use crate::descriptor::Collection;
use crate::document::{array_at, bool_at, bool_or, i64_at, json_at, scalar_text, str_at};
use crate::error::DecomposeError;
use crate::etl::{EntityCache, SharedRefs};
use crate::migrators::CollectionMigrator;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

pub const MAIN_TABLE: TableRef = TableRef::new("lml_formbuilder", "main");

const PARENT: &[ForeignKey] = &[ForeignKey::new("formbuilder_id", MAIN_TABLE, "formbuilder_id")];

const fn child(name: &'static str, columns: &'static [&'static str]) -> TableSpec {
    TableSpec {
        table: TableRef::new("lml_formbuilder", name),
        columns,
        key: &[],
        policy: ConflictPolicy::Append,
        stage: FlushStage::Child,
        parent_column: Some("formbuilder_id"),
        foreign_keys: PARENT,
    }
}

pub static MAIN: TableSpec = TableSpec {
    table: MAIN_TABLE,
    columns: FormBuilderRow::COLUMNS,
    key: &["formbuilder_id"],
    policy: ConflictPolicy::PreserveFirst,
    stage: FlushStage::Main,
    parent_column: None,
    foreign_keys: &[
        ForeignKey::new("customer_id", shared::CUSTOMERS_TABLE, "id"),
        ForeignKey::new("created_by_user_id", users::MAIN_TABLE, "id"),
        ForeignKey::new("updated_by_user_id", users::MAIN_TABLE, "id"),
    ],
};

pub static ELEMENTS: TableSpec = child("elements", ElementRow::COLUMNS);
pub static ALLOW_ACCESS: TableSpec = child("allow_access", AllowAccessRow::COLUMNS);
pub static ALLOW_CREATE: TableSpec = child("allow_create", AllowCreateRow::COLUMNS);
pub static ALLOW_UPDATE: TableSpec = child("allow_update", AllowUpdateRow::COLUMNS);

static TABLES: &[&TableSpec] = &[&MAIN, &ELEMENTS, &ALLOW_ACCESS, &ALLOW_CREATE, &ALLOW_UPDATE];

crate::table_record! {
    pub struct FormBuilderRow in MAIN {
        formbuilder_id: String,
        alias: Option<String>,
        page_title_data: Option<String>,
        message_after_post_or_put: Option<String>,
        path_to_redirect_after_post_or_put: Option<String>,
        api_rest_for_handle_all_http_methods: Option<String>,
        validations: Option<Value>,
        conditionals: Option<Value>,
        soft_permissions: Option<Value>,
        lumbre_internal: bool,
        lumbre_version: Option<String>,
        created: Option<DateTime<Utc>>,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
        customer_id: Option<String>,
        created_by_user_id: Option<String>,
        updated_by_user_id: Option<String>,
        mongo_version: Option<i64>,
    }
}

crate::table_record! {
    /// One form component. Props vary by component type, so they stay JSON.
    pub struct ElementRow in ELEMENTS {
        formbuilder_id: String,
        element_id: Option<String>,
        component_name: Option<String>,
        form_object_to_send_to_server_property: Option<String>,
        class_name: Option<String>,
        component_props: Option<Value>,
        component_permissions: Option<Value>,
        visibility_depend_on_conditions: Option<Value>,
        actions: Option<Value>,
        validations: Option<Value>,
        is_hidden_on_pdf: Option<bool>,
        has_label_on_pdf: Option<bool>,
        order_index: i64,
    }
}

crate::table_record! {
    pub struct AllowAccessRow in ALLOW_ACCESS {
        formbuilder_id: String,
        privilege_id: Option<String>,
        name: Option<String>,
        codigo_privilegio: Option<String>,
    }
}

crate::table_record! {
    pub struct AllowCreateRow in ALLOW_CREATE {
        formbuilder_id: String,
        privilege_id: Option<String>,
        name: Option<String>,
        codigo_privilegio: Option<String>,
    }
}

crate::table_record! {
    pub struct AllowUpdateRow in ALLOW_UPDATE {
        formbuilder_id: String,
        privilege_id: Option<String>,
        name: Option<String>,
        codigo_privilegio: Option<String>,
    }
}

/// `(privilege_id, name, codigo_privilegio)` for each object in `field`.
fn privileges(doc: &Value, field: &str) -> Vec<(Option<String>, Option<String>, Option<String>)> {
    array_at(doc, field)
        .iter()
        .filter(|p| p.is_object())
        .map(|p| {
            (
                p.get("id").and_then(scalar_text),
                str_at(p, "name"),
                str_at(p, "codigo_privilegio"),
            )
        })
        .collect()
}

pub struct FormBuilderMigrator;

#[async_trait]
impl CollectionMigrator for FormBuilderMigrator {
    fn collection(&self) -> Collection {
        Collection::FormBuilder
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

        let main = FormBuilderRow {
            formbuilder_id: id.clone(),
            alias: str_at(doc, "alias"),
            page_title_data: str_at(doc, "pageTitleData"),
            message_after_post_or_put: str_at(doc, "messageAfterPOSTorPUT"),
            path_to_redirect_after_post_or_put: str_at(doc, "pathToRedirectAfterPOSTorPUT"),
            api_rest_for_handle_all_http_methods: str_at(doc, "apiRestForHandleAllHttpMethods"),
            validations: json_at(doc, "validations"),
            conditionals: json_at(doc, "conditionals"),
            soft_permissions: json_at(doc, "softPermissions"),
            lumbre_internal: bool_or(doc, "lumbreInternal", false),
            lumbre_version: str_at(doc, "lumbreVersion"),
            created: fields::timestamp(doc, "created"),
            created_at: fields::timestamp(doc, "createdAt"),
            updated_at: fields::timestamp(doc, "updatedAt"),
            customer_id: refs.customer_id.clone(),
            created_by_user_id: refs.created_by_user_id.clone(),
            updated_by_user_id: refs.updated_by_user_id.clone(),
            mongo_version: i64_at(doc, "__v"),
        };

        let elements = array_at(doc, "formElements")
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_object())
            .map(|(order, e)| ElementRow {
                formbuilder_id: id.clone(),
                element_id: e.get("id").and_then(scalar_text),
                component_name: str_at(e, "componentName"),
                form_object_to_send_to_server_property: str_at(e, "formObjectToSendToServerProperty"),
                class_name: str_at(e, "class"),
                component_props: json_at(e, "componentProps"),
                component_permissions: json_at(e, "componentPermissions"),
                visibility_depend_on_conditions: json_at(e, "visibilityDependOnConditions"),
                actions: json_at(e, "actions"),
                validations: json_at(e, "validations"),
                is_hidden_on_pdf: bool_at(e, "isHiddenOnPdf"),
                has_label_on_pdf: bool_at(e, "hasLabelOnPdf"),
                order_index: fields::order(order),
            });

        let access = privileges(doc, "allowAccess")
            .into_iter()
            .map(|(privilege_id, name, codigo_privilegio)| AllowAccessRow {
                formbuilder_id: id.clone(),
                privilege_id,
                name,
                codigo_privilegio,
            });
        let create = privileges(doc, "allowCreate")
            .into_iter()
            .map(|(privilege_id, name, codigo_privilegio)| AllowCreateRow {
                formbuilder_id: id.clone(),
                privilege_id,
                name,
                codigo_privilegio,
            });
        let update = privileges(doc, "allowUpdate")
            .into_iter()
            .map(|(privilege_id, name, codigo_privilegio)| AllowUpdateRow {
                formbuilder_id: id.clone(),
                privilege_id,
                name,
                codigo_privilegio,
            });

        Ok(Decomposed::new(main)
            .with(elements)
            .with(access)
            .with(create)
            .with(update))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqlValue;
    use serde_json::json;

    #[test]
    fn test_elements_and_privileges() {
        let doc = json!({
            "_id": "form-0001",
            "alias": "intake",
            "created": {"$date": "2024-01-15T10:30:00.000Z"},
            "formElements": [
                {"id": "e1", "componentName": "LmTextInput", "componentProps": {"label": "Name"}},
                {"id": "e2", "componentName": "LmButton", "componentProps": {}, "isHiddenOnPdf": true}
            ],
            "allowAccess": [{"id": 7, "name": "read", "codigo_privilegio": "R"}],
            "allowUpdate": ["bogus"]
        });
        let decomposed = FormBuilderMigrator
            .decompose(&doc, &SharedRefs::default(), &EntityCache::new())
            .unwrap();

        let elements = decomposed.related("elements");
        assert_eq!(elements.len(), 2);
        let props = ELEMENTS.column_index("component_props").unwrap();
        assert_eq!(elements[0].row[props], SqlValue::Json(Some(json!({"label": "Name"}))));
        assert_eq!(elements[1].row[props], SqlValue::Json(None));

        let access = decomposed.related("allow_access");
        assert_eq!(access.len(), 1);
        assert_eq!(access[0].row[1], SqlValue::from("7"));
        assert!(decomposed.related("allow_update").is_empty());
        assert!(decomposed.related("allow_create").is_empty());
    }
}
