//! `lml_listbuilder_mesa4core` → `lml_listbuilder`
//!
//! List screen definitions. Variable-shape settings (GraphQL variables, soft
//! permissions, aggregations, box options) stay JSON; every repeated array
//! becomes an ordered child table.

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

pub const MAIN_TABLE: TableRef = TableRef::new("lml_listbuilder", "main");

const PARENT: &[ForeignKey] = &[ForeignKey::new("listbuilder_id", MAIN_TABLE, "listbuilder_id")];

const fn child(name: &'static str, columns: &'static [&'static str]) -> TableSpec {
    TableSpec {
        table: TableRef::new("lml_listbuilder", name),
        columns,
        key: &[],
        policy: ConflictPolicy::Append,
        stage: FlushStage::Child,
        parent_column: Some("listbuilder_id"),
        foreign_keys: PARENT,
    }
}

pub static MAIN: TableSpec = TableSpec {
    table: MAIN_TABLE,
    columns: ListBuilderRow::COLUMNS,
    key: &["listbuilder_id"],
    policy: ConflictPolicy::PreserveFirst,
    stage: FlushStage::Main,
    parent_column: None,
    foreign_keys: &[
        ForeignKey::new("customer_id", shared::CUSTOMERS_TABLE, "id"),
        ForeignKey::new("created_by_user_id", users::MAIN_TABLE, "id"),
        ForeignKey::new("updated_by_user_id", users::MAIN_TABLE, "id"),
    ],
};

pub static FIELDS: TableSpec = child("fields", FieldRow::COLUMNS);
pub static AVAILABLE_FIELDS: TableSpec = child("available_fields", AvailableFieldRow::COLUMNS);
pub static ITEMS: TableSpec = child("items", ItemRow::COLUMNS);
pub static BUTTON_LINKS: TableSpec = child("button_links", ButtonLinkRow::COLUMNS);
pub static PATH_ACTIONS: TableSpec = child("path_actions", PathActionRow::COLUMNS);
pub static SEARCH_FIELDS_SELECTED: TableSpec = child("search_fields_selected", SearchFieldSelectedRow::COLUMNS);
pub static SEARCH_FIELDS_TO_SELECTED: TableSpec =
    child("search_fields_to_selected", SearchFieldToSelectRow::COLUMNS);
pub static PRIVILEGES: TableSpec = child("privileges", PrivilegeRow::COLUMNS);

static TABLES: &[&TableSpec] = &[
    &MAIN,
    &FIELDS,
    &AVAILABLE_FIELDS,
    &ITEMS,
    &BUTTON_LINKS,
    &PATH_ACTIONS,
    &SEARCH_FIELDS_SELECTED,
    &SEARCH_FIELDS_TO_SELECTED,
    &PRIVILEGES,
];

crate::table_record! {
    pub struct ListBuilderRow in MAIN {
        listbuilder_id: String,
        alias: Option<String>,
        title_list: Option<String>,
        gql_field: Option<String>,
        gql_query: Option<String>,
        gql_variables: Option<Value>,
        mode_table: bool,
        mode_map: bool,
        lumbre_internal: bool,
        lumbre_version: Option<String>,
        selectable: Option<bool>,
        items_per_page: Option<i64>,
        page: Option<i64>,
        soft_permissions: Option<Value>,
        aggs: Option<Value>,
        meta_search: Option<Value>,
        mode_box_options: Option<Value>,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
        created_by_user_id: Option<String>,
        updated_by_user_id: Option<String>,
        customer_id: Option<String>,
        mongo_version: Option<i64>,
    }
}

crate::table_record! {
    pub struct FieldRow in FIELDS {
        listbuilder_id: String,
        field_key: Option<String>,
        field_label: Option<String>,
        sortable: bool,
        field_order: i64,
    }
}

crate::table_record! {
    pub struct AvailableFieldRow in AVAILABLE_FIELDS {
        listbuilder_id: String,
        field_key: Option<String>,
        field_label: Option<String>,
        sortable: bool,
        field_order: i64,
    }
}

crate::table_record! {
    pub struct ItemRow in ITEMS {
        listbuilder_id: String,
        item_name: String,
        item_order: i64,
    }
}

crate::table_record! {
    pub struct ButtonLinkRow in BUTTON_LINKS {
        listbuilder_id: String,
        button_value: Option<String>,
        button_to: Option<String>,
        button_class: Option<String>,
        endpoint_to_validate_visibility: Option<String>,
        show_button: bool,
        disabled: bool,
        button_order: i64,
    }
}

crate::table_record! {
    pub struct PathActionRow in PATH_ACTIONS {
        listbuilder_id: String,
        action_to: Option<String>,
        tooltip: Option<String>,
        font_awesome_icon: Option<String>,
        action_order: i64,
    }
}

crate::table_record! {
    pub struct SearchFieldSelectedRow in SEARCH_FIELDS_SELECTED {
        listbuilder_id: String,
        field_name: String,
        field_order: i64,
    }
}

crate::table_record! {
    pub struct SearchFieldToSelectRow in SEARCH_FIELDS_TO_SELECTED {
        listbuilder_id: String,
        field_name: String,
        field_order: i64,
    }
}

crate::table_record! {
    pub struct PrivilegeRow in PRIVILEGES {
        listbuilder_id: String,
        privilege_id: Option<String>,
        privilege_name: Option<String>,
        privilege_code: Option<String>,
    }
}

/// Object elements of an array with their position in the original array.
fn objects<'a>(doc: &'a Value, key: &str) -> impl Iterator<Item = (i64, &'a Value)> {
    array_at(doc, key)
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_object())
        .map(|(i, v)| (fields::order(i), v))
}

/// String elements of an array with their position.
fn names<'a>(doc: &'a Value, key: &str) -> impl Iterator<Item = (i64, String)> + 'a {
    array_at(doc, key)
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.as_str().map(|s| (fields::order(i), s.to_string())))
}

pub struct ListBuilderMigrator;

#[async_trait]
impl CollectionMigrator for ListBuilderMigrator {
    fn collection(&self) -> Collection {
        Collection::ListBuilder
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

        let main = ListBuilderRow {
            listbuilder_id: id.clone(),
            alias: str_at(doc, "alias"),
            title_list: str_at(doc, "titleList"),
            gql_field: str_at(doc, "gqlField"),
            gql_query: str_at(doc, "gqlQuery"),
            gql_variables: json_at(doc, "gqlVariables"),
            mode_table: bool_or(doc, "mode.table", true),
            mode_map: bool_or(doc, "mode.map", false),
            lumbre_internal: bool_or(doc, "lumbreInternal", false),
            lumbre_version: str_at(doc, "lumbreVersion"),
            selectable: bool_at(doc, "selectable"),
            items_per_page: i64_at(doc, "itemsPerPage"),
            page: i64_at(doc, "page"),
            soft_permissions: json_at(doc, "softPermissions"),
            aggs: json_at(doc, "aggs"),
            meta_search: json_at(doc, "metaSearch"),
            mode_box_options: json_at(doc, "modeBoxOptions"),
            created_at: fields::timestamp(doc, "createdAt"),
            updated_at: fields::timestamp(doc, "updatedAt"),
            created_by_user_id: refs.created_by_user_id.clone(),
            updated_by_user_id: refs.updated_by_user_id.clone(),
            customer_id: refs.customer_id.clone(),
            mongo_version: i64_at(doc, "__v"),
        };

        let fields_rows = objects(doc, "fields").map(|(order, f)| FieldRow {
            listbuilder_id: id.clone(),
            field_key: str_at(f, "key"),
            field_label: str_at(f, "label"),
            sortable: bool_or(f, "sortable", false),
            field_order: order,
        });
        let available = objects(doc, "allAvailableFields").map(|(order, f)| AvailableFieldRow {
            listbuilder_id: id.clone(),
            field_key: str_at(f, "key"),
            field_label: str_at(f, "label"),
            sortable: bool_or(f, "sortable", false),
            field_order: order,
        });
        let items = objects(doc, "items").filter_map(|(order, item)| {
            Some(ItemRow {
                listbuilder_id: id.clone(),
                item_name: str_at(item, "name").filter(|n| !n.is_empty())?,
                item_order: order,
            })
        });
        let buttons = objects(doc, "buttonLinks").map(|(order, b)| ButtonLinkRow {
            listbuilder_id: id.clone(),
            button_value: str_at(b, "value"),
            button_to: str_at(b, "to"),
            button_class: str_at(b, "buttonClass"),
            endpoint_to_validate_visibility: str_at(b, "endpointToValidateVisibility"),
            show_button: bool_or(b, "show", true),
            disabled: bool_or(b, "disabled", false),
            button_order: order,
        });
        let actions = objects(doc, "lmPathActions").map(|(order, a)| PathActionRow {
            listbuilder_id: id.clone(),
            action_to: str_at(a, "to"),
            tooltip: str_at(a, "tooltip"),
            font_awesome_icon: str_at(a, "fontAwesomeIcon"),
            action_order: order,
        });
        let selected = names(doc, "searchOnFieldsSelected").map(|(order, name)| SearchFieldSelectedRow {
            listbuilder_id: id.clone(),
            field_name: name,
            field_order: order,
        });
        let to_select = names(doc, "searchOnFieldsToSelected").map(|(order, name)| SearchFieldToSelectRow {
            listbuilder_id: id.clone(),
            field_name: name,
            field_order: order,
        });
        let privileges = objects(doc, "privileges").map(|(_, p)| PrivilegeRow {
            listbuilder_id: id.clone(),
            privilege_id: p.get("id").and_then(scalar_text),
            privilege_name: str_at(p, "name"),
            privilege_code: str_at(p, "codigo_privilegio"),
        });

        Ok(Decomposed::new(main)
            .with(fields_rows)
            .with(available)
            .with(items)
            .with(buttons)
            .with(actions)
            .with(selected)
            .with(to_select)
            .with(privileges))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqlValue;
    use serde_json::json;

    #[test]
    fn test_children_keep_array_positions() {
        let doc = json!({
            "_id": {"$oid": "lb-0001"},
            "titleList": "Clients",
            "fields": [
                {"key": "name", "label": "Name", "sortable": true},
                "not-an-object",
                {"key": "email", "label": "Email"}
            ],
            "items": [{"name": "a"}, {"name": ""}, {"name": "c"}],
            "searchOnFieldsSelected": ["name", 3, "email"],
            "gqlVariables": {},
            "aggs": {"count": true}
        });
        let refs = SharedRefs {
            customer_id: Some("cust-1".to_string()),
            ..SharedRefs::default()
        };
        let decomposed = ListBuilderMigrator.decompose(&doc, &refs, &EntityCache::new()).unwrap();

        let fields = decomposed.related("fields");
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].row[4], SqlValue::Int(Some(2)));
        assert_eq!(decomposed.related("items").len(), 2);
        assert_eq!(decomposed.related("search_fields_selected").len(), 2);
        assert!(decomposed.related("button_links").is_empty());

        let main = &decomposed.main.row;
        let json_col = |c: &str| main[MAIN.column_index(c).unwrap()].clone();
        assert_eq!(json_col("gql_variables"), SqlValue::Json(None));
        assert_eq!(json_col("aggs"), SqlValue::Json(Some(json!({"count": true}))));
        assert_eq!(json_col("mode_table"), SqlValue::Bool(Some(true)));
        assert_eq!(json_col("customer_id"), SqlValue::from("cust-1"));
    }
}
