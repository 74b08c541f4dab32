//! `lml_documents_mesa4core` → `lml_documents`
//!
//! Digital documents (memos, notes, certificates). The main row keeps type,
//! status and signature progress; every participant list, the recipient and
//! viewer groups, the visual workflow steps and the `lumbreNext*` pointers
//! become child tables. Form answers stored under `<name>_<n>` keys are kept
//! together as JSON.

use super::processes::full_name;
use super::{fields, shared, users, Decomposed};
use crate::db::{ConflictPolicy, FlushStage, ForeignKey, TableRef, TableSpec};
use crate::descriptor::Collection;
use crate::document::{
    array_at, bool_at, bool_or, f64_at, i64_at, path, reference_id, scalar_text, str_at,
};
use crate::error::DecomposeError;
use crate::etl::{EntityCache, SharedRefs};
use crate::migrators::CollectionMigrator;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

const SCHEMA: &str = "lml_documents";

pub const MAIN_TABLE: TableRef = TableRef::new(SCHEMA, "main");

const PARENT: &[ForeignKey] = &[ForeignKey::new("document_id", MAIN_TABLE, "document_id")];

/// Top-level keys that look like form answers but are bookkeeping.
const RESERVED_KEYS: [&str; 5] = ["_id", "__v", "_v", "_master", "_masterType"];

/// Keyed children drop repeats; unkeyed ones are plain appends.
const fn child(name: &'static str, columns: &'static [&'static str], key: &'static [&'static str]) -> TableSpec {
    TableSpec {
        table: TableRef::new(SCHEMA, name),
        columns,
        key,
        policy: if key.is_empty() {
            ConflictPolicy::Append
        } else {
            ConflictPolicy::PreserveFirst
        },
        stage: FlushStage::Child,
        parent_column: Some("document_id"),
        foreign_keys: PARENT,
    }
}

pub static MAIN: TableSpec = TableSpec {
    table: MAIN_TABLE,
    columns: DocumentRow::COLUMNS,
    key: &["document_id"],
    policy: ConflictPolicy::PreserveFirst,
    stage: FlushStage::Main,
    parent_column: None,
    foreign_keys: &[
        ForeignKey::new("customer_id", shared::CUSTOMERS_TABLE, "id"),
        ForeignKey::new("created_by_user_id", users::MAIN_TABLE, "id"),
        ForeignKey::new("updated_by_user_id", users::MAIN_TABLE, "id"),
    ],
};

const USER_KEY: &[&str] = &["document_id", "user_id"];
const ENTITY_KEY: &[&str] = &["document_id", "entity_type", "entity_id"];

pub static PARTICIPANTS: TableSpec = child(
    "participants",
    ParticipantRow::COLUMNS,
    &["document_id", "user_id", "action"],
);
pub static SIGNERS: TableSpec = child("signers", SignerRow::COLUMNS, USER_KEY);
pub static REVIEWERS: TableSpec = child("reviewers", ReviewerRow::COLUMNS, USER_KEY);
pub static SHARE_WITH: TableSpec = child("share_with", ShareWithRow::COLUMNS, USER_KEY);
pub static MOVEMENTS: TableSpec = child("movements", DocumentMovementRow::COLUMNS, &[]);
pub static RECIPIENTS: TableSpec = child("recipients", RecipientRow::COLUMNS, ENTITY_KEY);
pub static RECIPIENT_EMAILS: TableSpec = child(
    "recipient_emails",
    RecipientEmailRow::COLUMNS,
    &["document_id", "email"],
);
pub static VIEWERS: TableSpec = child("viewers", ViewerRow::COLUMNS, ENTITY_KEY);
pub static STEPS: TableSpec = child("steps", StepRow::COLUMNS, &[]);
pub static INSTANCE_PRIVILEGES: TableSpec =
    child("instance_privileges", InstancePrivilegeRow::COLUMNS, ENTITY_KEY);
pub static ACCESS: TableSpec = child("access", AccessRow::COLUMNS, ENTITY_KEY);
pub static NEXT_WORKFLOW: TableSpec = child(
    "next_workflow",
    NextWorkflowRow::COLUMNS,
    &["document_id", "workflow_type"],
);

static TABLES: &[&TableSpec] = &[
    &MAIN,
    &PARTICIPANTS,
    &SIGNERS,
    &REVIEWERS,
    &SHARE_WITH,
    &MOVEMENTS,
    &RECIPIENTS,
    &RECIPIENT_EMAILS,
    &VIEWERS,
    &STEPS,
    &INSTANCE_PRIVILEGES,
    &ACCESS,
    &NEXT_WORKFLOW,
];

crate::table_record! {
    pub struct DocumentRow in MAIN {
        document_id: String,
        document_number: Option<String>,
        document_name: Option<String>,
        document_content: Option<String>,
        document_type_id: Option<String>,
        document_type_name: Option<String>,
        document_type_alias: Option<String>,
        document_type_numerator: Option<String>,
        document_type_signature: Option<String>,
        document_type_visibility: Option<String>,
        document_type_comunicable: Option<bool>,
        type_prefix_id: Option<String>,
        type_prefix_name: Option<String>,
        status_id: Option<String>,
        status_name: Option<String>,
        lumbre_total_signers: i64,
        lumbre_total_participants: i64,
        lumbre_total_reviewers: Option<i64>,
        lumbre_progress: Option<f64>,
        lumbre_completed_signatures: i64,
        lumbre_completed_participants: i64,
        lumbre_completed_reviews: i64,
        deleted: bool,
        has_external_signers: bool,
        pdf_num_pages: Option<i64>,
        pdf_size: Option<i64>,
        lumbre_version: Option<String>,
        everyone_can_access: bool,
        signer_reviewer_id: Option<String>,
        signer_reviewer_name: Option<String>,
        signer_reviewer_done: Option<bool>,
        substitute_id: Option<String>,
        substitute_name: Option<String>,
        signer_position_map: Option<Value>,
        dynamic_fields: Option<Value>,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
        document_date: Option<DateTime<Utc>>,
        last_movement_date: Option<DateTime<Utc>>,
        customer_id: Option<String>,
        created_by_user_id: Option<String>,
        updated_by_user_id: Option<String>,
        __v: Option<i64>,
    }
}

crate::table_record! {
    pub struct ParticipantRow in PARTICIPANTS {
        document_id: String,
        user_id: String,
        user_name: Option<String>,
        action: Option<String>,
    }
}

crate::table_record! {
    pub struct SignerRow in SIGNERS {
        document_id: String,
        user_id: String,
        user_name: Option<String>,
        action: Option<String>,
    }
}

crate::table_record! {
    pub struct ReviewerRow in REVIEWERS {
        document_id: String,
        user_id: String,
        user_name: Option<String>,
        action: Option<String>,
    }
}

crate::table_record! {
    pub struct ShareWithRow in SHARE_WITH {
        document_id: String,
        user_id: String,
        user_name: Option<String>,
    }
}

crate::table_record! {
    pub struct DocumentMovementRow in MOVEMENTS {
        document_id: String,
        created_at: Option<DateTime<Utc>>,
        created_by_user_id: Option<String>,
        created_by_user_name: Option<String>,
        movement_data: Option<Value>,
        documentation: Option<Value>,
    }
}

crate::table_record! {
    /// A user, area, subarea or group the document was sent to.
    pub struct RecipientRow in RECIPIENTS {
        document_id: String,
        entity_type: String,
        entity_id: String,
        entity_name: Option<String>,
    }
}

crate::table_record! {
    pub struct RecipientEmailRow in RECIPIENT_EMAILS {
        document_id: String,
        email_id: Option<String>,
        email: String,
    }
}

crate::table_record! {
    pub struct ViewerRow in VIEWERS {
        document_id: String,
        entity_type: String,
        entity_id: String,
        entity_name: Option<String>,
    }
}

crate::table_record! {
    pub struct StepRow in STEPS {
        document_id: String,
        position: i64,
        step_order: i64,
        title: Option<String>,
        description: Option<String>,
        avatar: Option<String>,
    }
}

crate::table_record! {
    pub struct InstancePrivilegeRow in INSTANCE_PRIVILEGES {
        document_id: String,
        entity_type: String,
        entity_id: String,
        entity_name: Option<String>,
    }
}

crate::table_record! {
    /// One entry of `calculatedProps.whoCanAccess`.
    pub struct AccessRow in ACCESS {
        document_id: String,
        entity_type: String,
        entity_id: String,
    }
}

crate::table_record! {
    /// Who acts next, one row per `lumbreNextSigner`/`Participant`/`Reviewer`.
    pub struct NextWorkflowRow in NEXT_WORKFLOW {
        document_id: String,
        workflow_type: String,
        user_id: String,
        firstname: Option<String>,
        lastname: Option<String>,
        email: Option<String>,
        user_type: Option<String>,
        user_initials: Option<String>,
        profile_picture: Option<String>,
        role_id: Option<String>,
        role_name: Option<String>,
        area_id: Option<String>,
        area_name: Option<String>,
        subarea_id: Option<String>,
        subarea_name: Option<String>,
        position_id: Option<String>,
        position_name: Option<String>,
        action: Option<String>,
        signature: Option<String>,
        in_character_of: Option<String>,
        reviewer_id: Option<String>,
        reviewer_name: Option<String>,
    }
}

/// Nested objects and arrays only; scalars have no JSON column to go to.
fn structured(value: Option<&Value>) -> Option<Value> {
    value.filter(|v| v.is_object() || v.is_array()).cloned()
}

fn non_empty_id(value: Option<&Value>) -> Option<String> {
    value.and_then(scalar_text).filter(|s| !s.is_empty())
}

/// `<name>_<digits>` or `_<digits>`.
fn is_form_answer_key(key: &str) -> bool {
    if RESERVED_KEYS.contains(&key) {
        return false;
    }
    match key.rsplit_once('_') {
        Some((_, digits)) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

fn dynamic_fields(doc: &Value) -> Option<Value> {
    let answers: Map<String, Value> = doc
        .as_object()
        .into_iter()
        .flatten()
        .filter(|(key, _)| is_form_answer_key(key))
        .filter(|(_, value)| match value {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            _ => true,
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    (!answers.is_empty()).then_some(Value::Object(answers))
}

/// `(user_id, name, action)` for each object of a participant-style array.
fn user_entries(doc: &Value, field: &str) -> Vec<(String, Option<String>, Option<String>)> {
    array_at(doc, field)
        .iter()
        .filter(|entry| entry.is_object())
        .filter_map(|entry| {
            let user_id = non_empty_id(entry.get("id"))?;
            Some((user_id, str_at(entry, "name"), str_at(entry, "action")))
        })
        .collect()
}

/// Flatten `{users: [...], areas: [...], ...}` into `(type, id, name)`,
/// with the group name singularized.
fn entity_entries(
    doc: &Value,
    field: &str,
    groups: &[(&'static str, &str)],
) -> Vec<(&'static str, String, Option<String>)> {
    let Some(container) = path(doc, field).filter(|v| v.is_object()) else {
        return Vec::new();
    };
    groups
        .iter()
        .flat_map(|(entity_type, group)| {
            array_at(container, group)
                .iter()
                .filter(|item| item.is_object())
                .filter_map(move |item| {
                    let id = non_empty_id(item.get("id"))?;
                    Some((*entity_type, id, str_at(item, "name")))
                })
        })
        .collect()
}

fn steps(document_id: &str, doc: &Value) -> Vec<StepRow> {
    let Some(container) = path(doc, "documentSteps").filter(|v| v.is_object()) else {
        return Vec::new();
    };
    let position = i64_at(container, "position").unwrap_or(0);
    array_at(container, "items")
        .iter()
        .enumerate()
        .filter(|(_, item)| item.is_object())
        .map(|(index, item)| StepRow {
            document_id: document_id.to_string(),
            position,
            step_order: fields::order(index),
            title: str_at(item, "title"),
            description: str_at(item, "description"),
            avatar: str_at(item, "avatar"),
        })
        .collect()
}

fn access(document_id: &str, doc: &Value) -> Vec<AccessRow> {
    let Some(who) = path(doc, "calculatedProps.whoCanAccess").filter(|v| v.is_object()) else {
        return Vec::new();
    };
    [("user", "users"), ("area", "areas"), ("subarea", "subareas")]
        .into_iter()
        .flat_map(|(entity_type, group)| {
            array_at(who, group)
                .iter()
                .filter_map(|id| non_empty_id(Some(id)))
                .map(move |entity_id| AccessRow {
                    document_id: document_id.to_string(),
                    entity_type: entity_type.to_string(),
                    entity_id,
                })
        })
        .collect()
}

fn next_workflow(document_id: &str, doc: &Value) -> Vec<NextWorkflowRow> {
    [
        ("signer", "lumbreNextSigner"),
        ("participant", "lumbreNextParticipant"),
        ("reviewer", "lumbreNextReviewer"),
    ]
    .into_iter()
    .filter_map(|(workflow_type, field)| {
        let next = path(doc, field).filter(|v| v.as_object().is_some_and(|o| !o.is_empty()))?;
        let user_id = reference_id(next)?;
        Some(NextWorkflowRow {
            document_id: document_id.to_string(),
            workflow_type: workflow_type.to_string(),
            user_id,
            firstname: str_at(next, "firstname"),
            lastname: str_at(next, "lastname"),
            email: str_at(next, "email"),
            user_type: str_at(next, "userType"),
            user_initials: str_at(next, "userInitials"),
            profile_picture: str_at(next, "profilePicture"),
            role_id: str_at(next, "role.id"),
            role_name: str_at(next, "role.name"),
            area_id: str_at(next, "area.id"),
            area_name: str_at(next, "area.name"),
            subarea_id: str_at(next, "subarea.id"),
            subarea_name: str_at(next, "subarea.name"),
            position_id: str_at(next, "position.id"),
            position_name: str_at(next, "position.name"),
            action: str_at(next, "action"),
            signature: str_at(next, "signature"),
            in_character_of: str_at(next, "inCharacterOf"),
            reviewer_id: str_at(next, "reviewer.id"),
            reviewer_name: str_at(next, "reviewer.name"),
        })
    })
    .collect()
}

pub struct DocumentsMigrator;

#[async_trait]
impl CollectionMigrator for DocumentsMigrator {
    fn collection(&self) -> Collection {
        Collection::Documents
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
        let signer_reviewer = path(doc, "lumbreSignerReviewer").filter(|v| v.is_object());
        let substitute = path(doc, "lumbreSubstitute").filter(|v| v.is_object());

        let main = DocumentRow {
            document_id: id.clone(),
            document_number: str_at(doc, "documentNumber"),
            document_name: str_at(doc, "documentName"),
            document_content: str_at(doc, "documentContent"),
            document_type_id: str_at(doc, "documentTypeId"),
            document_type_name: str_at(doc, "documentTypeName"),
            document_type_alias: str_at(doc, "documentTypeAlias"),
            document_type_numerator: str_at(doc, "documentTypeNumerator"),
            document_type_signature: str_at(doc, "documentTypeSignature"),
            document_type_visibility: str_at(doc, "documentTypeVisibility"),
            document_type_comunicable: bool_at(doc, "documentTypeComunicable"),
            type_prefix_id: str_at(doc, "documentTypePrefix.id"),
            type_prefix_name: str_at(doc, "documentTypePrefix.name"),
            status_id: str_at(doc, "lumbreStatus.id"),
            status_name: str_at(doc, "lumbreStatus.name"),
            lumbre_total_signers: i64_at(doc, "lumbreTotalSigners").unwrap_or(0),
            lumbre_total_participants: i64_at(doc, "lumbreTotalParticipants").unwrap_or(0),
            lumbre_total_reviewers: i64_at(doc, "lumbreTotalReviewers"),
            lumbre_progress: f64_at(doc, "lumbreProgress").or(Some(0.0)),
            lumbre_completed_signatures: i64_at(doc, "lumbreCompletedSignatures").unwrap_or(0),
            lumbre_completed_participants: i64_at(doc, "lumbreCompletedParticipants").unwrap_or(0),
            lumbre_completed_reviews: i64_at(doc, "lumbreCompletedReviews").unwrap_or(0),
            deleted: bool_or(doc, "deleted", false),
            has_external_signers: bool_or(doc, "hasExternalSigners", false),
            pdf_num_pages: i64_at(doc, "pdfNumPages"),
            pdf_size: i64_at(doc, "pdfSize"),
            lumbre_version: str_at(doc, "lumbreVersion").or_else(|| Some("1".to_string())),
            everyone_can_access: bool_or(doc, "calculatedProps.everyoneCanAccess", true),
            signer_reviewer_id: signer_reviewer.and_then(|s| str_at(s, "id")),
            signer_reviewer_name: signer_reviewer.and_then(|s| str_at(s, "name")),
            signer_reviewer_done: signer_reviewer.and_then(|s| bool_at(s, "done")),
            substitute_id: substitute.and_then(|s| str_at(s, "id")),
            substitute_name: substitute.and_then(|s| str_at(s, "name")),
            signer_position_map: structured(path(doc, "signerPositionMap")),
            dynamic_fields: dynamic_fields(doc),
            created_at: fields::timestamp(doc, "createdAt"),
            updated_at: fields::timestamp(doc, "updatedAt"),
            document_date: fields::timestamp(doc, "documentDate"),
            last_movement_date: fields::timestamp(doc, "lastMovementDate"),
            customer_id: refs.customer_id.clone(),
            created_by_user_id: refs.created_by_user_id.clone(),
            updated_by_user_id: refs.updated_by_user_id.clone(),
            __v: i64_at(doc, "__v"),
        };

        let participants = user_entries(doc, "participants")
            .into_iter()
            .map(|(user_id, user_name, action)| ParticipantRow {
                document_id: id.clone(),
                user_id,
                user_name,
                action,
            });
        let signers = user_entries(doc, "signers")
            .into_iter()
            .map(|(user_id, user_name, action)| SignerRow {
                document_id: id.clone(),
                user_id,
                user_name,
                action,
            });
        let reviewers = user_entries(doc, "reviewers")
            .into_iter()
            .map(|(user_id, user_name, action)| ReviewerRow {
                document_id: id.clone(),
                user_id,
                user_name,
                action,
            });
        let share_with = user_entries(doc, "shareWith")
            .into_iter()
            .map(|(user_id, user_name, _)| ShareWithRow {
                document_id: id.clone(),
                user_id,
                user_name,
            });

        let movements = array_at(doc, "movements")
            .iter()
            .filter(|m| m.is_object())
            .map(|m| {
                let author = path(m, "created_by").filter(|v| v.is_object());
                DocumentMovementRow {
                    document_id: id.clone(),
                    created_at: fields::timestamp(m, "created_at"),
                    created_by_user_id: author.and_then(|a| str_at(a, "id")),
                    created_by_user_name: author.and_then(full_name),
                    movement_data: structured(path(m, "movement")),
                    documentation: structured(path(m, "documentation")),
                }
            });

        let recipient_groups = [("user", "users"), ("area", "areas"), ("subarea", "subareas"), ("group", "groups")];
        let recipients = entity_entries(doc, "recipients", &recipient_groups)
            .into_iter()
            .map(|(entity_type, entity_id, entity_name)| RecipientRow {
                document_id: id.clone(),
                entity_type: entity_type.to_string(),
                entity_id,
                entity_name,
            });

        // The address travels in `name`.
        let recipient_emails = array_at(doc, "recipients.emails")
            .iter()
            .filter(|item| item.is_object())
            .filter_map(|item| {
                let email = str_at(item, "name").filter(|s| !s.is_empty())?;
                Some(RecipientEmailRow {
                    document_id: id.clone(),
                    email_id: str_at(item, "id"),
                    email,
                })
            });

        let viewer_groups = [("user", "users"), ("area", "areas"), ("subarea", "subareas")];
        let viewers = entity_entries(doc, "viewers", &viewer_groups)
            .into_iter()
            .map(|(entity_type, entity_id, entity_name)| ViewerRow {
                document_id: id.clone(),
                entity_type: entity_type.to_string(),
                entity_id,
                entity_name,
            });

        let privilege_groups = [("area", "area"), ("subarea", "subarea"), ("role", "role")];
        let privileges = entity_entries(doc, "instancePrivileges", &privilege_groups)
            .into_iter()
            .map(|(entity_type, entity_id, entity_name)| InstancePrivilegeRow {
                document_id: id.clone(),
                entity_type: entity_type.to_string(),
                entity_id,
                entity_name,
            });

        let step_rows = steps(&id, doc);
        let access_rows = access(&id, doc);
        let next = next_workflow(&id, doc);

        Ok(Decomposed::new(main)
            .with(participants)
            .with(signers)
            .with(reviewers)
            .with(share_with)
            .with(movements)
            .with(recipients)
            .with(recipient_emails)
            .with(viewers)
            .with(step_rows)
            .with(privileges)
            .with(access_rows)
            .with(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqlValue;
    use serde_json::json;

    fn memo() -> Value {
        json!({
            "_id": {"$oid": "doc-0001"},
            "documentNumber": "ME-2024-00012",
            "documentTypePrefix": {"id": "pfx-1", "name": "ME"},
            "lumbreStatus": {"id": "st-2", "name": "Firmado"},
            "lumbreTotalSigners": 2,
            "lumbreProgress": 50.5,
            "calculatedProps": {
                "everyoneCanAccess": false,
                "whoCanAccess": {"users": ["user-0001", ""], "areas": ["area-1"]}
            },
            "lumbreSignerReviewer": {"id": "user-0002", "name": "Luis", "done": true},
            "signerPositionMap": {"user-0001": 1},
            "participants": [
                {"id": "user-0001", "name": "Ana", "action": "sign"},
                {"id": "user-0001", "name": "Ana", "action": "sign"},
                {"name": "no id"},
                "loose"
            ],
            "signers": [{"id": "user-0001", "name": "Ana"}],
            "shareWith": [{"id": "user-0003", "name": "Eva"}],
            "movements": [{
                "created_at": {"$date": "2024-01-15T10:30:00.000Z"},
                "created_by": {"id": "user-0001", "firstname": "Ana", "lastname": "Paz"},
                "movement": {"to": "area-1"},
                "documentation": "not structured"
            }],
            "recipients": {
                "users": [{"id": "user-0003", "name": "Eva"}],
                "groups": [{"id": "group-1", "name": "Mesa"}],
                "emails": [{"id": "e1", "name": "eva@example.com"}, {"id": "e2", "name": ""}]
            },
            "viewers": {"subareas": [{"id": "sub-1", "name": "Contratos"}]},
            "documentSteps": {"position": 1, "items": [{"title": "Draft"}, null, {"title": "Sign"}]},
            "instancePrivileges": {"role": [{"id": "role-1", "name": "Admin"}]},
            "lumbreNextSigner": {
                "_id": {"$oid": "user-0002"},
                "firstname": "Luis",
                "role": {"id": "role-1", "name": "Admin"},
                "reviewer": {"id": "user-0004", "name": "Rita"}
            },
            "lumbreNextReviewer": {},
            "texto_libre_0": "respuesta",
            "_3": {"campo": 1},
            "vacio_1": "",
            "_master": "m-1",
            "createdAt": 1705314600000i64
        })
    }

    fn column<'a>(row: &'a [SqlValue], name: &str) -> &'a SqlValue {
        &row[MAIN.column_index(name).unwrap()]
    }

    fn decompose(doc: &Value) -> Decomposed {
        DocumentsMigrator
            .decompose(doc, &SharedRefs::default(), &EntityCache::new())
            .unwrap()
    }

    #[test]
    fn test_document_main_row() {
        let decomposed = decompose(&memo());
        let row = decomposed.main.row.as_slice();
        let column = |name: &str| column(row, name);

        assert_eq!(column("document_id"), &SqlValue::from("doc-0001"));
        assert_eq!(column("type_prefix_name"), &SqlValue::from("ME"));
        assert_eq!(column("status_id"), &SqlValue::from("st-2"));
        assert_eq!(column("lumbre_total_signers"), &SqlValue::Int(Some(2)));
        assert_eq!(column("lumbre_total_participants"), &SqlValue::Int(Some(0)));
        assert_eq!(column("lumbre_total_reviewers"), &SqlValue::Int(None));
        assert_eq!(column("lumbre_progress"), &SqlValue::Float(Some(50.5)));
        assert_eq!(column("everyone_can_access"), &SqlValue::Bool(Some(false)));
        assert_eq!(column("signer_reviewer_done"), &SqlValue::Bool(Some(true)));
        assert_eq!(column("lumbre_version"), &SqlValue::from("1"));
        assert_eq!(
            column("dynamic_fields"),
            &SqlValue::Json(Some(json!({"texto_libre_0": "respuesta", "_3": {"campo": 1}})))
        );
        assert!(matches!(column("created_at"), SqlValue::Timestamp(Some(_))));
    }

    #[test]
    fn test_document_children() {
        let decomposed = decompose(&memo());

        // Duplicates collapse at flush time, not here.
        assert_eq!(decomposed.related("participants").len(), 2);
        assert_eq!(decomposed.related("signers").len(), 1);
        assert!(decomposed.related("reviewers").is_empty());
        assert_eq!(decomposed.related("share_with").len(), 1);

        let movement = &decomposed.related("movements")[0].row;
        assert_eq!(movement[3], SqlValue::from("Ana Paz"));
        assert_eq!(movement[4], SqlValue::Json(Some(json!({"to": "area-1"}))));
        assert_eq!(movement[5], SqlValue::Json(None));

        let recipients = decomposed.related("recipients");
        assert_eq!(recipients.len(), 2);
        assert_eq!(recipients[1].row[1], SqlValue::from("group"));
        assert_eq!(decomposed.related("recipient_emails").len(), 1);
        assert_eq!(decomposed.related("viewers")[0].row[1], SqlValue::from("subarea"));

        let steps = decomposed.related("steps");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].row[1], SqlValue::Int(Some(1)));
        assert_eq!(steps[1].row[2], SqlValue::Int(Some(2)));

        assert_eq!(decomposed.related("instance_privileges")[0].row[1], SqlValue::from("role"));
        assert_eq!(decomposed.related("access").len(), 2);

        let next = decomposed.related("next_workflow");
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].row[1], SqlValue::from("signer"));
        assert_eq!(next[0].row[2], SqlValue::from("user-0002"));
        let reviewer = NEXT_WORKFLOW.column_index("reviewer_name").unwrap();
        assert_eq!(next[0].row[reviewer], SqlValue::from("Rita"));
    }

    #[test]
    fn test_bare_document() {
        let decomposed = decompose(&json!({"_id": "doc-0002", "recipients": "none"}));
        let everyone = MAIN.column_index("everyone_can_access").unwrap();
        assert_eq!(decomposed.main.row[everyone], SqlValue::Bool(Some(true)));
        let dynamic = MAIN.column_index("dynamic_fields").unwrap();
        assert_eq!(decomposed.main.row[dynamic], SqlValue::Json(None));
        assert!(decomposed.related.values().all(Vec::is_empty));
    }

    #[test]
    fn test_form_answer_keys() {
        assert!(is_form_answer_key("domicilio_0"));
        assert!(is_form_answer_key("_12"));
        assert!(!is_form_answer_key("__v"));
        assert!(!is_form_answer_key("_master"));
        assert!(!is_form_answer_key("documentName"));
        assert!(!is_form_answer_key("name_"));
    }
}
