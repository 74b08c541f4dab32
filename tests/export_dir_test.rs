//! `migrate_all` over a directory of collection exports

use mongomigra::db::MemoryStore;
use mongomigra::migrators::{documents, people, usersgroups, users};
use mongomigra::{
    Collection, DescriptorRegistry, JsonLinesProvider, MigrationError, MigratorRegistry,
    Orchestrator, PipelineOptions, ProgressEvent, RecordingProgress,
};
use std::fs;
use std::path::Path;

fn write_export(dir: &Path, collection: Collection, lines: &[&str]) {
    let path = dir.join(format!("{}.json", collection.as_str()));
    fs::write(path, lines.join("\n")).unwrap();
}

fn write_fixture(dir: &Path) {
    write_export(
        dir,
        Collection::Users,
        &[
            r#"{"_id": {"$oid": "user-0001"}, "firstname": "Ana", "customerId": "cust-01", "area": {"id": "area-1", "name": "Legal"}}"#,
            "",
            r#"{"_id": {"$oid": "user-0002"}, "firstname": "Luis", "created_at": "2023-03-01T12:00:00Z"}"#,
        ],
    );
    write_export(
        dir,
        Collection::UsersGroups,
        &[r#"{"_id": "group-0001", "name": "Mesa", "users": ["user-0001", "user-0002", "user-0404"]}"#],
    );
    write_export(
        dir,
        Collection::ListBuilder,
        &[r#"{"_id": "list-0001", "createdBy": {"user": {"id": "user-0001"}}, "fields": [{"key": "n"}]}"#],
    );
    write_export(
        dir,
        Collection::FormBuilder,
        &[r#"{"_id": "form-0001", "formElements": [{"id": "e1", "componentName": "LmTextInput"}]}"#],
    );
    // The array form of an export is accepted as well.
    fs::write(
        dir.join(format!("{}.json", Collection::ProcessTypes.as_str())),
        r#"[{"_id": "ptype-0001", "typeName": "Permit", "listbuilderId": "list-0001"}]"#,
    )
    .unwrap();
    write_export(
        dir,
        Collection::Processes,
        &[r#"{"_id": "proc-0001", "processTypeId": "ptype-0001", "processDate": 1705314600000, "createdBy": {"user": {"id": "user-0777", "firstname": "Gone"}}}"#],
    );
    write_export(
        dir,
        Collection::People,
        &[
            r#"{"_id": "person-0001", "peopleTypeId": "pt-h", "peopleTypeName": "Humana", "personIdType": {"id": "dni", "name": "DNI"}, "personName": "Ana Paz"}"#,
            r#"{"_id": "person-0002", "personName": "No type"}"#,
        ],
    );
    write_export(
        dir,
        Collection::Documents,
        &[r#"{"_id": {"$oid": "doc-0001"}, "documentNumber": "ME-1", "createdBy": {"user": {"id": "user-0888"}}, "participants": [{"id": "user-0001", "name": "Ana", "action": "sign"}], "recipients": {"areas": [{"id": "area-1", "name": "Legal"}]}}"#],
    );
}

#[tokio::test]
async fn test_migrate_all_from_export_dir() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path());

    let descriptors = DescriptorRegistry::standard().unwrap();
    let migrators = MigratorRegistry::standard();
    let mut store = MemoryStore::with_tables(migrators.all_tables());
    let orchestrator = Orchestrator::new(&descriptors, &migrators, PipelineOptions::default());
    let sources = JsonLinesProvider::new(dir.path());
    let mut observer = RecordingProgress::new();

    let summaries = orchestrator
        .migrate_all(&sources, &mut store, &mut observer)
        .await
        .unwrap();

    let order: Vec<Collection> = summaries.iter().map(|s| s.collection).collect();
    assert_eq!(order, descriptors.migration_order().to_vec());

    // user-0404 never existed, so the group keeps two members.
    assert_eq!(store.count(usersgroups::MEMBERS.table), 2);
    // user-0777 came from a process snapshot, user-0888 from a document.
    assert_eq!(store.count(users::MAIN_TABLE), 4);

    let people = summaries
        .iter()
        .find(|s| s.collection == Collection::People)
        .unwrap();
    assert_eq!(people.documents_migrated, 1);
    assert_eq!(people.skipped.len(), 1);
    assert_eq!(store.count(people::MAIN_TABLE), 1);
    assert_eq!(store.count(people::PEOPLE_TYPES_TABLE), 1);

    let documents_summary = summaries.last().unwrap();
    assert_eq!(documents_summary.collection, Collection::Documents);
    assert_eq!(documents_summary.documents_migrated, 1);
    assert_eq!(store.count(documents::MAIN_TABLE), 1);
    assert_eq!(store.count(documents::PARTICIPANTS.table), 1);
    assert_eq!(store.count(documents::RECIPIENTS.table), 1);

    assert!(store.orphaned_references().is_empty());
    assert!(observer.failures().is_empty());
    assert!(observer
        .events
        .iter()
        .any(|e| matches!(e, ProgressEvent::Skipped { collection: Collection::People, .. })));
}

#[tokio::test]
async fn test_missing_export_stops_the_walk() {
    let dir = tempfile::tempdir().unwrap();
    write_export(
        dir.path(),
        Collection::Users,
        &[r#"{"_id": "user-0001", "firstname": "Ana"}"#],
    );

    let descriptors = DescriptorRegistry::standard().unwrap();
    let migrators = MigratorRegistry::standard();
    let mut store = MemoryStore::with_tables(migrators.all_tables());
    let orchestrator = Orchestrator::new(&descriptors, &migrators, PipelineOptions::default());
    let sources = JsonLinesProvider::new(dir.path());
    let mut observer = RecordingProgress::new();

    let err = orchestrator
        .migrate_all(&sources, &mut store, &mut observer)
        .await
        .unwrap_err();
    assert!(matches!(err.root_cause(), MigrationError::Source(_) | MigrationError::Io(_)));
    assert_eq!(store.count(users::MAIN_TABLE), 1);
}

#[tokio::test]
async fn test_malformed_line_aborts_the_collection() {
    let dir = tempfile::tempdir().unwrap();
    write_export(
        dir.path(),
        Collection::Users,
        &[r#"{"_id": "user-0001"}"#, r#"{"_id": "user-0002", "#],
    );

    let descriptors = DescriptorRegistry::standard().unwrap();
    let migrators = MigratorRegistry::standard();
    let mut store = MemoryStore::with_tables(migrators.all_tables());
    let orchestrator = Orchestrator::new(&descriptors, &migrators, PipelineOptions::default());
    let sources = JsonLinesProvider::new(dir.path());
    let mut observer = RecordingProgress::new();

    let err = orchestrator
        .migrate_all(&sources, &mut store, &mut observer)
        .await
        .unwrap_err();
    match err.root_cause() {
        MigrationError::Source(message) => assert!(message.contains("line 2")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(observer.failures().len(), 1);
    assert_eq!(store.count(users::MAIN_TABLE), 0);
}
