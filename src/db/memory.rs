//! In-memory relational store
//!
//! Mirrors the parts of PostgreSQL the pipeline depends on: one open
//! transaction, conflict policies, foreign-key checks and `TRUNCATE ...
//! CASCADE`. Backs the test suite and `--dry-run`.
//!
//! Writes go straight to the live tables and record an undo entry; `commit`
//! drops the journal and `rollback` replays it backwards. Conflict keys are
//! hash-indexed, and columns probed by foreign keys get a value index on
//! first use, so a run stays linear in the number of rows.

use crate::db::store::{CompletionRecord, RelationalStore};
use crate::db::table::{dedup_rows, ConflictPolicy, Row, SqlValue, TableRef, TableSpec};
use crate::descriptor::Collection;
use crate::error::{MigrationError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Stored row: column name to value. Columns a writer did not set are NULL.
pub type StoredRow = BTreeMap<&'static str, SqlValue>;

#[derive(Debug, Default)]
struct Table {
    rows: Vec<StoredRow>,
    /// Conflict key text to row position.
    keys: HashMap<String, usize>,
    /// Per-column value counts, built on demand.
    indexes: HashMap<&'static str, HashMap<String, usize>>,
}

impl Table {
    fn position(&self, key: &str) -> Option<usize> {
        self.keys.get(key).copied()
    }

    fn contains(&mut self, column: &'static str, value: &str) -> bool {
        let rows = &self.rows;
        self.indexes
            .entry(column)
            .or_insert_with(|| {
                let mut index = HashMap::new();
                for row in rows {
                    if let Some(v) = row.get(column).and_then(SqlValue::key_text) {
                        *index.entry(v).or_insert(0) += 1;
                    }
                }
                index
            })
            .contains_key(value)
    }

    fn push(&mut self, key: Option<String>, row: StoredRow) {
        if let Some(key) = key {
            self.keys.insert(key, self.rows.len());
        }
        for (column, index) in self.indexes.iter_mut() {
            if let Some(v) = row.get(column).and_then(SqlValue::key_text) {
                *index.entry(v).or_insert(0) += 1;
            }
        }
        self.rows.push(row);
    }

    /// Overwrite one non-key column, returning the previous value.
    fn set(&mut self, position: usize, column: &'static str, value: SqlValue) -> Option<SqlValue> {
        let row = &mut self.rows[position];
        if let Some(index) = self.indexes.get_mut(column) {
            if let Some(old) = row.get(column).and_then(SqlValue::key_text) {
                if let Some(count) = index.get_mut(&old) {
                    *count -= 1;
                    if *count == 0 {
                        index.remove(&old);
                    }
                }
            }
            if let Some(new) = value.key_text() {
                *index.entry(new).or_insert(0) += 1;
            }
        }
        row.insert(column, value)
    }

    /// Remove matching rows, returning them with their former positions.
    fn remove_where<F>(&mut self, spec: &TableSpec, mut remove: F) -> Vec<(usize, StoredRow)>
    where
        F: FnMut(&StoredRow) -> bool,
    {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.rows.len());
        for (position, row) in std::mem::take(&mut self.rows).into_iter().enumerate() {
            if remove(&row) {
                removed.push((position, row));
            } else {
                kept.push(row);
            }
        }
        self.rows = kept;
        self.reindex(spec);
        removed
    }

    fn reindex(&mut self, spec: &TableSpec) {
        self.keys = self
            .rows
            .iter()
            .enumerate()
            .filter_map(|(position, row)| key_of(spec, row).map(|k| (k, position)))
            .collect();
        self.indexes.clear();
    }
}

/// Inverse of one write since the last commit.
#[derive(Debug)]
enum Undo {
    Insert(TableRef),
    Update {
        table: TableRef,
        position: usize,
        column: &'static str,
        previous: Option<SqlValue>,
    },
    Remove {
        table: TableRef,
        removed: Vec<(usize, StoredRow)>,
    },
    Truncate {
        table: TableRef,
        previous: Table,
    },
    Ledger {
        collection: Collection,
        previous: Option<CompletionRecord>,
    },
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: BTreeMap<TableRef, Table>,
    ledger: BTreeMap<Collection, CompletionRecord>,
    journal: Vec<Undo>,
    specs: Vec<&'static TableSpec>,
    commits: u64,
    failing: Option<TableRef>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register table specs up front so cascades reach tables not yet written.
    pub fn with_tables<I>(specs: I) -> Self
    where
        I: IntoIterator<Item = &'static TableSpec>,
    {
        let mut store = Self::new();
        for spec in specs {
            store.register(spec);
        }
        store
    }

    /// Make every later insert into `table` fail, to exercise fatal flushes.
    pub fn fail_inserts_into(&mut self, table: TableRef) {
        self.failing = Some(table);
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }

    /// Rows of a table, including writes of the open transaction.
    pub fn rows(&self, table: TableRef) -> &[StoredRow] {
        self.tables
            .get(&table)
            .map(|t| t.rows.as_slice())
            .unwrap_or(&[])
    }

    pub fn count(&self, table: TableRef) -> usize {
        self.rows(table).len()
    }

    /// Row whose `column` holds `value`.
    pub fn find(&self, table: TableRef, column: &str, value: &str) -> Option<&StoredRow> {
        self.rows(table)
            .iter()
            .find(|row| row.get(column).and_then(SqlValue::key_text).as_deref() == Some(value))
    }

    /// Every stored value that points at a missing row, as
    /// `table.column -> target: value`.
    pub fn orphaned_references(&self) -> Vec<String> {
        let mut orphans = Vec::new();
        for spec in &self.specs {
            for fk in spec.foreign_keys {
                let targets: HashSet<String> = self
                    .rows(fk.references)
                    .iter()
                    .filter_map(|row| row.get(fk.ref_column).and_then(SqlValue::key_text))
                    .collect();
                for row in self.rows(spec.table) {
                    let Some(value) = row.get(fk.column).and_then(SqlValue::key_text) else {
                        continue;
                    };
                    if !targets.contains(&value) {
                        orphans.push(format!(
                            "{}.{} -> {}: {}",
                            spec.table, fk.column, fk.references, value
                        ));
                    }
                }
            }
        }
        orphans.sort();
        orphans.dedup();
        orphans
    }

    fn register(&mut self, spec: &'static TableSpec) {
        if !self.specs.iter().any(|s| std::ptr::eq(*s, spec)) {
            self.specs.push(spec);
        }
    }

    fn spec_for(&self, table: TableRef) -> Option<&'static TableSpec> {
        self.specs.iter().copied().find(|s| s.table == table)
    }

    fn contains(&mut self, table: TableRef, column: &'static str, value: &str) -> bool {
        self.tables
            .get_mut(&table)
            .is_some_and(|t| t.contains(column, value))
    }

    fn cascade_targets(&self, root: TableRef) -> Vec<TableRef> {
        let mut targets = vec![root];
        let mut index = 0;
        while index < targets.len() {
            let current = targets[index];
            for spec in &self.specs {
                let references = spec.foreign_keys.iter().any(|fk| fk.references == current);
                if references && !targets.contains(&spec.table) {
                    targets.push(spec.table);
                }
            }
            index += 1;
        }
        targets
    }
}

fn key_of(spec: &TableSpec, row: &StoredRow) -> Option<String> {
    if spec.key.is_empty() {
        return None;
    }
    let parts = spec
        .key
        .iter()
        .map(|column| row.get(column).and_then(SqlValue::key_text))
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("\u{1f}"))
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn insert_rows(&mut self, spec: &'static TableSpec, rows: Vec<Row>) -> Result<u64> {
        self.register(spec);
        if self.failing == Some(spec.table) {
            return Err(MigrationError::BatchFlush {
                table: spec.table.to_string(),
                message: "injected failure".to_string(),
            });
        }

        let rows = dedup_rows(spec, rows);
        if rows.is_empty() {
            return Ok(0);
        }

        for row in &rows {
            if row.len() != spec.columns.len() {
                return Err(MigrationError::BatchFlush {
                    table: spec.table.to_string(),
                    message: format!("expected {} values, got {}", spec.columns.len(), row.len()),
                });
            }
            for fk in spec.foreign_keys {
                let Some(value) = spec
                    .column_index(fk.column)
                    .and_then(|i| row[i].key_text())
                else {
                    continue;
                };
                if !self.contains(fk.references, fk.ref_column, &value) {
                    return Err(MigrationError::BatchFlush {
                        table: spec.table.to_string(),
                        message: format!(
                            "foreign key violation: {} = {} not present in {}",
                            fk.column, value, fk.references
                        ),
                    });
                }
            }
        }

        let table = self.tables.entry(spec.table).or_default();

        if spec.policy == ConflictPolicy::ReplaceChildren {
            if let Some(parent_column) = spec.parent_column {
                let parents: HashSet<String> = rows.iter().filter_map(|r| spec.parent_text(r)).collect();
                if parents.iter().any(|p| table.contains(parent_column, p)) {
                    let removed = table.remove_where(spec, |stored| {
                        stored
                            .get(parent_column)
                            .and_then(SqlValue::key_text)
                            .is_some_and(|p| parents.contains(&p))
                    });
                    self.journal.push(Undo::Remove {
                        table: spec.table,
                        removed,
                    });
                }
            }
        }

        let mut affected = 0u64;
        for row in rows {
            let key = spec.key_text(&row);
            let existing = key.as_deref().and_then(|k| table.position(k));

            match (existing, spec.policy) {
                (Some(position), ConflictPolicy::UpdateCatalog) => {
                    for (column, value) in spec.columns.iter().copied().zip(row) {
                        if spec.key.contains(&column) {
                            continue;
                        }
                        let previous = table.set(position, column, value);
                        self.journal.push(Undo::Update {
                            table: spec.table,
                            position,
                            column,
                            previous,
                        });
                    }
                    affected += 1;
                }
                (Some(_), ConflictPolicy::Append) => {
                    return Err(MigrationError::BatchFlush {
                        table: spec.table.to_string(),
                        message: format!("duplicate key {:?}", key),
                    });
                }
                (Some(_), _) => {}
                (None, _) => {
                    table.push(key, spec.columns.iter().copied().zip(row).collect());
                    self.journal.push(Undo::Insert(spec.table));
                    affected += 1;
                }
            }
        }
        Ok(affected)
    }

    async fn commit(&mut self) -> Result<()> {
        self.journal.clear();
        self.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let mut touched = HashSet::new();
        while let Some(undo) = self.journal.pop() {
            match undo {
                Undo::Insert(table) => {
                    if let Some(t) = self.tables.get_mut(&table) {
                        t.rows.pop();
                    }
                    touched.insert(table);
                }
                Undo::Update {
                    table,
                    position,
                    column,
                    previous,
                } => {
                    if let Some(row) = self.tables.get_mut(&table).and_then(|t| t.rows.get_mut(position)) {
                        match previous {
                            Some(value) => row.insert(column, value),
                            None => row.remove(column),
                        };
                    }
                    touched.insert(table);
                }
                Undo::Remove { table, removed } => {
                    let t = self.tables.entry(table).or_default();
                    for (position, row) in removed {
                        t.rows.insert(position, row);
                    }
                    touched.insert(table);
                }
                Undo::Truncate { table, previous } => {
                    self.tables.insert(table, previous);
                    touched.insert(table);
                }
                Undo::Ledger {
                    collection,
                    previous,
                } => {
                    match previous {
                        Some(record) => self.ledger.insert(collection, record),
                        None => self.ledger.remove(&collection),
                    };
                }
            }
        }
        for table in touched {
            if let (Some(spec), Some(t)) = (self.spec_for(table), self.tables.get_mut(&table)) {
                t.reindex(spec);
            }
        }
        Ok(())
    }

    async fn truncate_cascade(&mut self, table: TableRef) -> Result<()> {
        for target in self.cascade_targets(table) {
            if let Some(previous) = self.tables.remove(&target) {
                self.journal.push(Undo::Truncate {
                    table: target,
                    previous,
                });
            }
        }
        Ok(())
    }

    async fn fetch_ids(&mut self, table: TableRef, column: &'static str) -> Result<HashSet<String>> {
        Ok(self
            .rows(table)
            .iter()
            .filter_map(|row| row.get(column).and_then(SqlValue::key_text))
            .collect())
    }

    async fn completed_collections(&mut self) -> Result<HashSet<Collection>> {
        Ok(self.ledger.keys().copied().collect())
    }

    async fn completion_records(&mut self) -> Result<Vec<CompletionRecord>> {
        Ok(self.ledger.values().cloned().collect())
    }

    async fn mark_completed(&mut self, record: &CompletionRecord) -> Result<()> {
        let previous = self.ledger.insert(record.collection, record.clone());
        self.journal.push(Undo::Ledger {
            collection: record.collection,
            previous,
        });
        Ok(())
    }

    async fn clear_completion(&mut self, collections: &[Collection]) -> Result<()> {
        for collection in collections {
            if let Some(previous) = self.ledger.remove(collection) {
                self.journal.push(Undo::Ledger {
                    collection: *collection,
                    previous: Some(previous),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::table::{FlushStage, ForeignKey};
    use chrono::Utc;
    use uuid::Uuid;

    const PARENT: TableRef = TableRef::new("s", "parent");
    const CHILD: TableRef = TableRef::new("s", "child");
    const LABELS: TableRef = TableRef::new("s", "labels");

    static PARENT_SPEC: TableSpec = TableSpec {
        table: PARENT,
        columns: &["id", "name"],
        key: &["id"],
        policy: ConflictPolicy::PreserveFirst,
        stage: FlushStage::Main,
        parent_column: None,
        foreign_keys: &[],
    };

    static CHILD_SPEC: TableSpec = TableSpec {
        table: CHILD,
        columns: &["parent_id", "value"],
        key: &["parent_id", "value"],
        policy: ConflictPolicy::ReplaceChildren,
        stage: FlushStage::Child,
        parent_column: Some("parent_id"),
        foreign_keys: &[ForeignKey::new("parent_id", PARENT, "id")],
    };

    static LABELS_SPEC: TableSpec = TableSpec {
        table: LABELS,
        columns: &["id", "name"],
        key: &["id"],
        policy: ConflictPolicy::UpdateCatalog,
        stage: FlushStage::Catalog,
        parent_column: None,
        foreign_keys: &[],
    };

    fn pair(a: &str, b: &str) -> Row {
        vec![SqlValue::from(a), SqlValue::from(b)]
    }

    #[tokio::test]
    async fn test_commit_and_rollback() {
        let mut store = MemoryStore::new();
        store.insert_rows(&PARENT_SPEC, vec![pair("p1", "a")]).await.unwrap();
        store.commit().await.unwrap();
        assert_eq!(store.count(PARENT), 1);

        store.insert_rows(&PARENT_SPEC, vec![pair("p2", "b")]).await.unwrap();
        assert_eq!(store.count(PARENT), 2);
        store.rollback().await.unwrap();
        assert_eq!(store.count(PARENT), 1);

        // The key index forgot p2 along with the row.
        let affected = store.insert_rows(&PARENT_SPEC, vec![pair("p2", "c")]).await.unwrap();
        assert_eq!(affected, 1);
        assert_eq!(store.commits(), 1);
    }

    #[tokio::test]
    async fn test_preserve_first_keeps_original() {
        let mut store = MemoryStore::new();
        store.insert_rows(&PARENT_SPEC, vec![pair("p1", "first")]).await.unwrap();
        let affected = store.insert_rows(&PARENT_SPEC, vec![pair("p1", "second")]).await.unwrap();
        store.commit().await.unwrap();
        assert_eq!(affected, 0);
        let row = store.find(PARENT, "id", "p1").unwrap();
        assert_eq!(row.get("name"), Some(&SqlValue::from("first")));
    }

    #[tokio::test]
    async fn test_catalog_update_is_undone_by_rollback() {
        let mut store = MemoryStore::new();
        store.insert_rows(&LABELS_SPEC, vec![pair("l1", "old")]).await.unwrap();
        store.commit().await.unwrap();

        store.insert_rows(&LABELS_SPEC, vec![pair("l1", "new")]).await.unwrap();
        assert_eq!(store.find(LABELS, "id", "l1").unwrap().get("name"), Some(&SqlValue::from("new")));
        store.rollback().await.unwrap();
        assert_eq!(store.find(LABELS, "id", "l1").unwrap().get("name"), Some(&SqlValue::from("old")));
    }

    #[tokio::test]
    async fn test_foreign_key_violation_is_fatal() {
        let mut store = MemoryStore::new();
        let err = store.insert_rows(&CHILD_SPEC, vec![pair("ghost", "x")]).await.unwrap_err();
        assert!(matches!(err, MigrationError::BatchFlush { .. }));
    }

    #[tokio::test]
    async fn test_foreign_key_sees_rows_written_after_index_was_built() {
        let mut store = MemoryStore::new();
        store.insert_rows(&PARENT_SPEC, vec![pair("p1", "a")]).await.unwrap();
        store.insert_rows(&CHILD_SPEC, vec![pair("p1", "x")]).await.unwrap();
        store.insert_rows(&PARENT_SPEC, vec![pair("p2", "b")]).await.unwrap();
        store.insert_rows(&CHILD_SPEC, vec![pair("p2", "y")]).await.unwrap();
        store.commit().await.unwrap();
        assert_eq!(store.count(CHILD), 2);
    }

    #[tokio::test]
    async fn test_replace_children_mirrors_latest_batch() {
        let mut store = MemoryStore::new();
        store.insert_rows(&PARENT_SPEC, vec![pair("p1", "a")]).await.unwrap();
        store
            .insert_rows(&CHILD_SPEC, vec![pair("p1", "x"), pair("p1", "y")])
            .await
            .unwrap();
        store.insert_rows(&CHILD_SPEC, vec![pair("p1", "z")]).await.unwrap();
        store.commit().await.unwrap();
        assert_eq!(store.count(CHILD), 1);
        assert!(store.find(CHILD, "value", "z").is_some());

        store.insert_rows(&CHILD_SPEC, vec![pair("p1", "w")]).await.unwrap();
        store.rollback().await.unwrap();
        assert_eq!(store.count(CHILD), 1);
        assert!(store.find(CHILD, "value", "z").is_some());
    }

    #[tokio::test]
    async fn test_truncate_cascades_to_referencing_tables() {
        let mut store = MemoryStore::with_tables([&PARENT_SPEC, &CHILD_SPEC]);
        store.insert_rows(&PARENT_SPEC, vec![pair("p1", "a")]).await.unwrap();
        store.insert_rows(&CHILD_SPEC, vec![pair("p1", "x")]).await.unwrap();
        store.commit().await.unwrap();

        store.truncate_cascade(PARENT).await.unwrap();
        store.commit().await.unwrap();
        assert_eq!(store.count(PARENT), 0);
        assert_eq!(store.count(CHILD), 0);
        assert!(store.orphaned_references().is_empty());
    }

    #[tokio::test]
    async fn test_rolled_back_truncate_restores_rows_and_ledger() {
        let mut store = MemoryStore::with_tables([&PARENT_SPEC, &CHILD_SPEC]);
        store.insert_rows(&PARENT_SPEC, vec![pair("p1", "a")]).await.unwrap();
        store
            .mark_completed(&CompletionRecord {
                collection: Collection::Users,
                run_id: Uuid::new_v4(),
                completed_at: Utc::now(),
                documents_read: 1,
                rows_written: 1,
            })
            .await
            .unwrap();
        store.commit().await.unwrap();

        store.truncate_cascade(PARENT).await.unwrap();
        store.clear_completion(&[Collection::Users]).await.unwrap();
        assert!(store.completed_collections().await.unwrap().is_empty());
        store.rollback().await.unwrap();

        assert_eq!(store.count(PARENT), 1);
        assert!(store.completed_collections().await.unwrap().contains(&Collection::Users));
    }

    #[tokio::test]
    async fn test_large_batches_stay_indexed() {
        let mut store = MemoryStore::new();
        let parents: Vec<Row> = (0..20_000).map(|i| pair(&format!("p{i}"), "n")).collect();
        store.insert_rows(&PARENT_SPEC, parents.clone()).await.unwrap();
        let children: Vec<Row> = (0..20_000).map(|i| pair(&format!("p{i}"), "v")).collect();
        store.insert_rows(&CHILD_SPEC, children).await.unwrap();
        assert_eq!(store.insert_rows(&PARENT_SPEC, parents).await.unwrap(), 0);
        store.commit().await.unwrap();
        assert_eq!(store.count(CHILD), 20_000);
    }
}
