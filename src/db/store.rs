//! Relational execution context used by the migration pipeline

use crate::db::table::{Row, TableRef, TableSpec};
use crate::descriptor::Collection;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Ledger entry written when a collection finishes migrating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub collection: Collection,
    pub run_id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub documents_read: i64,
    pub rows_written: i64,
}

/// Writes are buffered in one open transaction until `commit`.
#[async_trait]
pub trait RelationalStore: Send {
    /// Bulk insert under the table's conflict policy. Returns rows affected.
    async fn insert_rows(&mut self, spec: &'static TableSpec, rows: Vec<Row>) -> Result<u64>;

    /// Single-row statement, used for immediate shared-entity upserts.
    async fn execute_one(&mut self, spec: &'static TableSpec, row: Row) -> Result<u64> {
        self.insert_rows(spec, vec![row]).await
    }

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Empty `table` and every table that references it.
    async fn truncate_cascade(&mut self, table: TableRef) -> Result<()>;

    /// Non-null values of one column, as text.
    async fn fetch_ids(&mut self, table: TableRef, column: &'static str) -> Result<HashSet<String>>;

    async fn completed_collections(&mut self) -> Result<HashSet<Collection>>;

    async fn completion_records(&mut self) -> Result<Vec<CompletionRecord>>;

    async fn mark_completed(&mut self, record: &CompletionRecord) -> Result<()>;

    async fn clear_completion(&mut self, collections: &[Collection]) -> Result<()>;
}
