//! PostgreSQL relational store

use crate::db::connection::{init_pool, redacted_target};
use crate::db::store::{CompletionRecord, RelationalStore};
use crate::db::table::{dedup_rows, quote_ident, ConflictPolicy, Row, SqlValue, TableRef, TableSpec};
use crate::descriptor::Collection;
use crate::error::{MigrationError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use sqlx::postgres::Postgres;
use sqlx::query_builder::Separated;
use sqlx::{PgPool, QueryBuilder, Transaction};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bind parameters allowed in one statement by the wire protocol.
const MAX_BINDS: usize = 65_535;

const LEDGER_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS public.migration_ledger (
    collection TEXT PRIMARY KEY,
    run_id UUID NOT NULL,
    completed_at TIMESTAMPTZ NOT NULL,
    documents_read BIGINT NOT NULL,
    rows_written BIGINT NOT NULL
)
"#;

pub struct PgStore {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, tx: None }
    }

    /// Connect, verify the server and make sure the completion ledger exists.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        info!("Connecting to {}", redacted_target(database_url));
        let pool = init_pool(database_url, max_connections)
            .await
            .map_err(|e| MigrationError::Database(format!("Failed to connect: {}", e)))?;
        sqlx::query(LEDGER_DDL)
            .execute(&pool)
            .await
            .map_err(|e| MigrationError::Database(format!("Failed to create migration ledger: {}", e)))?;
        info!("✅ Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    async fn transaction(&mut self) -> Result<&mut Transaction<'static, Postgres>> {
        if self.tx.is_none() {
            let tx = self
                .pool
                .begin()
                .await
                .map_err(|e| MigrationError::Database(format!("Failed to begin transaction: {}", e)))?;
            self.tx = Some(tx);
        }
        self.tx
            .as_mut()
            .ok_or_else(|| MigrationError::Database("Transaction unavailable".to_string()))
    }

    async fn delete_children(&mut self, spec: &'static TableSpec, parents: Vec<String>) -> Result<u64> {
        let Some(parent_column) = spec.parent_column else {
            return Ok(0);
        };
        let sql = format!(
            "DELETE FROM {} WHERE {}::text = ANY($1)",
            spec.table.quoted(),
            quote_ident(parent_column)
        );
        let tx = self.transaction().await?;
        let result = sqlx::query(&sql)
            .bind(parents)
            .execute(&mut **tx)
            .await
            .map_err(|e| flush_error(spec, e))?;
        Ok(result.rows_affected())
    }
}

fn flush_error(spec: &TableSpec, err: sqlx::Error) -> MigrationError {
    MigrationError::BatchFlush {
        table: spec.table.to_string(),
        message: err.to_string(),
    }
}

fn conflict_clause(spec: &TableSpec) -> String {
    let target = spec.key.iter().map(|c| quote_ident(c)).join(", ");
    match spec.policy {
        ConflictPolicy::Append => String::new(),
        ConflictPolicy::ReplaceChildren => " ON CONFLICT DO NOTHING".to_string(),
        ConflictPolicy::PreserveFirst if spec.key.is_empty() => " ON CONFLICT DO NOTHING".to_string(),
        ConflictPolicy::PreserveFirst => format!(" ON CONFLICT ({}) DO NOTHING", target),
        ConflictPolicy::UpdateCatalog => {
            let updates = spec
                .non_key_columns()
                .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
                .join(", ");
            if spec.key.is_empty() || updates.is_empty() {
                " ON CONFLICT DO NOTHING".to_string()
            } else {
                format!(" ON CONFLICT ({}) DO UPDATE SET {}", target, updates)
            }
        }
    }
}

fn bind_value(b: &mut Separated<'_, 'static, Postgres, &'static str>, value: &SqlValue) {
    match value {
        SqlValue::Text(v) => b.push_bind(v.clone()),
        SqlValue::Bool(v) => b.push_bind(*v),
        SqlValue::Int(v) => b.push_bind(*v),
        SqlValue::Float(v) => b.push_bind(*v),
        SqlValue::Timestamp(v) => b.push_bind(*v),
        SqlValue::Json(v) => b.push_bind(v.clone()),
    };
}

#[async_trait]
impl RelationalStore for PgStore {
    async fn insert_rows(&mut self, spec: &'static TableSpec, rows: Vec<Row>) -> Result<u64> {
        let rows = dedup_rows(spec, rows);
        if rows.is_empty() {
            return Ok(0);
        }

        if spec.policy == ConflictPolicy::ReplaceChildren {
            let parents: Vec<String> = rows
                .iter()
                .filter_map(|r| spec.parent_text(r))
                .unique()
                .collect();
            let removed = self.delete_children(spec, parents).await?;
            debug!("Replaced {} existing rows in {}", removed, spec.table);
        }

        let header = format!(
            "INSERT INTO {} ({}) ",
            spec.table.quoted(),
            spec.columns.iter().map(|c| quote_ident(c)).join(", ")
        );
        let conflict = conflict_clause(spec);
        let rows_per_statement = (MAX_BINDS / spec.columns.len().max(1)).max(1);

        let mut affected = 0u64;
        for chunk in rows.chunks(rows_per_statement) {
            let mut builder: QueryBuilder<'static, Postgres> = QueryBuilder::new(header.clone());
            builder.push_values(chunk, |mut b, row| {
                for value in row {
                    bind_value(&mut b, value);
                }
            });
            builder.push(&conflict);

            let tx = self.transaction().await?;
            let result = builder
                .build()
                .execute(&mut **tx)
                .await
                .map_err(|e| flush_error(spec, e))?;
            affected += result.rows_affected();
        }
        Ok(affected)
    }

    async fn commit(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit()
                .await
                .map_err(|e| MigrationError::Database(format!("Failed to commit: {}", e)))?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            if let Err(e) = tx.rollback().await {
                warn!("Rollback failed: {}", e);
                return Err(MigrationError::Database(format!("Failed to roll back: {}", e)));
            }
        }
        Ok(())
    }

    async fn truncate_cascade(&mut self, table: TableRef) -> Result<()> {
        let sql = format!("TRUNCATE TABLE {} CASCADE", table.quoted());
        let tx = self.transaction().await?;
        sqlx::query(&sql)
            .execute(&mut **tx)
            .await
            .map_err(|e| MigrationError::Database(format!("Failed to truncate {}: {}", table, e)))?;
        Ok(())
    }

    async fn fetch_ids(&mut self, table: TableRef, column: &'static str) -> Result<HashSet<String>> {
        let sql = format!(
            "SELECT {0}::text FROM {1} WHERE {0} IS NOT NULL",
            quote_ident(column),
            table.quoted()
        );
        let tx = self.transaction().await?;
        let rows: Vec<(String,)> = sqlx::query_as(&sql)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| MigrationError::Database(format!("Failed to load ids from {}: {}", table, e)))?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn completed_collections(&mut self) -> Result<HashSet<Collection>> {
        Ok(self
            .completion_records()
            .await?
            .into_iter()
            .map(|r| r.collection)
            .collect())
    }

    async fn completion_records(&mut self) -> Result<Vec<CompletionRecord>> {
        let tx = self.transaction().await?;
        let rows: Vec<(String, Uuid, DateTime<Utc>, i64, i64)> = sqlx::query_as(
            "SELECT collection, run_id, completed_at, documents_read, rows_written
             FROM public.migration_ledger
             ORDER BY completed_at",
        )
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| MigrationError::Database(format!("Failed to read migration ledger: {}", e)))?;

        let mut records = Vec::with_capacity(rows.len());
        for (name, run_id, completed_at, documents_read, rows_written) in rows {
            match name.parse::<Collection>() {
                Ok(collection) => records.push(CompletionRecord {
                    collection,
                    run_id,
                    completed_at,
                    documents_read,
                    rows_written,
                }),
                Err(_) => warn!("Ignoring ledger entry for unknown collection {}", name),
            }
        }
        Ok(records)
    }

    async fn mark_completed(&mut self, record: &CompletionRecord) -> Result<()> {
        let tx = self.transaction().await?;
        sqlx::query(
            "INSERT INTO public.migration_ledger
                (collection, run_id, completed_at, documents_read, rows_written)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (collection) DO UPDATE SET
                run_id = EXCLUDED.run_id,
                completed_at = EXCLUDED.completed_at,
                documents_read = EXCLUDED.documents_read,
                rows_written = EXCLUDED.rows_written",
        )
        .bind(record.collection.as_str())
        .bind(record.run_id)
        .bind(record.completed_at)
        .bind(record.documents_read)
        .bind(record.rows_written)
        .execute(&mut **tx)
        .await
        .map_err(|e| MigrationError::Database(format!("Failed to record completion: {}", e)))?;
        Ok(())
    }

    async fn clear_completion(&mut self, collections: &[Collection]) -> Result<()> {
        let names: Vec<String> = collections.iter().map(|c| c.as_str().to_string()).collect();
        let tx = self.transaction().await?;
        sqlx::query("DELETE FROM public.migration_ledger WHERE collection = ANY($1)")
            .bind(names)
            .execute(&mut **tx)
            .await
            .map_err(|e| MigrationError::Database(format!("Failed to clear completion marks: {}", e)))?;
        Ok(())
    }
}
