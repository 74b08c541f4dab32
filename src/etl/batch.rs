//! Batch Accumulator & Bulk Loader
//!
//! One bounded buffer per destination table. A buffer that reaches the batch
//! size is flushed on its own, preceded by pending ghosts and by any
//! earlier-stage buffer its rows may reference, then committed. Whatever is
//! left at end of stream is drained in stage order.

use crate::db::{RelationalStore, Row, TableRef, TableSpec};
use crate::error::Result;
use crate::etl::ghost::GhostQueue;
use crate::migrators::{Decomposed, Tuple};
use std::collections::BTreeMap;
use tracing::{debug, info};

struct TableBuffer {
    spec: &'static TableSpec,
    rows: Vec<Row>,
}

pub struct BatchAccumulator {
    batch_size: usize,
    buffers: Vec<TableBuffer>,
    rows_written: BTreeMap<String, u64>,
    commits: u64,
}

impl BatchAccumulator {
    pub fn new(batch_size: usize, tables: &[&'static TableSpec]) -> Self {
        let mut accumulator = Self {
            batch_size: batch_size.max(1),
            buffers: Vec::with_capacity(tables.len()),
            rows_written: BTreeMap::new(),
            commits: 0,
        };
        for spec in tables.iter().copied() {
            accumulator.register(spec);
        }
        accumulator
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Buffers stay sorted by stage; registration order breaks ties.
    fn register(&mut self, spec: &'static TableSpec) -> usize {
        if let Some(i) = self.buffers.iter().position(|b| b.spec.table == spec.table) {
            return i;
        }
        let index = self
            .buffers
            .iter()
            .position(|b| b.spec.stage > spec.stage)
            .unwrap_or(self.buffers.len());
        self.buffers.insert(
            index,
            TableBuffer {
                spec,
                rows: Vec::new(),
            },
        );
        self.rows_written.entry(spec.table.to_string()).or_insert(0);
        index
    }

    fn push(&mut self, tuple: Tuple) -> usize {
        let index = self.register(tuple.spec);
        self.buffers[index].rows.push(tuple.row);
        index
    }

    /// Buffer one row; flush its table when the batch size is reached.
    pub async fn accumulate(
        &mut self,
        tuple: Tuple,
        ghosts: &mut GhostQueue,
        store: &mut dyn RelationalStore,
    ) -> Result<()> {
        let index = self.push(tuple);
        if self.buffers[index].rows.len() >= self.batch_size {
            let table = self.buffers[index].spec.table;
            self.flush(table, ghosts, store).await?;
        }
        Ok(())
    }

    /// Buffer every row of one document. Size checks run after the whole
    /// document is in, so one parent's children never straddle two
    /// replace-children flushes.
    pub async fn accumulate_document(
        &mut self,
        document: Decomposed,
        ghosts: &mut GhostQueue,
        store: &mut dyn RelationalStore,
    ) -> Result<()> {
        for tuple in document.into_tuples() {
            self.push(tuple);
        }
        let full: Vec<TableRef> = self
            .buffers
            .iter()
            .filter(|b| b.rows.len() >= self.batch_size)
            .map(|b| b.spec.table)
            .collect();
        for table in full {
            // An earlier flush in this loop may already have emptied it.
            if self.pending(table) >= self.batch_size {
                self.flush(table, ghosts, store).await?;
            }
        }
        Ok(())
    }

    /// Flush `table` after ghosts and every non-empty earlier-stage buffer,
    /// then commit.
    pub async fn flush(
        &mut self,
        table: TableRef,
        ghosts: &mut GhostQueue,
        store: &mut dyn RelationalStore,
    ) -> Result<()> {
        let Some(target) = self.buffers.iter().position(|b| b.spec.table == table) else {
            return Ok(());
        };
        ghosts.flush(store).await?;
        let stage = self.buffers[target].spec.stage;
        for index in 0..self.buffers.len() {
            let earlier = self.buffers[index].spec.stage < stage;
            if index == target || earlier {
                self.write_buffer(index, store).await?;
            }
        }
        store.commit().await?;
        self.commits += 1;
        Ok(())
    }

    /// End of stream: write every non-empty buffer in stage order and commit.
    pub async fn drain(&mut self, ghosts: &mut GhostQueue, store: &mut dyn RelationalStore) -> Result<()> {
        ghosts.flush(store).await?;
        for index in 0..self.buffers.len() {
            self.write_buffer(index, store).await?;
        }
        store.commit().await?;
        self.commits += 1;
        info!("Drained remaining batches ({} commits this run)", self.commits);
        Ok(())
    }

    async fn write_buffer(&mut self, index: usize, store: &mut dyn RelationalStore) -> Result<()> {
        let buffer = &mut self.buffers[index];
        if buffer.rows.is_empty() {
            return Ok(());
        }
        let spec = buffer.spec;
        let rows = std::mem::take(&mut buffer.rows);
        let count = rows.len();
        let affected = store.insert_rows(spec, rows).await?;
        debug!("Flushed {} rows into {} ({} written)", count, spec.table, affected);
        *self.rows_written.entry(spec.table.to_string()).or_insert(0) += affected;
        Ok(())
    }

    pub fn pending(&self, table: TableRef) -> usize {
        self.buffers
            .iter()
            .find(|b| b.spec.table == table)
            .map_or(0, |b| b.rows.len())
    }

    /// Rows written per destination table, zero for untouched tables.
    pub fn rows_written(&self) -> &BTreeMap<String, u64> {
        &self.rows_written
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ConflictPolicy, FlushStage, ForeignKey, MemoryStore, SqlValue};

    const PARENTS: TableRef = TableRef::new("t", "main");
    const CHILDREN: TableRef = TableRef::new("t", "items");

    static PARENT_SPEC: TableSpec = TableSpec {
        table: PARENTS,
        columns: &["id"],
        key: &["id"],
        policy: ConflictPolicy::PreserveFirst,
        stage: FlushStage::Main,
        parent_column: None,
        foreign_keys: &[],
    };

    static CHILD_SPEC: TableSpec = TableSpec {
        table: CHILDREN,
        columns: &["parent_id", "value"],
        key: &[],
        policy: ConflictPolicy::Append,
        stage: FlushStage::Child,
        parent_column: Some("parent_id"),
        foreign_keys: &[ForeignKey::new("parent_id", PARENTS, "id")],
    };

    fn parent(id: &str) -> Tuple {
        Tuple {
            spec: &PARENT_SPEC,
            row: vec![SqlValue::from(id)],
        }
    }

    fn child(id: &str, value: &str) -> Tuple {
        Tuple {
            spec: &CHILD_SPEC,
            row: vec![SqlValue::from(id), SqlValue::from(value)],
        }
    }

    #[tokio::test]
    async fn test_threshold_flushes_only_that_table_and_its_parents() {
        let mut store = MemoryStore::new();
        let mut ghosts = GhostQueue::new();
        // Children registered first still flush after their parents.
        let mut batches = BatchAccumulator::new(2, &[&CHILD_SPEC, &PARENT_SPEC]);

        batches.accumulate(parent("p1"), &mut ghosts, &mut store).await.unwrap();
        batches.accumulate(child("p1", "a"), &mut ghosts, &mut store).await.unwrap();
        assert_eq!(store.commits(), 0);

        batches.accumulate(child("p1", "b"), &mut ghosts, &mut store).await.unwrap();
        assert_eq!(store.commits(), 1);
        assert_eq!(store.count(PARENTS), 1);
        assert_eq!(store.count(CHILDREN), 2);
        assert_eq!(batches.pending(CHILDREN), 0);
    }

    #[tokio::test]
    async fn test_main_flush_leaves_children_buffered() {
        let mut store = MemoryStore::new();
        let mut ghosts = GhostQueue::new();
        let mut batches = BatchAccumulator::new(2, &[&PARENT_SPEC, &CHILD_SPEC]);

        batches.accumulate(parent("p1"), &mut ghosts, &mut store).await.unwrap();
        batches.accumulate(child("p1", "a"), &mut ghosts, &mut store).await.unwrap();
        batches.accumulate(parent("p2"), &mut ghosts, &mut store).await.unwrap();
        assert_eq!(store.count(PARENTS), 2);
        assert_eq!(batches.pending(CHILDREN), 1);

        batches.drain(&mut ghosts, &mut store).await.unwrap();
        assert_eq!(store.count(CHILDREN), 1);
        assert_eq!(batches.rows_written().get("t.items"), Some(&1));
        assert_eq!(batches.rows_written().get("t.main"), Some(&2));
    }

    #[tokio::test]
    async fn test_drain_writes_partial_batches() {
        let mut store = MemoryStore::new();
        let mut ghosts = GhostQueue::new();
        let mut batches = BatchAccumulator::new(100, &[&PARENT_SPEC, &CHILD_SPEC]);
        batches.accumulate(parent("p1"), &mut ghosts, &mut store).await.unwrap();
        batches.accumulate(child("p1", "x"), &mut ghosts, &mut store).await.unwrap();
        assert_eq!(store.count(PARENTS), 0);

        batches.drain(&mut ghosts, &mut store).await.unwrap();
        assert_eq!(store.count(PARENTS), 1);
        assert_eq!(store.count(CHILDREN), 1);
        assert_eq!(batches.commits(), 1);
    }
}
