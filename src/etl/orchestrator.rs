//! Migration Orchestrator
//!
//! Drives one collection through
//! `Pending → DependenciesValidated → Reset → Streaming → Draining → Done`.
//! Any fatal error moves the run to `Failed`: the open transaction is rolled
//! back, committed batches stay, and a re-run recovers.

use crate::db::{CompletionRecord, RelationalStore};
use crate::descriptor::{Collection, DescriptorRegistry};
use crate::error::{MigrationError, Result};
use crate::etl::cache::EntityCache;
use crate::etl::ghost::GhostQueue;
use crate::etl::progress::{ProgressEvent, ProgressObserver};
use crate::etl::resolver::EntityResolver;
use crate::migrators::{CollectionMigrator, MigratorRegistry};
use crate::source::{DocumentSource, SourceProvider};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pending,
    DependenciesValidated,
    Reset,
    Streaming,
    Draining,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Pending => "pending",
            Phase::DependenciesValidated => "dependency validation",
            Phase::Reset => "reset",
            Phase::Streaming => "streaming",
            Phase::Draining => "draining",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Knobs for one orchestration run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOptions {
    pub batch_size: usize,
    /// Emit a progress event every this many documents.
    pub progress_every: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            batch_size: 2000,
            progress_every: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedDocument {
    pub document_id: Option<String>,
    pub reason: String,
}

/// Terminal report of a successful collection run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationSummary {
    pub run_id: Uuid,
    pub collection: Collection,
    pub documents_read: u64,
    pub documents_migrated: u64,
    pub skipped: Vec<SkippedDocument>,
    pub rows_written: BTreeMap<String, u64>,
    pub ghosts_created: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl MigrationSummary {
    /// Rows written into `schema.table`.
    pub fn rows_for(&self, table: &str) -> u64 {
        self.rows_written.get(table).copied().unwrap_or(0)
    }

    pub fn total_rows(&self) -> u64 {
        self.rows_written.values().sum()
    }
}

/// Mutable state of one run, kept for failure reports.
struct RunState {
    run_id: Uuid,
    collection: Collection,
    phase: Phase,
    document_id: Option<String>,
}

impl RunState {
    fn enter(&mut self, phase: Phase) {
        debug!("{}: {} → {}", self.collection, self.phase, phase);
        self.phase = phase;
    }
}

pub struct Orchestrator<'r> {
    descriptors: &'r DescriptorRegistry,
    migrators: &'r MigratorRegistry,
    options: PipelineOptions,
}

impl<'r> Orchestrator<'r> {
    pub fn new(
        descriptors: &'r DescriptorRegistry,
        migrators: &'r MigratorRegistry,
        options: PipelineOptions,
    ) -> Self {
        Self {
            descriptors,
            migrators,
            options,
        }
    }

    /// Migrate one collection with full-refresh semantics.
    pub async fn migrate(
        &self,
        source: &mut dyn DocumentSource,
        store: &mut dyn RelationalStore,
        observer: &mut dyn ProgressObserver,
    ) -> Result<MigrationSummary> {
        let mut run = RunState {
            run_id: Uuid::new_v4(),
            collection: source.collection(),
            phase: Phase::Pending,
            document_id: None,
        };

        match self.execute(&mut run, source, store, observer).await {
            Ok(summary) => Ok(summary),
            Err(err) => {
                let failed_in = run.phase;
                run.enter(Phase::Failed);
                if let Err(rollback_err) = store.rollback().await {
                    warn!("Rollback after failure also failed: {}", rollback_err);
                }
                observer.on_event(&ProgressEvent::Failed {
                    collection: run.collection,
                    phase: failed_in.to_string(),
                    document_id: run.document_id.clone(),
                    message: err.to_string(),
                });
                Err(MigrationError::Aborted {
                    collection: run.collection.to_string(),
                    phase: failed_in.to_string(),
                    document_id: run.document_id,
                    source: Box::new(err),
                })
            }
        }
    }

    /// Migrate every collection in the registry's order, stopping at the
    /// first failure.
    pub async fn migrate_all(
        &self,
        sources: &dyn SourceProvider,
        store: &mut dyn RelationalStore,
        observer: &mut dyn ProgressObserver,
    ) -> Result<Vec<MigrationSummary>> {
        let mut summaries = Vec::new();
        for collection in self.descriptors.migration_order() {
            let mut source = sources.open(*collection).await?;
            let summary = self.migrate(source.as_mut(), store, observer).await?;
            summaries.push(summary);
        }
        info!("🎉 Migrated {} collections", summaries.len());
        Ok(summaries)
    }

    async fn execute(
        &self,
        run: &mut RunState,
        source: &mut dyn DocumentSource,
        store: &mut dyn RelationalStore,
        observer: &mut dyn ProgressObserver,
    ) -> Result<MigrationSummary> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let collection = run.collection;
        let migrator = self.migrators.get(collection)?;
        observer.on_event(&ProgressEvent::Started {
            collection,
            run_id: run.run_id,
            source: source.location(),
        });

        // Each phase is entered before its work so failures name the step.
        run.enter(Phase::DependenciesValidated);
        let completed = store.completed_collections().await?;
        self.descriptors.check_dependencies(collection, &completed)?;

        run.enter(Phase::Reset);
        self.reset(collection, migrator, store).await?;

        run.enter(Phase::Streaming);
        let mut cache = EntityCache::new();
        let mut ghosts = GhostQueue::new();
        let mut batches = migrator.initialize_batches(self.options.batch_size);
        {
            let mut resolver = EntityResolver::new(&mut cache, &mut ghosts, &mut *store);
            for kind in migrator.preload() {
                resolver.ensure_loaded(*kind).await?;
            }
        }

        let mut documents_read = 0u64;
        let mut documents_migrated = 0u64;
        let mut skipped: Vec<SkippedDocument> = Vec::new();

        while let Some(doc) = source.next_document().await? {
            documents_read += 1;
            run.document_id = migrator.primary_key(&doc);

            if run.document_id.is_none() {
                self.skip(collection, None, "document has no usable _id".to_string(), &mut skipped, observer);
                continue;
            }

            let checkpoint = ghosts.checkpoint();
            let refs = {
                let mut resolver = EntityResolver::new(&mut cache, &mut ghosts, &mut *store);
                migrator.resolve_shared(&doc, &mut resolver).await?
            };

            match migrator.decompose(&doc, &refs, &cache) {
                Ok(decomposed) => {
                    batches
                        .accumulate_document(decomposed, &mut ghosts, &mut *store)
                        .await?;
                    documents_migrated += 1;
                }
                Err(err) => {
                    // No row will reference ghosts named only by this document.
                    ghosts.discard_since(checkpoint, &mut cache);
                    let id = run.document_id.clone();
                    self.skip(collection, id, err.to_string(), &mut skipped, observer);
                }
            }

            if self.options.progress_every > 0 && documents_read % self.options.progress_every == 0 {
                observer.on_event(&ProgressEvent::Progress {
                    collection,
                    processed: documents_read,
                    skipped: skipped.len() as u64,
                });
            }
        }
        run.document_id = None;

        run.enter(Phase::Draining);
        migrator
            .insert_batches(&mut batches, &mut ghosts, &mut *store)
            .await?;

        let finished_at = Utc::now();
        let summary = MigrationSummary {
            run_id: run.run_id,
            collection,
            documents_read,
            documents_migrated,
            skipped,
            rows_written: batches.rows_written().clone(),
            ghosts_created: ghosts.inserted(),
            started_at,
            finished_at,
            elapsed_ms: clock.elapsed().as_millis() as u64,
        };

        store
            .mark_completed(&CompletionRecord {
                collection,
                run_id: run.run_id,
                completed_at: finished_at,
                documents_read: summary.documents_read as i64,
                rows_written: summary.total_rows() as i64,
            })
            .await?;
        store.commit().await?;
        run.enter(Phase::Done);

        observer.on_event(&ProgressEvent::Finished(summary.clone()));
        Ok(summary)
    }

    /// Clear the collection's main table (children go with the cascade) and
    /// invalidate completion marks that depended on its contents.
    async fn reset(
        &self,
        collection: Collection,
        migrator: &dyn CollectionMigrator,
        store: &mut dyn RelationalStore,
    ) -> Result<()> {
        let dependents = self.descriptors.dependents_of(collection);
        let main = migrator.main_table().table;
        info!("Resetting {} (cascade)", main);
        if !dependents.is_empty() {
            let names = dependents.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", ");
            warn!("⚠️  Cascade from {} also empties {}; migrate them again", main, names);
        }

        let mut invalidated = vec![collection];
        invalidated.extend(dependents);
        store.truncate_cascade(main).await?;
        store.clear_completion(&invalidated).await?;
        store.commit().await?;
        Ok(())
    }

    fn skip(
        &self,
        collection: Collection,
        document_id: Option<String>,
        reason: String,
        skipped: &mut Vec<SkippedDocument>,
        observer: &mut dyn ProgressObserver,
    ) {
        observer.on_event(&ProgressEvent::Skipped {
            collection,
            document_id: document_id.clone(),
            reason: reason.clone(),
        });
        skipped.push(SkippedDocument { document_id, reason });
    }
}
