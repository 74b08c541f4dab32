//! Progress and result reporting for collection runs

use crate::descriptor::Collection;
use crate::etl::orchestrator::MigrationSummary;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started {
        collection: Collection,
        run_id: Uuid,
        source: String,
    },
    Progress {
        collection: Collection,
        processed: u64,
        skipped: u64,
    },
    Skipped {
        collection: Collection,
        document_id: Option<String>,
        reason: String,
    },
    Finished(MigrationSummary),
    Failed {
        collection: Collection,
        phase: String,
        document_id: Option<String>,
        message: String,
    },
}

/// Receives run events in order.
pub trait ProgressObserver: Send {
    fn on_event(&mut self, event: &ProgressEvent);
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Default)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_event(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started {
                collection,
                run_id,
                source,
            } => info!("🚀 Migrating {} from {} (run {})", collection, source, run_id),
            ProgressEvent::Progress {
                collection,
                processed,
                skipped,
            } => info!("   {}: {} documents processed, {} skipped", collection, processed, skipped),
            ProgressEvent::Skipped {
                collection,
                document_id,
                reason,
            } => warn!(
                "Skipping {} document {}: {}",
                collection,
                document_id.as_deref().unwrap_or("<no id>"),
                reason
            ),
            ProgressEvent::Finished(summary) => {
                info!(
                    "✅ {}: {} documents read, {} migrated, {} skipped, {} ghosts in {} ms",
                    summary.collection,
                    summary.documents_read,
                    summary.documents_migrated,
                    summary.skipped.len(),
                    summary.ghosts_created,
                    summary.elapsed_ms
                );
                for (table, rows) in &summary.rows_written {
                    info!("   {} rows → {}", rows, table);
                }
            }
            ProgressEvent::Failed {
                collection,
                phase,
                document_id,
                message,
            } => error!(
                "❌ {} failed during {}{}: {}",
                collection,
                phase,
                document_id
                    .as_deref()
                    .map(|id| format!(" at document {}", id))
                    .unwrap_or_default(),
                message
            ),
        }
    }
}

/// Keeps every event; useful for asserting on run behaviour.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    pub events: Vec<ProgressEvent>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> Vec<&ProgressEvent> {
        self.events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Failed { .. }))
            .collect()
    }
}

impl ProgressObserver for RecordingProgress {
    fn on_event(&mut self, event: &ProgressEvent) {
        self.events.push(event.clone());
    }
}
