//! The per-collection ETL pipeline
//!
//! Entity cache, shared-entity resolution, ghost synthesis, batched loading
//! and the orchestrator that drives them for one collection at a time.

pub mod batch;
pub mod cache;
pub mod ghost;
pub mod orchestrator;
pub mod progress;
pub mod resolver;

pub use batch::BatchAccumulator;
pub use cache::{EntityCache, EntityKind};
pub use ghost::{GhostQueue, GhostUser, SnapshotParents};
pub use orchestrator::{MigrationSummary, Orchestrator, Phase, PipelineOptions, SkippedDocument};
pub use progress::{LogProgress, ProgressEvent, ProgressObserver, RecordingProgress};
pub use resolver::{EntityResolver, SharedRefs};
