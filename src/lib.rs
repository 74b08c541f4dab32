//! mongomigra: per-collection migration of MongoDB exports into PostgreSQL
//!
//! Each source collection is streamed, decomposed into relational rows,
//! reconciled against shared entities and bulk-loaded in dependency order.

pub mod config;
pub mod db;
pub mod descriptor;
pub mod document;
pub mod error;
pub mod etl;
pub mod migrators;
pub mod source;
pub mod timestamp;

pub use config::MigrationConfig;
pub use db::{MemoryStore, PgStore, RelationalStore};
pub use descriptor::{Collection, CollectionDescriptor, CollectionKind, DescriptorRegistry};
pub use error::{DecomposeError, MigrationError, Result};
pub use etl::{
    LogProgress, MigrationSummary, Orchestrator, PipelineOptions, ProgressEvent, ProgressObserver,
    RecordingProgress,
};
pub use migrators::{CollectionMigrator, MigratorRegistry};
pub use source::{DocumentSource, JsonLinesProvider, MemorySourceProvider, SourceProvider, VecSource};
