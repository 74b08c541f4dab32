//! Source cursors over exported collections
//!
//! A source yields documents lazily, forward-only, once per run.

pub mod jsonl;
pub mod memory;

use crate::descriptor::Collection;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

pub use jsonl::{JsonLinesProvider, JsonLinesSource};
pub use memory::{MemorySourceProvider, VecSource};

/// Forward-only cursor over one collection.
#[async_trait]
pub trait DocumentSource: Send {
    /// Next document, or `None` at end of stream.
    async fn next_document(&mut self) -> Result<Option<Value>>;

    fn collection(&self) -> Collection;

    /// Where the documents come from, for log lines.
    fn location(&self) -> String;
}

/// Opens a fresh cursor for a collection; used when walking the global order.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn open(&self, collection: Collection) -> Result<Box<dyn DocumentSource>>;
}
