//! In-memory document sources

use super::{DocumentSource, SourceProvider};
use crate::descriptor::Collection;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

/// Serves a fixed list of documents once.
pub struct VecSource {
    collection: Collection,
    documents: VecDeque<Value>,
}

impl VecSource {
    pub fn new(collection: Collection, documents: Vec<Value>) -> Self {
        Self {
            collection,
            documents: documents.into(),
        }
    }
}

#[async_trait]
impl DocumentSource for VecSource {
    async fn next_document(&mut self) -> Result<Option<Value>> {
        Ok(self.documents.pop_front())
    }

    fn collection(&self) -> Collection {
        self.collection
    }

    fn location(&self) -> String {
        format!("memory:{}", self.collection)
    }
}

/// Fixture documents per collection. Collections without fixtures are empty.
#[derive(Default)]
pub struct MemorySourceProvider {
    documents: HashMap<Collection, Vec<Value>>,
}

impl MemorySourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, collection: Collection, documents: Vec<Value>) -> Self {
        self.documents.insert(collection, documents);
        self
    }
}

#[async_trait]
impl SourceProvider for MemorySourceProvider {
    async fn open(&self, collection: Collection) -> Result<Box<dyn DocumentSource>> {
        let documents = self.documents.get(&collection).cloned().unwrap_or_default();
        Ok(Box::new(VecSource::new(collection, documents)))
    }
}
