//! JSON-lines reader for collection exports
//!
//! Reads `<dir>/<collection>.json` as written by a collection export: one
//! extended-JSON document per line. A file holding a single JSON array is
//! accepted too and read whole. Files on disk never time out, so the cursor
//! survives arbitrarily long runs. A leading UTF-8 byte order mark is
//! ignored; undecodable lines are reported with their line number.

use super::{DocumentSource, SourceProvider};
use crate::descriptor::Collection;
use crate::error::{MigrationError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::debug;

const BOM: &[u8] = b"\xEF\xBB\xBF";

enum Mode {
    Lines(BufReader<File>),
    Array(VecDeque<Value>),
}

pub struct JsonLinesSource {
    collection: Collection,
    path: PathBuf,
    mode: Mode,
    line: usize,
    buf: Vec<u8>,
}

impl JsonLinesSource {
    pub async fn open(collection: Collection, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).await.map_err(|e| {
            MigrationError::Source(format!("Failed to open {}: {}", path.display(), e))
        })?;

        let mode = if starts_with_array(&mut file).await? {
            let mut raw = Vec::new();
            file.read_to_end(&mut raw).await?;
            let raw = raw.strip_prefix(BOM).unwrap_or(raw.as_slice());
            let documents: Vec<Value> = serde_json::from_slice(raw).map_err(|e| {
                MigrationError::Source(format!("{}: invalid JSON array: {}", path.display(), e))
            })?;
            debug!("Loaded {} documents from array export {}", documents.len(), path.display());
            Mode::Array(documents.into())
        } else {
            let file = File::open(&path).await?;
            Mode::Lines(BufReader::new(file))
        };

        Ok(Self {
            collection,
            path,
            mode,
            line: 0,
            buf: Vec::new(),
        })
    }
}

/// Peek at the first non-whitespace byte, then rewind.
async fn starts_with_array(file: &mut File) -> Result<bool> {
    use tokio::io::AsyncSeekExt;

    let mut buf = [0u8; 512];
    let mut found = false;
    let mut first = true;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let mut chunk = &buf[..n];
        if first {
            chunk = chunk.strip_prefix(BOM).unwrap_or(chunk);
            first = false;
        }
        if let Some(b) = chunk.iter().find(|b| !b.is_ascii_whitespace()) {
            found = *b == b'[';
            break;
        }
    }
    file.seek(std::io::SeekFrom::Start(0)).await?;
    Ok(found)
}

#[async_trait]
impl DocumentSource for JsonLinesSource {
    async fn next_document(&mut self) -> Result<Option<Value>> {
        match &mut self.mode {
            Mode::Array(queue) => Ok(queue.pop_front()),
            Mode::Lines(reader) => loop {
                self.buf.clear();
                if reader.read_until(b'\n', &mut self.buf).await? == 0 {
                    return Ok(None);
                }
                self.line += 1;
                let mut bytes = self.buf.as_slice();
                if self.line == 1 {
                    bytes = bytes.strip_prefix(BOM).unwrap_or(bytes);
                }
                let text = std::str::from_utf8(bytes).map_err(|e| {
                    MigrationError::Source(format!(
                        "{} line {}: invalid UTF-8: {}",
                        self.path.display(),
                        self.line,
                        e
                    ))
                })?;
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let document = serde_json::from_str(trimmed).map_err(|e| {
                    MigrationError::Source(format!(
                        "{} line {}: {}",
                        self.path.display(),
                        self.line,
                        e
                    ))
                })?;
                return Ok(Some(document));
            },
        }
    }

    fn collection(&self) -> Collection {
        self.collection
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Opens `<dir>/<collection>.json` for each collection.
pub struct JsonLinesProvider {
    dir: PathBuf,
}

impl JsonLinesProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, collection: Collection) -> PathBuf {
        self.dir.join(format!("{}.json", collection.as_str()))
    }
}

#[async_trait]
impl SourceProvider for JsonLinesProvider {
    async fn open(&self, collection: Collection) -> Result<Box<dyn DocumentSource>> {
        let source = JsonLinesSource::open(collection, self.path_for(collection)).await?;
        Ok(Box::new(source))
    }
}
