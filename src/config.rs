//! Run configuration from the environment (and `.env`), overridable from the CLI

use crate::error::{MigrationError, Result};
use crate::etl::PipelineOptions;
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_SOURCE_DIR: &str = "./export";
const DEFAULT_BATCH_SIZE: usize = 2000;
const DEFAULT_PROGRESS_EVERY: u64 = 1000;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct MigrationConfig {
    #[serde(skip_serializing)]
    pub database_url: Option<String>,
    pub source_dir: PathBuf,
    pub batch_size: usize,
    pub progress_every: u64,
    pub max_connections: u32,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            source_dir: PathBuf::from(DEFAULT_SOURCE_DIR),
            batch_size: DEFAULT_BATCH_SIZE,
            progress_every: DEFAULT_PROGRESS_EVERY,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl MigrationConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            database_url: database_url(&lookup),
            source_dir: lookup("MIGRATION_SOURCE_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.source_dir),
            batch_size: parse_var(&lookup, "MIGRATION_BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            progress_every: parse_var(&lookup, "MIGRATION_PROGRESS_EVERY")?
                .unwrap_or(defaults.progress_every),
            max_connections: parse_var(&lookup, "MIGRATION_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_source_dir(mut self, dir: Option<PathBuf>) -> Self {
        if let Some(dir) = dir {
            self.source_dir = dir;
        }
        self
    }

    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Result<Self> {
        if let Some(batch_size) = batch_size {
            self.batch_size = batch_size;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(MigrationError::Config("batch size must be at least 1".to_string()));
        }
        if self.max_connections == 0 {
            return Err(MigrationError::Config(
                "max connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The database URL, required for anything that touches PostgreSQL.
    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url.as_deref().ok_or_else(|| {
            MigrationError::Config(
                "DATABASE_URL (or POSTGRES_HOST and POSTGRES_DB) must be set".to_string(),
            )
        })
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            batch_size: self.batch_size,
            progress_every: self.progress_every,
        }
    }
}

fn database_url<F>(lookup: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("DATABASE_URL").filter(|s| !s.trim().is_empty()) {
        return Some(url);
    }
    let host = lookup("POSTGRES_HOST")?;
    let db = lookup("POSTGRES_DB")?;
    let port = lookup("POSTGRES_PORT").unwrap_or_else(|| "5432".to_string());
    let user = lookup("POSTGRES_USER").unwrap_or_else(|| "postgres".to_string());
    let credentials = match lookup("POSTGRES_PASSWORD") {
        Some(password) => format!("{}:{}", user, password),
        None => user,
    };
    Some(format!("postgresql://{}@{}:{}/{}", credentials, host, port, db))
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| MigrationError::Config(format!("{} = {:?} is invalid: {}", key, raw, e))),
    }
}
