//! Relational store access
//!
//! Table specifications, the `RelationalStore` trait the pipeline writes
//! through, and its PostgreSQL and in-memory implementations.

pub mod connection;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod table;

pub use connection::{init_pool, DbPool};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{CompletionRecord, RelationalStore};
pub use table::{
    ConflictPolicy, FlushStage, ForeignKey, Record, Row, SqlValue, TableRef, TableSpec,
};
