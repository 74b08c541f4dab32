//! Shared namespace (`public`)
//!
//! Entities referenced by every collection but owned by none of them.

use crate::db::{ConflictPolicy, FlushStage, TableRef, TableSpec};
use crate::etl::ghost::USER_GHOSTS;

pub const CUSTOMERS_TABLE: TableRef = TableRef::new("public", "customers");

pub static CUSTOMERS: TableSpec = TableSpec {
    table: CUSTOMERS_TABLE,
    columns: CustomerRow::COLUMNS,
    key: &["id"],
    policy: ConflictPolicy::PreserveFirst,
    stage: FlushStage::Catalog,
    parent_column: None,
    foreign_keys: &[],
};

crate::table_record! {
    pub struct CustomerRow in CUSTOMERS {
        id: String,
    }
}

/// Tables written through the resolver and ghost queue rather than a
/// collection's own batches.
pub static TABLES: &[&TableSpec] = &[&CUSTOMERS, &USER_GHOSTS];
