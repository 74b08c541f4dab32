//! Error taxonomy for migration runs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Collection {collection} depends on {missing}, which has not been migrated yet")]
    DependencyNotMigrated { collection: String, missing: String },

    #[error("Invalid migration order: {0}")]
    InvalidOrder(String),

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Batch flush failed for {table}: {message}")]
    BatchFlush { table: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Migration of {collection} failed during {phase}{}: {source}", document_suffix(.document_id))]
    Aborted {
        collection: String,
        phase: String,
        document_id: Option<String>,
        source: Box<MigrationError>,
    },
}

fn document_suffix(document_id: &Option<String>) -> String {
    match document_id {
        Some(id) => format!(" (document {})", id),
        None => String::new(),
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        MigrationError::Database(err.to_string())
    }
}

impl MigrationError {
    /// The innermost cause, skipping `Aborted` wrappers.
    pub fn root_cause(&self) -> &MigrationError {
        match self {
            MigrationError::Aborted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, MigrationError>;

/// Per-document failure; the document is logged and skipped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecomposeError {
    #[error("document has no usable _id")]
    MissingPrimaryKey,

    #[error("required field {0} is missing")]
    MissingField(&'static str),

    #[error("field {field} is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborted_message_names_document() {
        let err = MigrationError::Aborted {
            collection: "lml_people_mesa4core".to_string(),
            phase: "streaming".to_string(),
            document_id: Some("64a1".to_string()),
            source: Box::new(MigrationError::Database("connection reset".to_string())),
        };
        let text = err.to_string();
        assert!(text.contains("lml_people_mesa4core"));
        assert!(text.contains("(document 64a1)"));
        assert!(text.contains("connection reset"));
        assert!(matches!(err.root_cause(), MigrationError::Database(_)));
    }
}
