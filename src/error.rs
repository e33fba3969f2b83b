//! Error types shared by the registry, table builders and ingestion engine

use thiserror::Error;

/// Errors raised while building, merging or querying registry tables
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Text where a number was expected
    #[error("column {column}: cannot parse {value:?} as {expected}")]
    Parse {
        column: u32,
        value: String,
        expected: &'static str,
    },

    /// A row field arrived before the column that opens the row
    #[error("column {column}: no open row to receive this field")]
    FieldBeforeRow { column: u32 },

    #[error("unknown table kind: {0}")]
    UnknownKind(String),

    /// A registry entry another table depends on was never populated
    #[error("required registry entry not found: {name}")]
    MissingEntry { name: String },

    /// A registry entry exists but lacks a key the computation needs
    #[error("{table}: no data for key {key}")]
    MissingKey { table: String, key: String },

    /// A context was handed to a builder of a different kind
    #[error("context mismatch: expected {expected}, found {found}")]
    ContextMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// A builder received a field shape it does not consume
    #[error("{kind} cannot consume a {field} field")]
    UnexpectedField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("invalid cell range: {0}")]
    InvalidRange(String),

    /// A raw table row is too short for a bound column
    #[error("column index {column} is outside a row of {len} values")]
    ShortRow { column: usize, len: usize },

    /// A scenario declaration that cannot be turned into an operation
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A record-level failure, annotated with where it happened
    #[error("{table} row {row}: {source}")]
    Ingest {
        table: String,
        row: u32,
        #[source]
        source: Box<PipelineError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl PipelineError {
    /// Whether this error means the operation pipeline itself is broken.
    ///
    /// Fatal errors are escalated to process termination by the binary;
    /// everything else only aborts the current batch.
    pub fn is_fatal(&self) -> bool {
        match self {
            PipelineError::MissingEntry { .. }
            | PipelineError::MissingKey { .. }
            | PipelineError::ContextMismatch { .. }
            | PipelineError::UnexpectedField { .. }
            | PipelineError::Config(_) => true,
            PipelineError::Ingest { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    pub(crate) fn at_row(self, table: &str, row: u32) -> Self {
        PipelineError::Ingest {
            table: table.to_string(),
            row,
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
