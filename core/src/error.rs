use crate::types::TableId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RatingError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No active rate table for product '{product_type}'{}", carrier_suffix(.carrier_id))]
    NoActiveTable {
        product_type: String,
        carrier_id:   Option<String>,
    },

    #[error("Rate table {table_id} not found")]
    TableNotFound { table_id: TableId },

    #[error("Rate table {table_id} is referenced by rating runs and cannot be edited; clone it to a new version")]
    TableFrozen { table_id: TableId },

    #[error("Rate table {table_id} is referenced by rating runs and cannot be deleted")]
    TableInUse { table_id: TableId },

    #[error("Rate table version '{version}' already exists for product '{product_type}'")]
    DuplicateVersion {
        product_type: String,
        version:      String,
    },

    #[error("Rate table {table_id} changed concurrently (expected revision {expected})")]
    ConcurrentModification { table_id: TableId, expected: i64 },

    #[error("Import is missing required columns: {}", .missing.join(", "))]
    SchemaMismatch { missing: Vec<String> },

    #[error("Unknown import resource type '{name}'")]
    UnknownResource { name: String },

    #[error("Invalid value '{value}' for {field}")]
    InvalidValue { field: &'static str, value: String },

    #[error("Engine fault: {0}")]
    EngineFault(String),
}

impl RatingError {
    /// Configuration and data faults a caller can act on, as opposed to
    /// storage or engine faults that should surface as "retry later".
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            RatingError::NoActiveTable { .. }
                | RatingError::TableNotFound { .. }
                | RatingError::TableFrozen { .. }
                | RatingError::TableInUse { .. }
                | RatingError::DuplicateVersion { .. }
                | RatingError::SchemaMismatch { .. }
                | RatingError::UnknownResource { .. }
                | RatingError::InvalidValue { .. }
        )
    }
}

fn carrier_suffix(carrier_id: &Option<String>) -> String {
    carrier_id
        .as_ref()
        .map(|c| format!(" and carrier '{c}'"))
        .unwrap_or_default()
}

pub type RatingResult<T> = Result<T, RatingError>;
