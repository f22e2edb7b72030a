use thiserror::Error;

/// Errors raised by the warehouse.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A point record failed validation; the batch was rolled back.
    #[error("invalid point record: {0}")]
    InvalidRecord(String),
}
