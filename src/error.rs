use thiserror::Error;

use crate::connection::DbError;

/// Errors surfaced by the row set.
#[derive(Error, Debug)]
pub enum RowSetError {
    /// The command text or table binding cannot be used.
    #[error("setup error: {0}")]
    Setup(String),

    #[error("column index {index} out of bound [1-{count}]")]
    ColumnOutOfBounds { index: usize, count: usize },

    #[error("not in a valid row {row}/{row_count}")]
    InvalidRow { row: u64, row_count: u64 },

    #[error("column {0} does not exist")]
    ColumnNotFound(String),

    /// Cached batch boundaries disagree with what the database returns.
    #[error("batch boundary inconsistency: {0}")]
    InvariantViolation(String),

    #[error("read only row set: {0} is not supported")]
    Unsupported(&'static str),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Database(DbError),
}

impl From<DbError> for RowSetError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Interrupted => RowSetError::Cancelled,
            other => RowSetError::Database(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, RowSetError>;
