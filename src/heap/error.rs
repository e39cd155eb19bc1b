use thiserror::Error;

use super::row::RowId;
use crate::buffer::BufferError;

#[derive(Debug, Error)]
pub enum HeapError {
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Row of {size} bytes exceeds the per-page limit of {limit}")]
    SizeExceeded { size: usize, limit: usize },

    #[error("Row not found: {0}")]
    NotFound(RowId),

    #[error("Slot {rid} is in the wrong state for {op}")]
    InvalidState { rid: RowId, op: &'static str },

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("NULL value for NOT NULL column: {0}")]
    NullConstraintViolation(String),

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

pub type HeapResult<T> = Result<T, HeapError>;
