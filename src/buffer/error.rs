use std::io;
use thiserror::Error;

use super::PageId;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Page not found: page_id={0}")]
    PageNotFound(PageId),

    #[error("Buffer pool exhausted: every frame is pinned")]
    PoolExhausted,

    #[error("Page is pinned: page_id={0}, pin_count={1}")]
    PagePinned(PageId, u32),

    #[error("Invalid page size: expected {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },
}

pub type BufferResult<T> = Result<T, BufferError>;
