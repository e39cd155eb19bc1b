pub mod buffer;
pub mod heap;
pub mod tx;

pub use buffer::{
    BUFFER_POOL_SIZE, BufferError, BufferPool, BufferResult, DiskManager, INVALID_PAGE_ID,
    PAGE_SIZE, PageGuard, PageId,
};
pub use heap::{
    ColumnDef, DataType, HeapError, HeapResult, INVALID_ROW_ID, MAX_TUPLE_SIZE, Row, RowId,
    Schema, SlotId, SlotState, SlotUpdate, TableHeap, TableIter, TablePage, UpdateOutcome, Value,
};
pub use tx::{LockManager, LockMode, LogManager, LogRecord, Lsn, Transaction, TxnId};
