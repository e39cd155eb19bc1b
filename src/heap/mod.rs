mod error;
mod page;
mod row;
mod schema;
mod table_heap;
mod value;

pub use error::{HeapError, HeapResult};
pub use page::{MAX_TUPLE_SIZE, SlotState, SlotUpdate, TablePage};
pub use row::{INVALID_ROW_ID, Row, RowId, SlotId};
pub use schema::{ColumnDef, Schema};
pub use table_heap::{TableHeap, TableIter, UpdateOutcome};
pub use value::{DataType, Value};
