use std::fmt;

use super::error::{HeapError, HeapResult};
use super::schema::Schema;
use super::value::Value;
use crate::buffer::{INVALID_PAGE_ID, PageId};

/// Slot identifier within a page
pub type SlotId = u16;

/// Stable logical address of a row (page + slot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowId {
    pub page_id: PageId,
    pub slot_id: SlotId,
}

/// Sentinel denoting "no row": empty heaps, end of iteration
pub const INVALID_ROW_ID: RowId = RowId {
    page_id: INVALID_PAGE_ID,
    slot_id: 0,
};

impl RowId {
    pub fn new(page_id: PageId, slot_id: SlotId) -> Self {
        Self { page_id, slot_id }
    }

    pub fn is_valid(&self) -> bool {
        self.page_id != INVALID_PAGE_ID
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "({}, {})", self.page_id, self.slot_id)
        } else {
            write!(f, "(invalid)")
        }
    }
}

/// A single row (tuple) with typed values and its heap address.
///
/// The row id is [`INVALID_ROW_ID`] until insertion assigns one; after a
/// relocating update it is the new address, and the old id is retired.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
    rid: RowId,
}

impl Row {
    /// Create a new row; its id stays invalid until it is inserted
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            rid: INVALID_ROW_ID,
        }
    }

    /// Get the number of values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if row has no values
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by index
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Get all values
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Set a value by index
    pub fn set(&mut self, idx: usize, value: Value) {
        if idx < self.values.len() {
            self.values[idx] = value;
        }
    }

    /// This row's heap address
    pub fn rid(&self) -> RowId {
        self.rid
    }

    pub fn set_rid(&mut self, rid: RowId) {
        self.rid = rid;
    }

    /// Serialized byte size of this row under `schema`.
    /// Varies per row: VARCHAR payloads and NULLs change the size.
    pub fn serialized_size(&self, schema: &Schema) -> usize {
        schema.null_bitmap_size()
            + self
                .values
                .iter()
                .zip(schema.columns())
                .map(|(v, c)| v.serialized_size(&c.data_type))
                .sum::<usize>()
    }

    /// Serialize row to bytes according to schema
    /// Format: [NULL bitmap] [col0 data] [col1 data] ...
    pub fn serialize(&self, schema: &Schema) -> HeapResult<Vec<u8>> {
        schema.validate_row(&self.values)?;

        let mut result = Vec::with_capacity(self.serialized_size(schema));

        // 1. NULL bitmap
        let mut bitmap = vec![0u8; schema.null_bitmap_size()];
        for (i, value) in self.values.iter().enumerate() {
            if value.is_null() {
                let byte_idx = i / 8;
                let bit_idx = i % 8;
                bitmap[byte_idx] |= 1 << bit_idx;
            }
        }
        result.extend_from_slice(&bitmap);

        // 2. Column payloads (NULLs contribute nothing)
        for (value, col) in self.values.iter().zip(schema.columns()) {
            let bytes = value.serialize(&col.data_type)?;
            result.extend_from_slice(&bytes);
        }

        Ok(result)
    }

    /// Deserialize a row from bytes according to schema.
    /// The resulting row has an invalid id; the caller sets it.
    pub fn deserialize(data: &[u8], schema: &Schema) -> HeapResult<Self> {
        let bitmap_size = schema.null_bitmap_size();
        if data.len() < bitmap_size {
            return Err(HeapError::Deserialization(format!(
                "Row shorter than its NULL bitmap: {} bytes",
                data.len()
            )));
        }

        let bitmap = &data[..bitmap_size];
        let mut offset = bitmap_size;
        let mut values = Vec::with_capacity(schema.column_count());

        for (i, col) in schema.columns().iter().enumerate() {
            let byte_idx = i / 8;
            let bit_idx = i % 8;
            let is_null = (bitmap[byte_idx] & (1 << bit_idx)) != 0;

            let (value, consumed) =
                Value::deserialize(&data[offset..], &col.data_type, is_null)?;
            values.push(value);
            offset += consumed;
        }

        if offset != data.len() {
            return Err(HeapError::Deserialization(format!(
                "Row has {} trailing bytes",
                data.len() - offset
            )));
        }

        Ok(Row {
            values,
            rid: INVALID_ROW_ID,
        })
    }
}
