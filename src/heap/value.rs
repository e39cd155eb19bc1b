use super::error::{HeapError, HeapResult};

/// Represents a column data type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    Int,            // 4 bytes
    Float,          // 8 bytes
    Varchar(usize), // 2-byte length prefix + up to n bytes
}

/// Represents a single column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f64),
    String(String),
    Null,
}

impl Value {
    /// Check if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Number of bytes this value occupies when serialized as `data_type`.
    /// NULL values occupy no payload bytes; they live in the row's NULL bitmap.
    pub fn serialized_size(&self, data_type: &DataType) -> usize {
        match (self, data_type) {
            (Value::Null, _) => 0,
            (Value::Int(_), DataType::Int) => 4,
            (Value::Float(_), DataType::Float) => 8,
            (Value::String(s), DataType::Varchar(_)) => 2 + s.len(),
            // Type mismatches are caught by serialize
            (Value::Int(_), _) => 4,
            (Value::Float(_), _) => 8,
            (Value::String(s), _) => 2 + s.len(),
        }
    }

    /// Serialize value to bytes
    pub fn serialize(&self, data_type: &DataType) -> HeapResult<Vec<u8>> {
        match (self, data_type) {
            (Value::Int(i), DataType::Int) => Ok(i.to_le_bytes().to_vec()),
            (Value::Float(f), DataType::Float) => Ok(f.to_le_bytes().to_vec()),
            (Value::String(s), DataType::Varchar(max_len)) => {
                let bytes = s.as_bytes();
                if bytes.len() > *max_len {
                    return Err(HeapError::Serialization(format!(
                        "String length {} exceeds max length {}",
                        bytes.len(),
                        max_len
                    )));
                }
                let mut result = Vec::with_capacity(2 + bytes.len());
                result.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
                result.extend_from_slice(bytes);
                Ok(result)
            }
            (Value::Null, _) => Ok(Vec::new()),
            _ => Err(HeapError::TypeMismatch {
                expected: format!("{:?}", data_type),
                actual: format!("{:?}", self),
            }),
        }
    }

    /// Deserialize a value from the front of `data`, returning the value and
    /// the number of bytes consumed
    pub fn deserialize(
        data: &[u8],
        data_type: &DataType,
        is_null: bool,
    ) -> HeapResult<(Self, usize)> {
        if is_null {
            return Ok((Value::Null, 0));
        }

        match data_type {
            DataType::Int => {
                if data.len() < 4 {
                    return Err(HeapError::Deserialization(format!(
                        "Expected 4 bytes for INT, got {}",
                        data.len()
                    )));
                }
                let mut buf = [0u8; 4];
                buf.copy_from_slice(&data[..4]);
                Ok((Value::Int(i32::from_le_bytes(buf)), 4))
            }
            DataType::Float => {
                if data.len() < 8 {
                    return Err(HeapError::Deserialization(format!(
                        "Expected 8 bytes for FLOAT, got {}",
                        data.len()
                    )));
                }
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&data[..8]);
                Ok((Value::Float(f64::from_le_bytes(buf)), 8))
            }
            DataType::Varchar(max_len) => {
                if data.len() < 2 {
                    return Err(HeapError::Deserialization(
                        "Truncated VARCHAR length prefix".to_string(),
                    ));
                }
                let len = u16::from_le_bytes([data[0], data[1]]) as usize;
                if len > *max_len {
                    return Err(HeapError::Deserialization(format!(
                        "VARCHAR length {} exceeds max length {}",
                        len, max_len
                    )));
                }
                if data.len() < 2 + len {
                    return Err(HeapError::Deserialization(format!(
                        "Expected {} bytes for VARCHAR payload, got {}",
                        len,
                        data.len() - 2
                    )));
                }
                let s = std::str::from_utf8(&data[2..2 + len])
                    .map_err(|e| HeapError::Deserialization(format!("Invalid UTF-8: {}", e)))?;
                Ok((Value::String(s.to_string()), 2 + len))
            }
        }
    }
}
