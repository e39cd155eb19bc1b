use super::error::{HeapError, HeapResult};
use super::value::{DataType, Value};

/// Column definition with metadata
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub not_null: bool,
}

impl ColumnDef {
    /// Create a new column definition
    pub fn new(name: String, data_type: DataType, not_null: bool) -> Self {
        Self {
            name,
            data_type,
            not_null,
        }
    }
}

/// Table schema with all column definitions.
///
/// Rows under a schema are variable-length: VARCHAR columns serialize with
/// a length prefix, so there is no fixed record size.
#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<ColumnDef>,
    null_bitmap_size: usize,
}

impl Schema {
    /// Create a new table schema
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        let null_bitmap_size = columns.len().div_ceil(8); // ⌈n/8⌉
        Self {
            columns,
            null_bitmap_size,
        }
    }

    /// Get all columns
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Get column count
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Get a specific column
    pub fn column(&self, idx: usize) -> Option<&ColumnDef> {
        self.columns.get(idx)
    }

    /// Find column index by name
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Get NULL bitmap size in bytes
    pub fn null_bitmap_size(&self) -> usize {
        self.null_bitmap_size
    }

    /// Validate a set of values against this schema
    pub fn validate_row(&self, values: &[Value]) -> HeapResult<()> {
        if values.len() != self.columns.len() {
            return Err(HeapError::SchemaMismatch(format!(
                "Expected {} columns, got {}",
                self.columns.len(),
                values.len()
            )));
        }

        for (value, col) in values.iter().zip(&self.columns) {
            // Check NOT NULL constraint
            if col.not_null && value.is_null() {
                return Err(HeapError::NullConstraintViolation(format!(
                    "Column '{}' cannot be NULL",
                    col.name
                )));
            }

            // Check type compatibility (if not NULL)
            if !value.is_null() {
                match (&col.data_type, value) {
                    (DataType::Int, Value::Int(_)) => {}
                    (DataType::Float, Value::Float(_)) => {}
                    (DataType::Varchar(_), Value::String(_)) => {}
                    (dt, val) => {
                        return Err(HeapError::TypeMismatch {
                            expected: format!("{:?}", dt),
                            actual: format!("{:?}", val),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_schema() -> Schema {
        Schema::new(vec![
            ColumnDef::new("id".to_string(), DataType::Int, true),
            ColumnDef::new("name".to_string(), DataType::Varchar(20), false),
            ColumnDef::new("score".to_string(), DataType::Float, false),
        ])
    }

    #[test]
    fn test_schema_layout() {
        let schema = create_test_schema();
        assert_eq!(schema.column_count(), 3);
        assert_eq!(schema.null_bitmap_size(), 1);
        assert_eq!(schema.find_column("score"), Some(2));
        assert_eq!(schema.find_column("missing"), None);
    }

    #[test]
    fn test_validate_row_ok() {
        let schema = create_test_schema();
        let values = vec![
            Value::Int(1),
            Value::String("Alice".to_string()),
            Value::Float(95.5),
        ];
        assert!(schema.validate_row(&values).is_ok());
    }

    #[test]
    fn test_validate_row_null_allowed() {
        let schema = create_test_schema();
        let values = vec![Value::Int(1), Value::Null, Value::Null];
        assert!(schema.validate_row(&values).is_ok());
    }

    #[test]
    fn test_validate_not_null_violation() {
        let schema = create_test_schema();
        let values = vec![Value::Null, Value::Null, Value::Null];
        assert!(matches!(
            schema.validate_row(&values),
            Err(HeapError::NullConstraintViolation(_))
        ));
    }

    #[test]
    fn test_validate_wrong_arity() {
        let schema = create_test_schema();
        let values = vec![Value::Int(1)];
        assert!(matches!(
            schema.validate_row(&values),
            Err(HeapError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_validate_type_mismatch() {
        let schema = create_test_schema();
        let values = vec![
            Value::String("oops".to_string()),
            Value::Null,
            Value::Null,
        ];
        assert!(matches!(
            schema.validate_row(&values),
            Err(HeapError::TypeMismatch { .. })
        ));
    }
}
