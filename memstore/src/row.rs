//! The row model: logical column types and owned row tuples.

/// Logical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalType {
    /// Signed 64-bit integer, also used for timestamps.
    I64,
    /// Unsigned 64-bit integer.
    U64,
    /// 64-bit float.
    F64,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    Utf8,
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed 64-bit integer.
    I64(i64),
    /// Unsigned 64-bit integer.
    U64(u64),
    /// 64-bit float.
    F64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
}

impl Value {
    /// The logical type this value inhabits.
    pub fn logical_type(&self) -> LogicalType {
        match self {
            Self::I64(_) => LogicalType::I64,
            Self::U64(_) => LogicalType::U64,
            Self::F64(_) => LogicalType::F64,
            Self::Bool(_) => LogicalType::Bool,
            Self::Utf8(_) => LogicalType::Utf8,
        }
    }

    /// The integer value, if this is an [`Value::I64`].
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// The string value, if this is a [`Value::Utf8`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Utf8(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

/// A read-only tuple of cell values, indexed by column ordinal.
///
/// Rows are consumed by value; callers may reuse their own buffers once a
/// row has been handed over.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OwnedRow(Vec<Value>);

impl OwnedRow {
    /// Wrap a vector of cell values.
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// The value at `column`, or `None` when out of bounds.
    pub fn value(&self, column: usize) -> Option<&Value> {
        self.0.get(column)
    }

    /// All cell values in column order.
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Value>> for OwnedRow {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_types() {
        assert_eq!(Value::I64(1).logical_type(), LogicalType::I64);
        assert_eq!(Value::Utf8("x".into()).logical_type(), LogicalType::Utf8);
        assert_eq!(Value::I64(7).as_i64(), Some(7));
        assert_eq!(Value::Bool(true).as_i64(), None);
        assert_eq!(Value::Utf8("x".into()).as_str(), Some("x"));
    }

    #[test]
    fn row_access() {
        let row = OwnedRow::new(vec![Value::I64(1), Value::F64(2.5)]);
        assert_eq!(row.len(), 2);
        assert_eq!(row.value(0), Some(&Value::I64(1)));
        assert_eq!(row.value(2), None);
    }
}
