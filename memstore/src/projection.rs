//! Read-only description of a dataset: the column schema plus the key
//! extractors that place every row at a `(partition, segment, row key)`
//! address.

use crate::row::{LogicalType, OwnedRow, Value};
use snafu::{ensure, OptionExt, Snafu};
use std::fmt::Debug;

#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display(
        "column \"{}\" requests the {:?} encoding; only the native dense encoding is supported",
        name,
        encoding
    ))]
    SchemaIncompatible { name: String, encoding: Encoding },

    #[snafu(display("projection schema must name at least one column"))]
    EmptySchema,

    #[snafu(display("column {} out of bounds ({} columns)", column, width))]
    ColumnOutOfBounds { column: usize, width: usize },

    #[snafu(display("column {} holds {:?}, expected {:?}", column, actual, expected))]
    ColumnTypeMismatch {
        column: usize,
        actual: LogicalType,
        expected: LogicalType,
    },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Per-column storage encoding.
///
/// Only [`Encoding::Dense`] is understood by the chunk builder; schemas
/// requesting anything else are rejected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// The native dense vector encoding.
    Dense,
    /// Dictionary encoding (not supported by this builder).
    Dictionary,
    /// Run-length encoding (not supported by this builder).
    RunLength,
}

/// Name, logical type and encoding of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    name: String,
    logical_type: LogicalType,
    encoding: Encoding,
}

impl ColumnSpec {
    /// A column with the native dense encoding.
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            encoding: Encoding::Dense,
        }
    }

    /// Override the requested encoding.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// The column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The column's logical type.
    pub fn logical_type(&self) -> LogicalType {
        self.logical_type
    }

    /// The column's requested encoding.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }
}

/// Reject schemas the chunk builder cannot encode.
pub fn validate_schema(columns: &[ColumnSpec]) -> Result<()> {
    ensure!(!columns.is_empty(), EmptySchemaSnafu);
    for column in columns {
        ensure!(
            column.encoding == Encoding::Dense,
            SchemaIncompatibleSnafu {
                name: column.name.clone(),
                encoding: column.encoding,
            }
        );
    }
    Ok(())
}

/// A projection view over rows of one dataset.
///
/// The three key extractors are pure: the same row always yields the same
/// keys. The `Ord` bounds on the key types are the total orders the memtable
/// sorts by.
pub trait ProjectionView: Debug + Send + Sync + 'static {
    /// Identifies a time series.
    type PartitionKey: Ord + Clone + Debug + Send + Sync + 'static;
    /// Groups a contiguous row-key range within a partition.
    type SegmentKey: Ord + Clone + Debug + Send + Sync + 'static;
    /// Orders rows within a segment, typically a timestamp.
    type RowKey: Ord + Clone + Debug + Send + Sync + 'static;

    /// The ordered column schema.
    fn columns(&self) -> &[ColumnSpec];

    /// Extract the partition key of `row`.
    fn partition_of(&self, row: &OwnedRow) -> Result<Self::PartitionKey>;

    /// Extract the segment key of `row`.
    fn segment_of(&self, row: &OwnedRow) -> Result<Self::SegmentKey>;

    /// Extract the row key of `row`.
    fn row_key_of(&self, row: &OwnedRow) -> Result<Self::RowKey>;
}

/// A projection for the common time-series shape: a string partition column
/// and integer segment / row-key columns.
#[derive(Debug, Clone)]
pub struct SeriesProjection {
    columns: Vec<ColumnSpec>,
    partition_col: usize,
    segment_col: usize,
    row_key_col: usize,
}

impl SeriesProjection {
    /// Build a projection over `columns`, keyed by the given column
    /// ordinals.
    pub fn try_new(
        columns: Vec<ColumnSpec>,
        partition_col: usize,
        segment_col: usize,
        row_key_col: usize,
    ) -> Result<Self> {
        validate_schema(&columns)?;
        for (col, expected) in [
            (partition_col, LogicalType::Utf8),
            (segment_col, LogicalType::I64),
            (row_key_col, LogicalType::I64),
        ] {
            let spec = columns.get(col).context(ColumnOutOfBoundsSnafu {
                column: col,
                width: columns.len(),
            })?;
            ensure!(
                spec.logical_type == expected,
                ColumnTypeMismatchSnafu {
                    column: col,
                    actual: spec.logical_type,
                    expected,
                }
            );
        }
        Ok(Self {
            columns,
            partition_col,
            segment_col,
            row_key_col,
        })
    }

    fn utf8_at(row: &OwnedRow, column: usize) -> Result<String> {
        let value = row.value(column).context(ColumnOutOfBoundsSnafu {
            column,
            width: row.len(),
        })?;
        match value {
            Value::Utf8(s) => Ok(s.clone()),
            other => ColumnTypeMismatchSnafu {
                column,
                actual: other.logical_type(),
                expected: LogicalType::Utf8,
            }
            .fail(),
        }
    }

    fn i64_at(row: &OwnedRow, column: usize) -> Result<i64> {
        let value = row.value(column).context(ColumnOutOfBoundsSnafu {
            column,
            width: row.len(),
        })?;
        match value {
            Value::I64(v) => Ok(*v),
            other => ColumnTypeMismatchSnafu {
                column,
                actual: other.logical_type(),
                expected: LogicalType::I64,
            }
            .fail(),
        }
    }
}

impl ProjectionView for SeriesProjection {
    type PartitionKey = String;
    type SegmentKey = i64;
    type RowKey = i64;

    fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    fn partition_of(&self, row: &OwnedRow) -> Result<String> {
        Self::utf8_at(row, self.partition_col)
    }

    fn segment_of(&self, row: &OwnedRow) -> Result<i64> {
        Self::i64_at(row, self.segment_col)
    }

    fn row_key_of(&self, row: &OwnedRow) -> Result<i64> {
        Self::i64_at(row, self.row_key_col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn schema() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new("series", LogicalType::Utf8),
            ColumnSpec::new("bucket", LogicalType::I64),
            ColumnSpec::new("ts", LogicalType::I64),
            ColumnSpec::new("value", LogicalType::F64),
        ]
    }

    #[test]
    fn rejects_unsupported_encoding() {
        let mut columns = schema();
        columns[3] = ColumnSpec::new("value", LogicalType::F64).with_encoding(Encoding::Dictionary);

        let err = SeriesProjection::try_new(columns, 0, 1, 2).unwrap_err();
        assert_matches!(err, Error::SchemaIncompatible { name, .. } if name == "value");
    }

    #[test]
    fn rejects_empty_schema() {
        assert_matches!(
            SeriesProjection::try_new(vec![], 0, 1, 2),
            Err(Error::EmptySchema)
        );
    }

    #[test]
    fn rejects_miskeyed_schema() {
        assert_matches!(
            SeriesProjection::try_new(schema(), 3, 1, 2),
            Err(Error::ColumnTypeMismatch { column: 3, .. })
        );
        assert_matches!(
            SeriesProjection::try_new(schema(), 0, 1, 9),
            Err(Error::ColumnOutOfBounds { column: 9, .. })
        );
    }

    #[test]
    fn extracts_keys() {
        let projection = SeriesProjection::try_new(schema(), 0, 1, 2).unwrap();
        let row = OwnedRow::new(vec![
            Value::Utf8("cpu".into()),
            Value::I64(10),
            Value::I64(1234),
            Value::F64(0.5),
        ]);

        assert_eq!(projection.partition_of(&row).unwrap(), "cpu");
        assert_eq!(projection.segment_of(&row).unwrap(), 10);
        assert_eq!(projection.row_key_of(&row).unwrap(), 1234);
    }

    #[test]
    fn extractor_failure_on_malformed_row() {
        let projection = SeriesProjection::try_new(schema(), 0, 1, 2).unwrap();
        let row = OwnedRow::new(vec![Value::I64(1)]);

        assert_matches!(
            projection.partition_of(&row),
            Err(Error::ColumnTypeMismatch { column: 0, .. })
        );
        assert_matches!(
            projection.segment_of(&row),
            Err(Error::ColumnOutOfBounds { column: 1, .. })
        );
    }
}
