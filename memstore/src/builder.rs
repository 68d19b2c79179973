//! Accumulates rows column-wise and emits encoded chunk columns.

use crate::projection::ColumnSpec;
use crate::row::{LogicalType, OwnedRow};
use crate::vectors::{self, ColumnData};
use bytes::Bytes;
use snafu::{ensure, ResultExt, Snafu};

#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("row carries {} values, schema has {} columns", actual, expected))]
    RowWidthMismatch { actual: usize, expected: usize },

    #[snafu(display(
        "column \"{}\" expects {:?}, row value holds {:?}",
        name,
        expected,
        actual
    ))]
    CellTypeMismatch {
        name: String,
        expected: LogicalType,
        actual: LogicalType,
    },

    #[snafu(display("encoding column \"{}\" failed: {}", name, source))]
    ColumnEncoding {
        name: String,
        source: vectors::Error,
    },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Builds one chunk's worth of columns, one row at a time.
///
/// The encoded output depends only on the rows added since the last
/// [`reset`](Self::reset); [`emit`](Self::emit) does not reset.
#[derive(Debug)]
pub struct ChunkBuilder {
    schema: Vec<ColumnSpec>,
    columns: Vec<ColumnData>,
    rows: usize,
}

impl ChunkBuilder {
    /// An empty builder for `schema`.
    pub fn new(schema: &[ColumnSpec]) -> Self {
        let columns = schema
            .iter()
            .map(|c| ColumnData::new(c.logical_type()))
            .collect();
        Self {
            schema: schema.to_vec(),
            columns,
            rows: 0,
        }
    }

    /// Append one row to every column.
    ///
    /// A failed append leaves the builder unchanged: the row is validated
    /// against the schema before any cell is stored.
    pub fn add_row(&mut self, row: &OwnedRow) -> Result<()> {
        ensure!(
            row.len() == self.schema.len(),
            RowWidthMismatchSnafu {
                actual: row.len(),
                expected: self.schema.len(),
            }
        );
        for (spec, value) in self.schema.iter().zip(row.values()) {
            ensure!(
                value.logical_type() == spec.logical_type(),
                CellTypeMismatchSnafu {
                    name: spec.name().to_owned(),
                    expected: spec.logical_type(),
                    actual: value.logical_type(),
                }
            );
        }

        for (column, value) in self.columns.iter_mut().zip(row.values()) {
            let pushed = column.push(value);
            debug_assert!(pushed, "cell types validated above");
        }
        self.rows += 1;
        Ok(())
    }

    /// Rows buffered since the last reset.
    pub fn len(&self) -> usize {
        self.rows
    }

    /// Whether the builder holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Discard all buffered rows.
    pub fn reset(&mut self) {
        for column in &mut self.columns {
            column.clear();
        }
        self.rows = 0;
    }

    /// Materialise the encoded vector of every column, in schema order.
    pub fn emit(&self) -> Result<Vec<Bytes>> {
        self.schema
            .iter()
            .zip(&self.columns)
            .map(|(spec, column)| {
                vectors::encode(column).context(ColumnEncodingSnafu {
                    name: spec.name().to_owned(),
                })
            })
            .collect()
    }
}
