//! Immutable columnar chunks and the append-only chunk store.

use crate::row::{OwnedRow, Value};
use crate::vectors;
use bytes::Bytes;
use data_types::ChunkId;
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use std::sync::Arc;

#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("cannot pop a chunk from an empty store"))]
    EmptyStore,

    #[snafu(display("no chunk with id {}", chunk_id))]
    ChunkNotFound { chunk_id: ChunkId },

    #[snafu(display("chunk {}: row {} out of bounds ({} rows)", chunk_id, row, rows))]
    RowOutOfBounds { chunk_id: ChunkId, row: u32, rows: u32 },

    #[snafu(display(
        "chunk {}: column {} out of bounds ({} columns)",
        chunk_id,
        column,
        columns
    ))]
    ColumnOutOfBounds {
        chunk_id: ChunkId,
        column: usize,
        columns: usize,
    },

    #[snafu(display("chunk {} column {}: {}", chunk_id, column, source))]
    ColumnDecode {
        chunk_id: ChunkId,
        column: usize,
        source: vectors::Error,
    },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A fixed-count block of encoded column vectors.
///
/// Chunks are immutable once published, with one exception: the most recent
/// chunk of a store may be popped while sub-full, refilled, and re-published
/// under the same id (see [`ChunkStore::pop_last`]).
#[derive(Debug, Clone)]
pub struct Chunk {
    id: ChunkId,
    columns: Vec<Bytes>,
    rows: u32,
}

impl Chunk {
    fn new(id: ChunkId, columns: Vec<Bytes>, rows: u32) -> Self {
        Self { id, columns, rows }
    }

    /// This chunk's id.
    pub fn id(&self) -> ChunkId {
        self.id
    }

    /// Number of rows held.
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// The encoded column vectors, in schema order.
    pub fn columns(&self) -> &[Bytes] {
        &self.columns
    }

    /// A cheap random-access reader over this chunk.
    pub fn reader(self: &Arc<Self>) -> ChunkReader {
        ChunkReader {
            chunk: Arc::clone(self),
        }
    }

    /// Estimated heap footprint of the encoded columns.
    pub fn size(&self) -> usize {
        std::mem::size_of::<Self>() + self.columns.iter().map(Bytes::len).sum::<usize>()
    }
}

/// Random-access reader over one chunk. Positioning is O(1).
#[derive(Debug, Clone)]
pub struct ChunkReader {
    chunk: Arc<Chunk>,
}

impl ChunkReader {
    /// A view of row `row`.
    pub fn position(&self, row: u32) -> Result<RowView> {
        ensure!(
            row < self.chunk.rows,
            RowOutOfBoundsSnafu {
                chunk_id: self.chunk.id,
                row,
                rows: self.chunk.rows,
            }
        );
        Ok(RowView {
            chunk: Arc::clone(&self.chunk),
            row,
        })
    }
}

/// A lazily-decoded view of a single row: cells decode on demand, in O(1)
/// per cell.
#[derive(Debug, Clone)]
pub struct RowView {
    chunk: Arc<Chunk>,
    row: u32,
}

impl RowView {
    /// The chunk this view points into.
    pub fn chunk_id(&self) -> ChunkId {
        self.chunk.id
    }

    /// The row number within the chunk.
    pub fn row_no(&self) -> u32 {
        self.row
    }

    /// Decode the cell at `column`.
    pub fn value(&self, column: usize) -> Result<Value> {
        let buf = self
            .chunk
            .columns
            .get(column)
            .context(ColumnOutOfBoundsSnafu {
                chunk_id: self.chunk.id,
                column,
                columns: self.chunk.columns.len(),
            })?;
        vectors::read_cell(buf, self.row).context(ColumnDecodeSnafu {
            chunk_id: self.chunk.id,
            column,
        })
    }

    /// Decode every cell into an owned row.
    pub fn owned_row(&self) -> Result<OwnedRow> {
        (0..self.chunk.columns.len())
            .map(|column| self.value(column))
            .collect::<Result<Vec<_>>>()
            .map(OwnedRow::new)
    }
}

/// Append-only container of published chunks.
///
/// Chunk ids are dense and equal the chunk's position in the store. The
/// partial-chunk merge pops the sub-full tail and re-publishes the refilled
/// block under the same id, so downstream observers must treat the tail
/// chunk as mutable-until-full; every earlier chunk is immutable.
#[derive(Debug, Default)]
pub struct ChunkStore {
    chunks: Vec<Arc<Chunk>>,
}

impl ChunkStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new chunk, returning its id.
    pub fn append(&mut self, columns: Vec<Bytes>, rows: u32) -> ChunkId {
        let id = ChunkId::new(self.chunks.len() as u32);
        self.chunks.push(Arc::new(Chunk::new(id, columns, rows)));
        id
    }

    /// Remove and return the most recent chunk.
    pub fn pop_last(&mut self) -> Result<Arc<Chunk>> {
        self.chunks.pop().context(EmptyStoreSnafu)
    }

    /// Re-publish a chunk previously removed with [`pop_last`](Self::pop_last)
    /// without rebuilding it, e.g. when a merge is abandoned.
    pub(crate) fn restore(&mut self, chunk: Arc<Chunk>) {
        debug_assert_eq!(chunk.id().get() as usize, self.chunks.len());
        self.chunks.push(chunk);
    }

    /// The chunk with the given id.
    pub fn get(&self, id: ChunkId) -> Result<Arc<Chunk>> {
        self.chunks
            .get(id.get() as usize)
            .map(Arc::clone)
            .context(ChunkNotFoundSnafu { chunk_id: id })
    }

    /// A reader over the chunk with the given id.
    pub fn reader(&self, id: ChunkId) -> Result<ChunkReader> {
        Ok(self.get(id)?.reader())
    }

    /// The most recent chunk, if any.
    pub fn last(&self) -> Option<&Arc<Chunk>> {
        self.chunks.last()
    }

    /// Number of published chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the store holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total rows across all chunks.
    pub fn num_rows(&self) -> u64 {
        self.chunks.iter().map(|c| u64::from(c.rows())).sum()
    }

    /// Drop every chunk.
    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    /// A point-in-time snapshot of all chunks, for an external persister.
    pub fn snapshot(&self) -> Vec<Arc<Chunk>> {
        self.chunks.iter().map(Arc::clone).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::LogicalType;
    use crate::vectors::ColumnData;
    use assert_matches::assert_matches;

    fn i64_column(values: Vec<i64>) -> Bytes {
        vectors::encode(&ColumnData::I64(values)).unwrap()
    }

    #[test]
    fn append_assigns_dense_ids() {
        let mut store = ChunkStore::new();
        assert_eq!(store.append(vec![i64_column(vec![1, 2])], 2).get(), 0);
        assert_eq!(store.append(vec![i64_column(vec![3])], 1).get(), 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.num_rows(), 3);
    }

    #[test]
    fn pop_and_reappend_reuses_the_tail_id() {
        let mut store = ChunkStore::new();
        store.append(vec![i64_column(vec![1, 2, 3])], 3);
        store.append(vec![i64_column(vec![4])], 1);

        let popped = store.pop_last().unwrap();
        assert_eq!(popped.id().get(), 1);
        assert_eq!(store.len(), 1);

        let id = store.append(vec![i64_column(vec![4, 5])], 2);
        assert_eq!(id.get(), 1);
        assert_eq!(store.num_rows(), 5);
    }

    #[test]
    fn pop_empty_store_fails() {
        let mut store = ChunkStore::new();
        assert_matches!(store.pop_last(), Err(Error::EmptyStore));
    }

    #[test]
    fn reader_positions_rows() {
        let mut store = ChunkStore::new();
        let id = store.append(vec![i64_column(vec![10, 20, 30])], 3);

        let reader = store.reader(id).unwrap();
        let view = reader.position(1).unwrap();
        assert_eq!(view.value(0).unwrap(), Value::I64(20));
        assert_eq!(view.chunk_id(), id);
        assert_eq!(view.row_no(), 1);

        assert_matches!(
            reader.position(3),
            Err(Error::RowOutOfBounds { row: 3, rows: 3, .. })
        );
    }

    #[test]
    fn row_view_decodes_whole_rows() {
        let mut store = ChunkStore::new();
        let host = vectors::encode(&{
            let mut c = ColumnData::new(LogicalType::Utf8);
            c.push(&Value::Utf8("a".into()));
            c.push(&Value::Utf8("b".into()));
            c
        })
        .unwrap();
        let id = store.append(vec![i64_column(vec![1, 2]), host], 2);

        let row = store.reader(id).unwrap().position(1).unwrap();
        assert_eq!(
            row.owned_row().unwrap(),
            OwnedRow::new(vec![Value::I64(2), Value::Utf8("b".into())])
        );
        assert_matches!(row.value(2), Err(Error::ColumnOutOfBounds { column: 2, .. }));
    }

    #[test]
    fn snapshot_is_point_in_time() {
        let mut store = ChunkStore::new();
        store.append(vec![i64_column(vec![1])], 1);
        let snapshot = store.snapshot();

        store.clear();
        assert!(store.is_empty());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].rows(), 1);
    }
}
