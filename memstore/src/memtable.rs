//! The columnar memtable: stages incoming rows, drains them into fixed-size
//! columnar chunks on a threshold or a timer, and keeps a sorted row-key
//! index over everything persisted so far.

use crate::builder::{self, ChunkBuilder};
use crate::chunk::{self, Chunk, ChunkStore, RowView};
use crate::config::MemTableConfig;
use crate::flush::FlushScheduler;
use crate::index::SortedRowIndex;
use crate::projection::{self, ProjectionView};
use crate::row::OwnedRow;
use bytes::Bytes;
use data_types::RowLocator;
use parking_lot::Mutex;
use snafu::{ResultExt, Snafu};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use strata_time::TimeProvider;
use tracing::{debug, error, info};

#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("projection extractor failed: {}", source))]
    Projection { source: projection::Error },

    #[snafu(display("chunk encoding failed: {}", source))]
    BuilderEncoding { source: builder::Error },

    #[snafu(display("chunk access failed: {}", source))]
    ChunkAccess { source: chunk::Error },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// One staged row with its extracted keys.
#[derive(Debug)]
struct Staged<V: ProjectionView> {
    row: OwnedRow,
    partition: V::PartitionKey,
    segment: V::SegmentKey,
    row_key: V::RowKey,
}

type KeyTuple<V> = (
    <V as ProjectionView>::PartitionKey,
    <V as ProjectionView>::SegmentKey,
    <V as ProjectionView>::RowKey,
);

/// A completion notification covering a staged row range.
struct PendingCallback {
    first: usize,
    last: usize,
    action: Box<dyn FnOnce() + Send>,
}

impl std::fmt::Debug for PendingCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCallback")
            .field("first", &self.first)
            .field("last", &self.last)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TimerState {
    armed: bool,
    generation: u64,
}

/// Per-shard in-memory staging structure for one projected dataset.
///
/// Rows enter through [`ingest`](Self::ingest) and are drained into columnar
/// chunks either synchronously (when a chunk's worth is pending) or by a
/// background flush timer. The partial-chunk merge keeps every chunk except
/// the newest exactly `chunk_size` rows.
///
/// The memtable is single-writer: one caller plus the flush timer. A single
/// exclusive lock serialises the two.
pub struct MemTable<V: ProjectionView> {
    inner: Arc<Inner<V>>,
}

impl<V: ProjectionView> std::fmt::Debug for MemTable<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemTable")
            .field("config", &self.inner.config)
            .field("projection", &self.inner.projection)
            .finish_non_exhaustive()
    }
}

struct Inner<V: ProjectionView> {
    projection: V,
    config: MemTableConfig,
    state: Mutex<State<V>>,
    scheduler: FlushScheduler,
}

struct State<V: ProjectionView> {
    builder: ChunkBuilder,
    chunks: ChunkStore,
    index: SortedRowIndex<V::PartitionKey, V::SegmentKey, V::RowKey>,
    temp: Vec<Staged<V>>,
    callbacks: VecDeque<PendingCallback>,
    /// Key tuples, in row order, of the tail chunk while it is sub-full.
    /// Consumed by the partial-chunk merge to rewrite index entries without
    /// re-extracting keys from re-hydrated rows.
    last_chunk_keys: Vec<KeyTuple<V>>,
    timer: TimerState,
}

impl<V: ProjectionView> MemTable<V> {
    /// Create a memtable over `projection`.
    ///
    /// Fails with [`projection::Error::SchemaIncompatible`] when the schema
    /// requests anything but the native dense encoding.
    pub fn new(
        projection: V,
        config: MemTableConfig,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        projection::validate_schema(projection.columns()).context(ProjectionSnafu)?;
        let builder = ChunkBuilder::new(projection.columns());

        let inner = Arc::new_cyclic(|weak: &Weak<Inner<V>>| {
            let weak = Weak::clone(weak);
            let on_fire = Box::new(move |generation: u64| {
                if let Some(inner) = weak.upgrade() {
                    inner.timer_fired(generation);
                }
            });
            Inner {
                projection,
                config,
                state: Mutex::new(State {
                    builder,
                    chunks: ChunkStore::new(),
                    index: SortedRowIndex::new(),
                    temp: Vec::new(),
                    callbacks: VecDeque::new(),
                    last_chunk_keys: Vec::new(),
                    timer: TimerState::default(),
                }),
                scheduler: FlushScheduler::new(time_provider, on_fire),
            }
        });

        Ok(Self { inner })
    }

    /// Stage `rows` and register `on_complete` to fire once every row of the
    /// batch has been persisted into a chunk.
    ///
    /// Performs synchronous flushes while a chunk's worth of rows is
    /// pending, and arms the flush timer when staged rows remain.
    ///
    /// `on_complete` runs under the memtable lock and must not call back
    /// into the memtable.
    pub fn ingest(
        &self,
        rows: Vec<OwnedRow>,
        on_complete: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        self.inner.ingest(rows, Box::new(on_complete))
    }

    /// Synchronously drain every staged row into chunks and disarm the flush
    /// timer.
    pub fn force_commit(&self) -> Result<()> {
        self.inner.force_commit()
    }

    /// Views of all persisted rows of one `(partition, segment)` pair, in
    /// row-key order. Staged rows are not visible.
    pub fn read_rows(
        &self,
        partition: &V::PartitionKey,
        segment: &V::SegmentKey,
    ) -> Result<Vec<RowView>> {
        self.inner.read_rows(partition, segment)
    }

    /// Like [`read_rows`](Self::read_rows) for every segment of `partition`
    /// within `[s_start, s_end]`, tagged with the row key.
    pub fn read_rows_in_range(
        &self,
        partition: &V::PartitionKey,
        s_start: &V::SegmentKey,
        s_end: &V::SegmentKey,
    ) -> Result<Vec<(V::RowKey, RowView)>> {
        self.inner.read_rows_in_range(partition, s_start, s_end)
    }

    /// Every persisted row, in `(partition, segment, row key)` order.
    pub fn read_all_rows(&self) -> Result<AllRows<V>> {
        self.inner.read_all_rows()
    }

    /// Total rows persisted into chunks. Staged rows are excluded.
    pub fn num_rows(&self) -> u64 {
        self.inner.state.lock().chunks.num_rows()
    }

    /// Rows staged but not yet flushed into a chunk.
    pub fn unflushed_rows(&self) -> usize {
        self.inner.state.lock().temp.len()
    }

    /// A point-in-time snapshot of the published chunks, for an external
    /// persister. The tail chunk is mutable-until-full (see
    /// [`crate::chunk::ChunkStore`]).
    pub fn snapshot_chunks(&self) -> Vec<Arc<Chunk>> {
        self.inner.state.lock().chunks.snapshot()
    }

    /// Drop chunks, index, staged rows and callbacks, interrupting any
    /// armed or in-flight flush timer.
    pub fn clear_all_data(&self) {
        self.inner.clear_all_data()
    }

    /// Release the background flush worker. Idempotent; also happens on
    /// drop.
    pub fn close(&self) {
        self.inner.scheduler.shutdown();
    }
}

/// Rows returned by [`MemTable::read_all_rows`].
pub type AllRows<V> = Vec<(
    <V as ProjectionView>::PartitionKey,
    <V as ProjectionView>::SegmentKey,
    <V as ProjectionView>::RowKey,
    RowView,
)>;

impl<V: ProjectionView> Inner<V> {
    fn ingest(&self, rows: Vec<OwnedRow>, on_complete: Box<dyn FnOnce() + Send>) -> Result<()> {
        let mut state = self.state.lock();

        // Extract keys up front: an extractor failure must surface here,
        // stage nothing from this batch, and leave earlier batches alone.
        let mut staged = Vec::with_capacity(rows.len());
        for row in rows {
            let partition = self.projection.partition_of(&row).context(ProjectionSnafu)?;
            let segment = self.projection.segment_of(&row).context(ProjectionSnafu)?;
            let row_key = self.projection.row_key_of(&row).context(ProjectionSnafu)?;
            staged.push(Staged {
                row,
                partition,
                segment,
                row_key,
            });
        }

        if staged.is_empty() {
            // Nothing to persist; acknowledge straight away.
            drop(state);
            on_complete();
            return Ok(());
        }

        let first = state.temp.len();
        state.temp.extend(staged);
        let last = state.temp.len() - 1;
        state.callbacks.push_back(PendingCallback {
            first,
            last,
            action: on_complete,
        });
        debug!(rows = last - first + 1, staged = state.temp.len(), "staged rows");

        while self.pending_rows(&state) >= self.config.chunk_size {
            self.flush_locked(&mut state)?;
        }

        if !state.temp.is_empty() && !state.timer.armed {
            let generation = self.scheduler.schedule(self.config.flush_interval);
            state.timer = TimerState {
                armed: true,
                generation,
            };
        }
        Ok(())
    }

    fn force_commit(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.scheduler.cancel();
        state.timer = TimerState::default();
        while !state.temp.is_empty() {
            self.flush_locked(&mut state)?;
        }
        Ok(())
    }

    fn timer_fired(&self, generation: u64) {
        let mut state = self.state.lock();
        if !state.timer.armed || state.timer.generation != generation {
            debug!(generation, "ignoring stale flush timer");
            return;
        }
        state.timer = TimerState::default();

        if let Err(error) = self.flush_locked(&mut state) {
            // No caller to surface this to; log it and leave the timer
            // unarmed until the next ingest.
            error!(%error, "timed flush failed");
            return;
        }

        if !state.temp.is_empty() {
            let generation = self.scheduler.schedule(self.config.flush_interval);
            state.timer = TimerState {
                armed: true,
                generation,
            };
        }
    }

    /// Rows the next flush could place into a single chunk: the staged rows
    /// plus whatever a sub-full tail chunk contributes via the merge.
    fn pending_rows(&self, state: &State<V>) -> usize {
        let tail = state
            .chunks
            .last()
            .map(|c| c.rows() as usize)
            .filter(|rows| *rows < self.config.chunk_size)
            .unwrap_or(0);
        tail + state.temp.len()
    }

    /// Drain up to one chunk's worth of staged rows into the store.
    ///
    /// Caller holds the state lock. Publishes exactly one chunk unless there
    /// is nothing to publish. On error every structure is restored to its
    /// pre-flush shape and no callback fires.
    fn flush_locked(&self, state: &mut State<V>) -> Result<()> {
        self.scheduler.cancel();
        state.timer = TimerState::default();
        state.builder.reset();

        let tail_is_partial = state
            .chunks
            .last()
            .map(|c| (c.rows() as usize) < self.config.chunk_size)
            .unwrap_or(false);
        if state.temp.is_empty() && !tail_is_partial {
            return Ok(());
        }

        // Partial-chunk merge: pull the sub-full tail back into the builder
        // so that every published chunk except the newest is full.
        let mut popped = None;
        let mut merged_keys = Vec::new();
        if tail_is_partial {
            let chunk = state.chunks.pop_last().context(ChunkAccessSnafu)?;
            merged_keys = std::mem::take(&mut state.last_chunk_keys);
            popped = Some(chunk);
        }

        let (columns, rows_to_add) = match self.refill_builder(state, popped.as_ref()) {
            Ok(built) => built,
            Err(e) => {
                state.builder.reset();
                if let Some(chunk) = popped {
                    state.chunks.restore(chunk);
                    state.last_chunk_keys = merged_keys;
                }
                return Err(e);
            }
        };

        let chunk_rows = state.builder.len();
        let chunk_id = state.chunks.append(columns, chunk_rows as u32);

        // Index entries: merged tail rows first, rewritten to the new chunk,
        // then the staged rows just drained.
        let mut keys = merged_keys;
        for staged in state.temp.iter().take(rows_to_add) {
            keys.push((
                staged.partition.clone(),
                staged.segment.clone(),
                staged.row_key.clone(),
            ));
        }
        for (row_no, (p, s, r)) in keys.iter().enumerate() {
            state.index.insert(
                p.clone(),
                s.clone(),
                r.clone(),
                RowLocator::new(chunk_id, row_no as u32),
            );
        }
        state.last_chunk_keys = if chunk_rows < self.config.chunk_size {
            keys
        } else {
            Vec::new()
        };

        // Fire the callbacks whose rows are now all persisted, in
        // registration order, then shift the survivors down by the rows just
        // drained.
        let mut fired = Vec::new();
        while state
            .callbacks
            .front()
            .map(|callback| callback.last < rows_to_add)
            .unwrap_or(false)
        {
            if let Some(callback) = state.callbacks.pop_front() {
                fired.push(callback.action);
            }
        }
        for callback in state.callbacks.iter_mut() {
            callback.first = callback.first.saturating_sub(rows_to_add);
            callback.last = callback.last.saturating_sub(rows_to_add);
        }
        state.temp.drain(..rows_to_add);

        debug!(
            chunk_id = chunk_id.get(),
            rows = chunk_rows,
            merged = chunk_rows - rows_to_add,
            staged_remaining = state.temp.len(),
            completions = fired.len(),
            "flushed chunk"
        );

        for action in fired {
            action();
        }
        Ok(())
    }

    /// Re-hydrate the popped tail chunk, append staged rows up to the
    /// chunk-size target, and emit the encoded columns.
    fn refill_builder(
        &self,
        state: &mut State<V>,
        popped: Option<&Arc<Chunk>>,
    ) -> Result<(Vec<Bytes>, usize)> {
        if let Some(chunk) = popped {
            let reader = chunk.reader();
            for row_no in 0..chunk.rows() {
                let row = reader
                    .position(row_no)
                    .context(ChunkAccessSnafu)?
                    .owned_row()
                    .context(ChunkAccessSnafu)?;
                state.builder.add_row(&row).context(BuilderEncodingSnafu)?;
            }
        }

        let base_length = state.builder.len();
        let rows_to_add = (self.config.chunk_size - base_length).min(state.temp.len());

        let State { builder, temp, .. } = state;
        for staged in temp.iter().take(rows_to_add) {
            builder.add_row(&staged.row).context(BuilderEncodingSnafu)?;
        }

        let columns = builder.emit().context(BuilderEncodingSnafu)?;
        Ok((columns, rows_to_add))
    }

    fn read_rows(
        &self,
        partition: &V::PartitionKey,
        segment: &V::SegmentKey,
    ) -> Result<Vec<RowView>> {
        let state = self.state.lock();
        let mut out = Vec::new();
        for (_, locator) in state.index.lookup(partition, segment) {
            out.push(Self::view(&state, locator)?);
        }
        Ok(out)
    }

    fn read_rows_in_range(
        &self,
        partition: &V::PartitionKey,
        s_start: &V::SegmentKey,
        s_end: &V::SegmentKey,
    ) -> Result<Vec<(V::RowKey, RowView)>> {
        let state = self.state.lock();
        let mut out = Vec::new();
        for (row_key, locator) in state.index.lookup_range(partition, s_start, s_end) {
            out.push((row_key.clone(), Self::view(&state, locator)?));
        }
        Ok(out)
    }

    fn read_all_rows(&self) -> Result<AllRows<V>> {
        let state = self.state.lock();
        let mut out = Vec::new();
        for (p, s, r, locator) in state.index.scan_all() {
            out.push((p.clone(), s.clone(), r.clone(), Self::view(&state, locator)?));
        }
        Ok(out)
    }

    fn view(state: &State<V>, locator: RowLocator) -> Result<RowView> {
        let chunk = state.chunks.get(locator.chunk_id()).context(ChunkAccessSnafu)?;
        chunk
            .reader()
            .position(locator.row_no())
            .context(ChunkAccessSnafu)
    }

    fn clear_all_data(&self) {
        // Interrupting cancel: even a fire already dispatched must land as
        // stale once the lock is acquired here.
        self.scheduler.cancel_interrupting();

        let mut state = self.state.lock();
        state.builder.reset();
        state.chunks.clear();
        state.index.clear();
        state.temp.clear();
        state.callbacks.clear();
        state.last_chunk_keys.clear();
        state.timer = TimerState::default();
        info!("cleared all memtable data");
    }
}
