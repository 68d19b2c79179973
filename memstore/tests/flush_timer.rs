//! End-to-end exercise of the timed flush path: low-rate ingest makes
//! progress on the flush timer alone, and the partial-chunk merge keeps the
//! chunk sequence dense.

use memstore::projection::{ColumnSpec, SeriesProjection};
use memstore::row::{LogicalType, OwnedRow, Value};
use memstore::{MemTable, MemTableConfig};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use strata_time::{MockProvider, Time, TimeProvider};

fn projection() -> SeriesProjection {
    SeriesProjection::try_new(
        vec![
            ColumnSpec::new("series", LogicalType::Utf8),
            ColumnSpec::new("bucket", LogicalType::I64),
            ColumnSpec::new("ts", LogicalType::I64),
            ColumnSpec::new("value", LogicalType::F64),
        ],
        0,
        1,
        2,
    )
    .unwrap()
}

fn row(ts: i64) -> OwnedRow {
    OwnedRow::new(vec![
        Value::Utf8("p0".to_owned()),
        Value::I64(0),
        Value::I64(ts),
        Value::F64(ts as f64),
    ])
}

/// Poll `condition` for up to five seconds of wall-clock time.
fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn timer_flushes_staged_rows() {
    let time = Arc::new(MockProvider::new(Time::from_timestamp_nanos(0)));
    let config = BTreeMap::from([
        ("memtable.filo.chunksize".to_owned(), "3".to_owned()),
        ("memtable.flush.interval".to_owned(), "1h".to_owned()),
    ]);
    let config = MemTableConfig::try_from_settings(&config).unwrap();
    let table = MemTable::new(
        projection(),
        config,
        Arc::clone(&time) as Arc<dyn TimeProvider>,
    )
    .unwrap();

    table.ingest(vec![row(1), row(2)], || {}).unwrap();
    assert_eq!(table.num_rows(), 0);
    assert_eq!(table.unflushed_rows(), 2);

    // nothing happens while the provider clock stands still
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(table.num_rows(), 0);

    // the deadline passes: the timer drains the staged rows into a partial
    // chunk
    time.inc(Duration::from_secs(2 * 60 * 60));
    assert!(wait_until(|| table.num_rows() == 2));
    assert_eq!(table.unflushed_rows(), 0);

    let chunks = table.snapshot_chunks();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].rows(), 2);

    // the next ingest merges the partial chunk: {1, 2} is popped, refilled
    // with row 3 and re-published under the same id
    table.ingest(vec![row(3), row(4)], || {}).unwrap();
    let chunks = table.snapshot_chunks();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].id().get(), 0);
    assert_eq!(chunks[0].rows(), 3);
    assert_eq!(table.unflushed_rows(), 1);

    // index entries for the merged rows point at the refilled chunk
    let views = table.read_rows(&"p0".to_owned(), &0).unwrap();
    let keys: Vec<_> = views
        .iter()
        .map(|v| v.value(2).unwrap().as_i64().unwrap())
        .collect();
    assert_eq!(keys, vec![1, 2, 3]);
    assert_eq!(views[0].chunk_id().get(), 0);
    assert_eq!(views[0].row_no(), 0);

    // the remaining staged row flushes on the re-armed timer
    time.inc(Duration::from_secs(2 * 60 * 60));
    assert!(wait_until(|| table.num_rows() == 4));

    table.close();
}

#[test]
fn clear_interrupts_an_armed_timer() {
    let time = Arc::new(MockProvider::new(Time::from_timestamp_nanos(0)));
    let table = MemTable::new(
        projection(),
        MemTableConfig::new(Duration::from_secs(60)).with_chunk_size(3),
        Arc::clone(&time) as Arc<dyn TimeProvider>,
    )
    .unwrap();

    table.ingest(vec![row(1)], || {}).unwrap();
    table.clear_all_data();

    // even with the deadline long past, the cancelled timer must not
    // resurrect cleared rows
    time.inc(Duration::from_secs(600));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(table.num_rows(), 0);
    assert_eq!(table.unflushed_rows(), 0);

    // ingest after clear behaves like a fresh table
    table.ingest(vec![row(5), row(6), row(7)], || {}).unwrap();
    assert_eq!(table.num_rows(), 3);
    table.close();
}
