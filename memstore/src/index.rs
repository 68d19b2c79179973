//! Sorted row-key index: maps every ingested `(partition, segment, row key)`
//! to the packed locator of its physical row.

use data_types::RowLocator;
use std::collections::BTreeMap;

/// Two-level ordered index.
///
/// The outer map is ordered lexicographically by `(partition, segment)`, the
/// inner maps by row key, so full scans iterate deterministically.
#[derive(Debug)]
pub struct SortedRowIndex<P, S, R> {
    segments: BTreeMap<(P, S), BTreeMap<R, RowLocator>>,
    entries: usize,
}

impl<P, S, R> Default for SortedRowIndex<P, S, R> {
    fn default() -> Self {
        Self {
            segments: BTreeMap::new(),
            entries: 0,
        }
    }
}

impl<P, S, R> SortedRowIndex<P, S, R>
where
    P: Ord + Clone,
    S: Ord + Clone,
    R: Ord + Clone,
{
    /// An empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the locator for `(partition, segment, row_key)`.
    ///
    /// Idempotent on the key triple: a later insert overwrites.
    pub fn insert(&mut self, partition: P, segment: S, row_key: R, locator: RowLocator) {
        let rows = self.segments.entry((partition, segment)).or_default();
        if rows.insert(row_key, locator).is_none() {
            self.entries += 1;
        }
    }

    /// Row keys and locators of one `(partition, segment)` pair, in row-key
    /// order.
    pub fn lookup<'a>(
        &'a self,
        partition: &P,
        segment: &S,
    ) -> impl Iterator<Item = (&'a R, RowLocator)> + 'a {
        self.segments
            .get(&(partition.clone(), segment.clone()))
            .into_iter()
            .flat_map(|rows| rows.iter().map(|(r, locator)| (r, *locator)))
    }

    /// Every locator for `partition` with a segment key in
    /// `[s_start, s_end]`: segments in segment order, row keys in row-key
    /// order within each segment.
    pub fn lookup_range<'a>(
        &'a self,
        partition: &P,
        s_start: &S,
        s_end: &S,
    ) -> impl Iterator<Item = (&'a R, RowLocator)> + 'a {
        let lo = (partition.clone(), s_start.clone());
        let hi = (partition.clone(), s_end.clone());
        self.segments
            .range(lo..=hi)
            .flat_map(|(_, rows)| rows.iter().map(|(r, locator)| (r, *locator)))
    }

    /// Every entry, in `(partition, segment)` then row-key order.
    pub fn scan_all(&self) -> impl Iterator<Item = (&P, &S, &R, RowLocator)> + '_ {
        self.segments.iter().flat_map(|((p, s), rows)| {
            rows.iter().map(move |(r, locator)| (p, s, r, *locator))
        })
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.entries
    }

    /// Whether the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.segments.clear();
        self.entries = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::ChunkId;

    fn locator(chunk: u32, row: u32) -> RowLocator {
        RowLocator::new(ChunkId::new(chunk), row)
    }

    #[test]
    fn lookup_in_row_key_order() {
        let mut index = SortedRowIndex::new();
        index.insert("p0", 1i64, 30i64, locator(0, 2));
        index.insert("p0", 1, 10, locator(0, 0));
        index.insert("p0", 1, 20, locator(0, 1));
        index.insert("p0", 2, 5, locator(1, 0));

        let keys: Vec<_> = index.lookup(&"p0", &1).map(|(r, _)| *r).collect();
        assert_eq!(keys, vec![10, 20, 30]);
        assert_eq!(index.lookup(&"p0", &9).count(), 0);
        assert_eq!(index.lookup(&"px", &1).count(), 0);
    }

    #[test]
    fn later_insert_overwrites() {
        let mut index = SortedRowIndex::new();
        index.insert("p0", 1i64, 10i64, locator(0, 0));
        index.insert("p0", 1, 10, locator(2, 7));

        assert_eq!(index.len(), 1);
        let entries: Vec<_> = index.lookup(&"p0", &1).collect();
        assert_eq!(entries, vec![(&10, locator(2, 7))]);
    }

    #[test]
    fn range_lookup_visits_segments_in_order() {
        let mut index = SortedRowIndex::new();
        index.insert("p0", 3i64, 31i64, locator(0, 3));
        index.insert("p0", 1, 11, locator(0, 0));
        index.insert("p0", 2, 22, locator(0, 1));
        index.insert("p0", 2, 21, locator(0, 2));
        index.insert("p1", 2, 99, locator(1, 0));

        let keys: Vec<_> = index.lookup_range(&"p0", &1, &2).map(|(r, _)| *r).collect();
        assert_eq!(keys, vec![11, 21, 22]);
    }

    #[test]
    fn scan_all_is_deterministic() {
        let mut index = SortedRowIndex::new();
        index.insert("p1", 1i64, 1i64, locator(0, 3));
        index.insert("p0", 2, 2, locator(0, 2));
        index.insert("p0", 1, 9, locator(0, 1));
        index.insert("p0", 1, 4, locator(0, 0));

        let entries: Vec<_> = index
            .scan_all()
            .map(|(p, s, r, _)| (*p, *s, *r))
            .collect();
        assert_eq!(
            entries,
            vec![("p0", 1, 4), ("p0", 1, 9), ("p0", 2, 2), ("p1", 1, 1)]
        );
    }

    #[test]
    fn clear_empties_the_index() {
        let mut index = SortedRowIndex::new();
        index.insert("p0", 1i64, 1i64, locator(0, 0));
        assert!(!index.is_empty());

        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.scan_all().count(), 0);
    }
}
