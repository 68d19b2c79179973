//! Shared data types used across the strata ingestion and query crates.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// Unique ID for a chunk within a single chunk store.
///
/// Ids are dense: a chunk's id equals its position in the store at the time
/// it was appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId(u32);

impl ChunkId {
    /// Wrap a raw chunk id.
    pub fn new(v: u32) -> Self {
        Self(v)
    }

    /// The raw chunk id.
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl Display for ChunkId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical location of a row: chunk id in the high 32 bits, row number
/// within the chunk in the low 32 bits.
///
/// The packed form keeps per-row index entries at a single machine word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowLocator(u64);

impl RowLocator {
    /// Pack a `(chunk id, row number)` pair.
    pub fn new(chunk_id: ChunkId, row_no: u32) -> Self {
        Self((u64::from(chunk_id.get()) << 32) | u64::from(row_no))
    }

    /// The chunk the row lives in.
    pub fn chunk_id(&self) -> ChunkId {
        ChunkId::new((self.0 >> 32) as u32)
    }

    /// The row number within the chunk.
    pub fn row_no(&self) -> u32 {
        self.0 as u32
    }

    /// The raw packed value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl Display for RowLocator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chunk_id(), self.row_no())
    }
}

/// An ordered label map keying a range vector.
///
/// Labels iterate in key order so that equal label sets compare and hash
/// identically regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    /// An empty label set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a label set from `(name, value)` pairs. Later duplicates win.
    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        )
    }

    /// Look up a label value by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Whether the label `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Insert a label, replacing any existing value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Iterate labels in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the label set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for Labels {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}=\"{}\"", name, value)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_round_trip() {
        let loc = RowLocator::new(ChunkId::new(7), 42);
        assert_eq!(loc.chunk_id(), ChunkId::new(7));
        assert_eq!(loc.row_no(), 42);
        assert_eq!(loc.get(), (7u64 << 32) | 42);
    }

    #[test]
    fn locator_extremes() {
        let loc = RowLocator::new(ChunkId::new(u32::MAX), u32::MAX);
        assert_eq!(loc.chunk_id().get(), u32::MAX);
        assert_eq!(loc.row_no(), u32::MAX);

        let zero = RowLocator::new(ChunkId::new(0), 0);
        assert_eq!(zero.get(), 0);
    }

    #[test]
    fn locator_ordering_tracks_chunk_then_row() {
        let a = RowLocator::new(ChunkId::new(0), 999);
        let b = RowLocator::new(ChunkId::new(1), 0);
        assert!(a < b);
    }

    #[test]
    fn labels_order_insensitive() {
        let a = Labels::from_pairs([("b", "2"), ("a", "1")]);
        let b = Labels::from_pairs([("a", "1"), ("b", "2")]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), r#"{a="1", b="2"}"#);
    }

    #[test]
    fn labels_lookup() {
        let l = Labels::from_pairs([("job", "api"), ("instance", "i-1")]);
        assert_eq!(l.get("job"), Some("api"));
        assert_eq!(l.get("missing"), None);
        assert!(l.contains("instance"));
        assert_eq!(l.len(), 2);
    }
}
