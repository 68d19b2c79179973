//! Memtable configuration and its flat-settings surface.

use snafu::{ensure, OptionExt, ResultExt, Snafu};
use std::collections::BTreeMap;
use std::time::Duration;

/// Settings key selecting the number of rows per chunk.
pub const CHUNK_SIZE_KEY: &str = "memtable.filo.chunksize";

/// Settings key selecting the maximum age of unflushed rows.
pub const FLUSH_INTERVAL_KEY: &str = "memtable.flush.interval";

/// Default rows per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Upper bound on rows per chunk, so a row number always fits the low half
/// of a packed locator.
pub const MAX_CHUNK_SIZE: usize = 1 << 31;

#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("invalid {}: \"{}\": {}", CHUNK_SIZE_KEY, value, source))]
    InvalidChunkSize {
        value: String,
        source: std::num::ParseIntError,
    },

    #[snafu(display(
        "invalid {}: {} is outside [1, {}]",
        CHUNK_SIZE_KEY,
        value,
        MAX_CHUNK_SIZE
    ))]
    ChunkSizeOutOfRange { value: usize },

    #[snafu(display("required setting {} is missing", FLUSH_INTERVAL_KEY))]
    MissingFlushInterval,

    #[snafu(display("invalid {}: \"{}\": {}", FLUSH_INTERVAL_KEY, value, source))]
    InvalidFlushInterval {
        value: String,
        source: humantime::DurationError,
    },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Memtable tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemTableConfig {
    /// Target rows per chunk.
    pub chunk_size: usize,
    /// Maximum time a non-empty staging buffer may remain unflushed.
    pub flush_interval: Duration,
}

impl MemTableConfig {
    /// A config with the default chunk size.
    pub fn new(flush_interval: Duration) -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            flush_interval,
        }
    }

    /// Override the rows-per-chunk target.
    ///
    /// Panics when `chunk_size` is outside `[1, MAX_CHUNK_SIZE]`.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        assert!(
            (1..=MAX_CHUNK_SIZE).contains(&chunk_size),
            "chunk size {chunk_size} outside [1, {MAX_CHUNK_SIZE}]"
        );
        self.chunk_size = chunk_size;
        self
    }

    /// Build a config from a flat settings map.
    ///
    /// Recognised keys: [`CHUNK_SIZE_KEY`] (optional, default
    /// [`DEFAULT_CHUNK_SIZE`]) and [`FLUSH_INTERVAL_KEY`] (required, a
    /// humantime duration string such as `"5s"` or `"2m 30s"`).
    pub fn try_from_settings(settings: &BTreeMap<String, String>) -> Result<Self> {
        let chunk_size = match settings.get(CHUNK_SIZE_KEY) {
            Some(raw) => {
                let value: usize = raw
                    .trim()
                    .parse()
                    .context(InvalidChunkSizeSnafu { value: raw.clone() })?;
                ensure!(
                    (1..=MAX_CHUNK_SIZE).contains(&value),
                    ChunkSizeOutOfRangeSnafu { value }
                );
                value
            }
            None => DEFAULT_CHUNK_SIZE,
        };

        let raw = settings
            .get(FLUSH_INTERVAL_KEY)
            .context(MissingFlushIntervalSnafu)?;
        let flush_interval = humantime::parse_duration(raw.trim())
            .context(InvalidFlushIntervalSnafu { value: raw.clone() })?;

        Ok(Self {
            chunk_size,
            flush_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn settings(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_full_settings() {
        let config = MemTableConfig::try_from_settings(&settings(&[
            (CHUNK_SIZE_KEY, "250"),
            (FLUSH_INTERVAL_KEY, "1m 30s"),
        ]))
        .unwrap();
        assert_eq!(config.chunk_size, 250);
        assert_eq!(config.flush_interval, Duration::from_secs(90));
    }

    #[test]
    fn chunk_size_defaults() {
        let config =
            MemTableConfig::try_from_settings(&settings(&[(FLUSH_INTERVAL_KEY, "5s")])).unwrap();
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn flush_interval_is_required() {
        assert_matches!(
            MemTableConfig::try_from_settings(&settings(&[(CHUNK_SIZE_KEY, "10")])),
            Err(Error::MissingFlushInterval)
        );
    }

    #[test]
    fn rejects_bad_values() {
        assert_matches!(
            MemTableConfig::try_from_settings(&settings(&[
                (CHUNK_SIZE_KEY, "lots"),
                (FLUSH_INTERVAL_KEY, "5s"),
            ])),
            Err(Error::InvalidChunkSize { .. })
        );
        assert_matches!(
            MemTableConfig::try_from_settings(&settings(&[
                (CHUNK_SIZE_KEY, "0"),
                (FLUSH_INTERVAL_KEY, "5s"),
            ])),
            Err(Error::ChunkSizeOutOfRange { value: 0 })
        );
        assert_matches!(
            MemTableConfig::try_from_settings(&settings(&[(FLUSH_INTERVAL_KEY, "shortly")])),
            Err(Error::InvalidFlushInterval { .. })
        );
    }

    #[test]
    #[should_panic(expected = "outside [1,")]
    fn builder_rejects_zero_chunk_size() {
        let _ = MemTableConfig::new(Duration::from_secs(1)).with_chunk_size(0);
    }
}
