//! The dense vector codec: the native encoding for chunk columns.
//!
//! Layout per column: one tag byte, a little-endian `u32` row count, then the
//! cell payload. Fixed-width types store one 8-byte little-endian cell per
//! row (`Bool` stores one byte). `Utf8` stores a `(rows + 1)`-entry `u32`
//! offset table followed by the concatenated string bytes, so single-cell
//! reads stay O(1).

use crate::row::{LogicalType, Value};
use bytes::{BufMut, Bytes, BytesMut};
use snafu::{ensure, ResultExt, Snafu};

const TAG_I64: u8 = 0x01;
const TAG_U64: u8 = 0x02;
const TAG_F64: u8 = 0x03;
const TAG_BOOL: u8 = 0x04;
const TAG_UTF8: u8 = 0x05;

const HEADER_LEN: usize = 5;

#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("row {} out of bounds for a vector of {} rows", row, rows))]
    RowOutOfBounds { rows: u32, row: u32 },

    #[snafu(display("unknown vector tag {:#04x}", tag))]
    UnknownTag { tag: u8 },

    #[snafu(display("vector truncated: need {} bytes, have {}", need, have))]
    Truncated { need: usize, have: usize },

    #[snafu(display("vector of {} rows exceeds the u32 row count", rows))]
    TooManyRows { rows: usize },

    #[snafu(display("string payload of {} bytes exceeds the u32 offset range", bytes))]
    PayloadTooLarge { bytes: usize },

    #[snafu(display("string cell holds invalid UTF-8: {}", source))]
    InvalidUtf8 { source: std::str::Utf8Error },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Typed column accumulator used by the chunk builder.
#[derive(Debug, Clone)]
pub(crate) enum ColumnData {
    I64(Vec<i64>),
    U64(Vec<u64>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
    Utf8(Vec<String>),
}

impl ColumnData {
    pub(crate) fn new(logical_type: LogicalType) -> Self {
        match logical_type {
            LogicalType::I64 => Self::I64(Vec::new()),
            LogicalType::U64 => Self::U64(Vec::new()),
            LogicalType::F64 => Self::F64(Vec::new()),
            LogicalType::Bool => Self::Bool(Vec::new()),
            LogicalType::Utf8 => Self::Utf8(Vec::new()),
        }
    }

    /// Append `value`, returning `false` on a type mismatch.
    pub(crate) fn push(&mut self, value: &Value) -> bool {
        match (self, value) {
            (Self::I64(vs), Value::I64(v)) => vs.push(*v),
            (Self::U64(vs), Value::U64(v)) => vs.push(*v),
            (Self::F64(vs), Value::F64(v)) => vs.push(*v),
            (Self::Bool(vs), Value::Bool(v)) => vs.push(*v),
            (Self::Utf8(vs), Value::Utf8(v)) => vs.push(v.clone()),
            _ => return false,
        }
        true
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::I64(vs) => vs.len(),
            Self::U64(vs) => vs.len(),
            Self::F64(vs) => vs.len(),
            Self::Bool(vs) => vs.len(),
            Self::Utf8(vs) => vs.len(),
        }
    }

    pub(crate) fn clear(&mut self) {
        match self {
            Self::I64(vs) => vs.clear(),
            Self::U64(vs) => vs.clear(),
            Self::F64(vs) => vs.clear(),
            Self::Bool(vs) => vs.clear(),
            Self::Utf8(vs) => vs.clear(),
        }
    }
}

/// Encode one column's accumulated cells.
pub(crate) fn encode(data: &ColumnData) -> Result<Bytes> {
    let rows = data.len();
    ensure!(rows <= u32::MAX as usize, TooManyRowsSnafu { rows });

    let buf = match data {
        ColumnData::I64(vs) => {
            let mut buf = fixed_header(TAG_I64, rows, 8);
            for v in vs {
                buf.put_i64_le(*v);
            }
            buf
        }
        ColumnData::U64(vs) => {
            let mut buf = fixed_header(TAG_U64, rows, 8);
            for v in vs {
                buf.put_u64_le(*v);
            }
            buf
        }
        ColumnData::F64(vs) => {
            let mut buf = fixed_header(TAG_F64, rows, 8);
            for v in vs {
                buf.put_f64_le(*v);
            }
            buf
        }
        ColumnData::Bool(vs) => {
            let mut buf = fixed_header(TAG_BOOL, rows, 1);
            for v in vs {
                buf.put_u8(u8::from(*v));
            }
            buf
        }
        ColumnData::Utf8(vs) => {
            let payload: usize = vs.iter().map(String::len).sum();
            ensure!(
                payload <= u32::MAX as usize,
                PayloadTooLargeSnafu { bytes: payload }
            );
            let mut buf =
                BytesMut::with_capacity(HEADER_LEN + (rows + 1) * 4 + payload);
            buf.put_u8(TAG_UTF8);
            buf.put_u32_le(rows as u32);
            let mut offset = 0u32;
            buf.put_u32_le(offset);
            for v in vs {
                offset += v.len() as u32;
                buf.put_u32_le(offset);
            }
            for v in vs {
                buf.put_slice(v.as_bytes());
            }
            buf
        }
    };

    Ok(buf.freeze())
}

fn fixed_header(tag: u8, rows: usize, cell_width: usize) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + rows * cell_width);
    buf.put_u8(tag);
    buf.put_u32_le(rows as u32);
    buf
}

/// Number of rows held by an encoded vector.
pub fn row_count(buf: &[u8]) -> Result<u32> {
    read_u32_at(buf, 1)
}

/// Decode the cell at `row`. O(1) for every supported type.
pub fn read_cell(buf: &[u8], row: u32) -> Result<Value> {
    ensure!(
        buf.len() >= HEADER_LEN,
        TruncatedSnafu {
            need: HEADER_LEN,
            have: buf.len(),
        }
    );
    let rows = row_count(buf)?;
    ensure!(row < rows, RowOutOfBoundsSnafu { rows, row });

    match buf[0] {
        TAG_I64 => Ok(Value::I64(i64::from_le_bytes(fixed_cell(buf, row)?))),
        TAG_U64 => Ok(Value::U64(u64::from_le_bytes(fixed_cell(buf, row)?))),
        TAG_F64 => Ok(Value::F64(f64::from_le_bytes(fixed_cell(buf, row)?))),
        TAG_BOOL => {
            let pos = HEADER_LEN + row as usize;
            ensure!(
                buf.len() > pos,
                TruncatedSnafu {
                    need: pos + 1,
                    have: buf.len(),
                }
            );
            Ok(Value::Bool(buf[pos] != 0))
        }
        TAG_UTF8 => {
            let start = read_u32_at(buf, HEADER_LEN + row as usize * 4)? as usize;
            let end = read_u32_at(buf, HEADER_LEN + (row as usize + 1) * 4)? as usize;
            let payload_base = HEADER_LEN + (rows as usize + 1) * 4;
            ensure!(
                buf.len() >= payload_base + end,
                TruncatedSnafu {
                    need: payload_base + end,
                    have: buf.len(),
                }
            );
            let cell = std::str::from_utf8(&buf[payload_base + start..payload_base + end])
                .context(InvalidUtf8Snafu)?;
            Ok(Value::Utf8(cell.to_owned()))
        }
        tag => UnknownTagSnafu { tag }.fail(),
    }
}

fn fixed_cell(buf: &[u8], row: u32) -> Result<[u8; 8]> {
    let pos = HEADER_LEN + row as usize * 8;
    ensure!(
        buf.len() >= pos + 8,
        TruncatedSnafu {
            need: pos + 8,
            have: buf.len(),
        }
    );
    Ok([
        buf[pos],
        buf[pos + 1],
        buf[pos + 2],
        buf[pos + 3],
        buf[pos + 4],
        buf[pos + 5],
        buf[pos + 6],
        buf[pos + 7],
    ])
}

fn read_u32_at(buf: &[u8], pos: usize) -> Result<u32> {
    ensure!(
        buf.len() >= pos + 4,
        TruncatedSnafu {
            need: pos + 4,
            have: buf.len(),
        }
    );
    Ok(u32::from_le_bytes([
        buf[pos],
        buf[pos + 1],
        buf[pos + 2],
        buf[pos + 3],
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn fixed_width_cells() {
        let buf = encode(&ColumnData::I64(vec![-1, 0, i64::MAX])).unwrap();
        assert_eq!(row_count(&buf).unwrap(), 3);
        assert_eq!(read_cell(&buf, 0).unwrap(), Value::I64(-1));
        assert_eq!(read_cell(&buf, 2).unwrap(), Value::I64(i64::MAX));

        let buf = encode(&ColumnData::F64(vec![0.25, -4.5])).unwrap();
        assert_eq!(read_cell(&buf, 1).unwrap(), Value::F64(-4.5));

        let buf = encode(&ColumnData::Bool(vec![true, false])).unwrap();
        assert_eq!(read_cell(&buf, 0).unwrap(), Value::Bool(true));
        assert_eq!(read_cell(&buf, 1).unwrap(), Value::Bool(false));
    }

    #[test]
    fn utf8_cells_via_offset_table() {
        let buf = encode(&ColumnData::Utf8(vec![
            "alpha".to_owned(),
            String::new(),
            "gamma".to_owned(),
        ]))
        .unwrap();
        assert_eq!(row_count(&buf).unwrap(), 3);
        assert_eq!(read_cell(&buf, 0).unwrap(), Value::Utf8("alpha".into()));
        assert_eq!(read_cell(&buf, 1).unwrap(), Value::Utf8(String::new()));
        assert_eq!(read_cell(&buf, 2).unwrap(), Value::Utf8("gamma".into()));
    }

    #[test]
    fn empty_vector() {
        let buf = encode(&ColumnData::U64(vec![])).unwrap();
        assert_eq!(row_count(&buf).unwrap(), 0);
        assert_matches!(read_cell(&buf, 0), Err(Error::RowOutOfBounds { .. }));
    }

    #[test]
    fn out_of_bounds_row() {
        let buf = encode(&ColumnData::I64(vec![1])).unwrap();
        assert_matches!(
            read_cell(&buf, 1),
            Err(Error::RowOutOfBounds { rows: 1, row: 1 })
        );
    }

    #[test]
    fn rejects_unknown_tag() {
        let mut raw = encode(&ColumnData::I64(vec![1])).unwrap().to_vec();
        raw[0] = 0x7f;
        assert_matches!(read_cell(&raw, 0), Err(Error::UnknownTag { tag: 0x7f }));
    }

    #[test]
    fn rejects_truncated_vector() {
        let raw = encode(&ColumnData::I64(vec![1, 2])).unwrap();
        let short = &raw[..raw.len() - 3];
        assert_matches!(read_cell(short, 1), Err(Error::Truncated { .. }));
    }

    #[test]
    fn push_type_checks() {
        let mut data = ColumnData::new(LogicalType::I64);
        assert!(data.push(&Value::I64(1)));
        assert!(!data.push(&Value::Bool(true)));
        assert_eq!(data.len(), 1);
    }
}
