//! Order-preserving key construction.
//!
//! Every key in the store starts with a one-byte namespace [`Tag`]; the rest
//! of the key is a concatenation of fixed-width big-endian ids and encoded
//! value tuples. Lexicographic byte order of whole keys therefore matches
//! (namespace, id..., tuple) order, which is what prefix scans rely on.

use crate::error::CodecError;
use crate::schema::TableSchema;
use crate::value::{LogicalType, Value};
use granitedb_primitives::{ColId, DatabaseId, IndexId, TableId};
use std::fmt;

/// Leading byte of every key, identifying the kind of record.
///
/// Catalog tags sort before data tags so a full-store dump lists schemas
/// before their rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    /// Database metadata, keyed by `DatabaseId`.
    CatalogDatabase = 0x01,
    /// Table schema, keyed by `DatabaseId ‖ TableId`.
    CatalogTable = 0x02,
    /// Index schema, keyed by `DatabaseId ‖ TableId ‖ IndexId`.
    CatalogIndex = 0x03,
    /// Sequence counter, keyed by an ASCII sequence name.
    Sequence = 0x04,
    /// Row data, keyed by `DatabaseId ‖ TableId ‖ RowKey`.
    Data = 0x05,
    /// Secondary-index entry, keyed by
    /// `DatabaseId ‖ TableId ‖ IndexId ‖ tuple ‖ RowKey`.
    Index = 0x06,
}

impl Tag {
    pub fn from_byte(b: u8) -> Option<Tag> {
        match b {
            0x01 => Some(Tag::CatalogDatabase),
            0x02 => Some(Tag::CatalogTable),
            0x03 => Some(Tag::CatalogIndex),
            0x04 => Some(Tag::Sequence),
            0x05 => Some(Tag::Data),
            0x06 => Some(Tag::Index),
            _ => None,
        }
    }
}

// Type bytes inside an encoded tuple. NULL is 0x00 so it sorts before every
// non-null value of the column.
const ORD_NULL: u8 = 0x00;
const ORD_BOOL: u8 = 0x01;
const ORD_INT: u8 = 0x02;
const ORD_UINT: u8 = 0x03;
const ORD_FLOAT: u8 = 0x04;
const ORD_BYTES: u8 = 0x05;
const ORD_STRING: u8 = 0x06;
const ORD_TIME: u8 = 0x07;

const SIGN_BIT: u64 = 1 << 63;

/// Appends the order-preserving encoding of `value` to `buf`.
///
/// Signed integers are widened to `i64` and unsigned to `u64` before
/// encoding, so the byte order of two encodings matches the numeric order of
/// the values regardless of declared width.
pub fn write_ordered(buf: &mut Vec<u8>, value: &Value) -> Result<(), CodecError> {
    match value {
        Value::Null => buf.push(ORD_NULL),
        Value::Bool(v) => {
            buf.push(ORD_BOOL);
            buf.push(*v as u8);
        }
        v @ (Value::I8(_) | Value::I16(_) | Value::I32(_) | Value::I64(_)) => {
            buf.push(ORD_INT);
            let raw = v.as_i64().unwrap() as u64 ^ SIGN_BIT;
            buf.extend_from_slice(&raw.to_be_bytes());
        }
        v @ (Value::U8(_) | Value::U16(_) | Value::U32(_) | Value::U64(_)) => {
            buf.push(ORD_UINT);
            buf.extend_from_slice(&v.as_u64().unwrap().to_be_bytes());
        }
        v @ (Value::F32(_) | Value::F64(_)) => {
            buf.push(ORD_FLOAT);
            let bits = v.as_f64().unwrap().to_bits();
            // Total-order trick: flip the sign bit of positives, all bits of
            // negatives, so negatives sort before positives and both sort
            // by magnitude within their sign.
            let raw = if bits & SIGN_BIT != 0 { !bits } else { bits | SIGN_BIT };
            buf.extend_from_slice(&raw.to_be_bytes());
        }
        Value::Bytes(v) => {
            buf.push(ORD_BYTES);
            write_escaped(buf, v);
        }
        Value::String(v) => {
            buf.push(ORD_STRING);
            write_escaped(buf, v.as_bytes());
        }
        Value::Timestamp(v) => {
            buf.push(ORD_TIME);
            let raw = *v as u64 ^ SIGN_BIT;
            buf.extend_from_slice(&raw.to_be_bytes());
        }
    }
    Ok(())
}

/// Reads one value of declared type `ty` from the front of `input`,
/// advancing it past the consumed bytes.
pub fn read_ordered(input: &mut &[u8], ty: &LogicalType) -> Result<Value, CodecError> {
    let tag = take_byte(input)?;
    if tag == ORD_NULL {
        return Ok(Value::Null);
    }
    let mismatch = || CodecError::TagMismatch {
        ty: ty.to_string(),
        found: tag,
    };
    match ty {
        LogicalType::Bool => {
            if tag != ORD_BOOL {
                return Err(mismatch());
            }
            match take_byte(input)? {
                0x00 => Ok(Value::Bool(false)),
                0x01 => Ok(Value::Bool(true)),
                b => Err(CodecError::UnknownTag(b)),
            }
        }
        LogicalType::I8 | LogicalType::I16 | LogicalType::I32 | LogicalType::I64 => {
            if tag != ORD_INT {
                return Err(mismatch());
            }
            let v = (take_u64(input)? ^ SIGN_BIT) as i64;
            narrow_signed(v, ty)
        }
        LogicalType::U8 | LogicalType::U16 | LogicalType::U32 | LogicalType::U64 => {
            if tag != ORD_UINT {
                return Err(mismatch());
            }
            narrow_unsigned(take_u64(input)?, ty)
        }
        LogicalType::F32 | LogicalType::F64 => {
            if tag != ORD_FLOAT {
                return Err(mismatch());
            }
            let raw = take_u64(input)?;
            let bits = if raw & SIGN_BIT != 0 { raw & !SIGN_BIT } else { !raw };
            let v = f64::from_bits(bits);
            if *ty == LogicalType::F32 {
                Ok(Value::F32(v as f32))
            } else {
                Ok(Value::F64(v))
            }
        }
        LogicalType::String | LogicalType::Varchar(_) => {
            if tag != ORD_STRING {
                return Err(mismatch());
            }
            let bytes = read_escaped(input)?;
            String::from_utf8(bytes)
                .map(Value::String)
                .map_err(|_| CodecError::Utf8)
        }
        LogicalType::Bytes => {
            if tag != ORD_BYTES {
                return Err(mismatch());
            }
            Ok(Value::Bytes(read_escaped(input)?))
        }
        LogicalType::Timestamp => {
            if tag != ORD_TIME {
                return Err(mismatch());
            }
            Ok(Value::Timestamp((take_u64(input)? ^ SIGN_BIT) as i64))
        }
    }
}

fn narrow_signed(v: i64, ty: &LogicalType) -> Result<Value, CodecError> {
    let out_of_range = || CodecError::OutOfRange(ty.to_string());
    match ty {
        LogicalType::I8 => i8::try_from(v).map(Value::I8).map_err(|_| out_of_range()),
        LogicalType::I16 => i16::try_from(v).map(Value::I16).map_err(|_| out_of_range()),
        LogicalType::I32 => i32::try_from(v).map(Value::I32).map_err(|_| out_of_range()),
        LogicalType::I64 => Ok(Value::I64(v)),
        _ => unreachable!("caller matched a signed type"),
    }
}

fn narrow_unsigned(v: u64, ty: &LogicalType) -> Result<Value, CodecError> {
    let out_of_range = || CodecError::OutOfRange(ty.to_string());
    match ty {
        LogicalType::U8 => u8::try_from(v).map(Value::U8).map_err(|_| out_of_range()),
        LogicalType::U16 => u16::try_from(v).map(Value::U16).map_err(|_| out_of_range()),
        LogicalType::U32 => u32::try_from(v).map(Value::U32).map_err(|_| out_of_range()),
        LogicalType::U64 => Ok(Value::U64(v)),
        _ => unreachable!("caller matched an unsigned type"),
    }
}

/// Raw bytes, terminated by `0x00`, internal zeros escaped as `0x00 0xFF`.
///
/// A terminated encoding keeps tuples totally ordered: a string that is a
/// strict prefix of another sorts first, because its terminator (`0x00`)
/// is smaller than any continuation the longer string can have at that
/// position.
fn write_escaped(buf: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        if b == 0x00 {
            buf.push(0x00);
            buf.push(0xFF);
        } else {
            buf.push(b);
        }
    }
    buf.push(0x00);
}

fn read_escaped(input: &mut &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    loop {
        match take_byte(input)? {
            0x00 => match input.first() {
                Some(0xFF) => {
                    *input = &input[1..];
                    out.push(0x00);
                }
                // Terminator: either end of key or the next field's type
                // byte, which is never 0xFF.
                _ => return Ok(out),
            },
            b => out.push(b),
        }
    }
}

fn take_byte(input: &mut &[u8]) -> Result<u8, CodecError> {
    let (&b, rest) = input.split_first().ok_or(CodecError::Truncated)?;
    *input = rest;
    Ok(b)
}

fn take_u64(input: &mut &[u8]) -> Result<u64, CodecError> {
    if input.len() < 8 {
        return Err(CodecError::Truncated);
    }
    let (head, rest) = input.split_at(8);
    *input = rest;
    Ok(u64::from_be_bytes(head.try_into().unwrap()))
}

/// Encodes the primary-key columns of `row` into a `RowKey`.
///
/// Fails with [`CodecError::NullKeyColumn`] if any key column is `NULL` and
/// with [`CodecError::InvalidKeyValue`] if a value does not belong to its
/// column's type. The caller is responsible for only passing rows whose
/// arity matches the schema.
pub fn encode_row_key(schema: &TableSchema, row: &[Value]) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    for col_id in &schema.primary_key {
        let (pos, col) = schema
            .column(*col_id)
            .expect("primary key refers to a column of this table");
        let value = row.get(pos).ok_or(CodecError::ArityMismatch {
            expected: schema.columns.len(),
            found: row.len(),
        })?;
        if value.is_null() {
            return Err(CodecError::NullKeyColumn);
        }
        if !col.ty.accepts(value) {
            return Err(CodecError::InvalidKeyValue {
                ty: col.ty.to_string(),
                value: value.to_string(),
            });
        }
        write_ordered(&mut buf, value)?;
    }
    Ok(buf)
}

/// Encodes the columns covered by an index into an index tuple.
///
/// Unlike primary keys, index tuples may contain `NULL`; the null sentinel
/// sorts those entries first.
pub fn encode_index_tuple(
    schema: &TableSchema,
    cols: &[ColId],
    row: &[Value],
) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    for col_id in cols {
        let (pos, col) = schema
            .column(*col_id)
            .expect("index refers to a column of this table");
        let value = row.get(pos).ok_or(CodecError::ArityMismatch {
            expected: schema.columns.len(),
            found: row.len(),
        })?;
        if !value.is_null() && !col.ty.accepts(value) {
            return Err(CodecError::InvalidKeyValue {
                ty: col.ty.to_string(),
                value: value.to_string(),
            });
        }
        write_ordered(&mut buf, value)?;
    }
    Ok(buf)
}

/// Decodes a tuple of `types.len()` values from the front of `bytes`,
/// returning the values and the number of bytes consumed.
///
/// The encoding is self-delimiting, so the remainder of `bytes` (for an
/// index-entry key, the trailing `RowKey`) is untouched.
pub fn decode_key_tuple(
    bytes: &[u8],
    types: &[LogicalType],
) -> Result<(Vec<Value>, usize), CodecError> {
    let mut input = bytes;
    let mut values = Vec::with_capacity(types.len());
    for ty in types {
        values.push(read_ordered(&mut input, ty)?);
    }
    Ok((values, bytes.len() - input.len()))
}

/// Names of the persistent monotonic counters under the [`Tag::Sequence`]
/// namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceName {
    Database,
    Table,
    Column,
    Index,
    /// Per-table synthetic row counter.
    Row(DatabaseId, TableId),
}

impl fmt::Display for SequenceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceName::Database => write!(f, "db"),
            SequenceName::Table => write!(f, "tbl"),
            SequenceName::Column => write!(f, "col"),
            SequenceName::Index => write!(f, "idx"),
            SequenceName::Row(db, tbl) => write!(f, "row:{db}:{tbl}"),
        }
    }
}

fn key_with(tag: Tag, parts: &[&[u8]]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + parts.iter().map(|p| p.len()).sum::<usize>());
    buf.push(tag as u8);
    for part in parts {
        buf.extend_from_slice(part);
    }
    buf
}

pub fn database_key(db: DatabaseId) -> Vec<u8> {
    key_with(Tag::CatalogDatabase, &[&db.to_be_bytes()])
}

pub fn database_prefix() -> Vec<u8> {
    vec![Tag::CatalogDatabase as u8]
}

pub fn table_key(db: DatabaseId, tbl: TableId) -> Vec<u8> {
    key_with(Tag::CatalogTable, &[&db.to_be_bytes(), &tbl.to_be_bytes()])
}

pub fn table_records_prefix(db: DatabaseId) -> Vec<u8> {
    key_with(Tag::CatalogTable, &[&db.to_be_bytes()])
}

pub fn all_table_records_prefix() -> Vec<u8> {
    vec![Tag::CatalogTable as u8]
}

pub fn index_record_key(db: DatabaseId, tbl: TableId, idx: IndexId) -> Vec<u8> {
    key_with(
        Tag::CatalogIndex,
        &[&db.to_be_bytes(), &tbl.to_be_bytes(), &idx.to_be_bytes()],
    )
}

pub fn index_records_prefix(db: DatabaseId, tbl: TableId) -> Vec<u8> {
    key_with(Tag::CatalogIndex, &[&db.to_be_bytes(), &tbl.to_be_bytes()])
}

pub fn index_records_db_prefix(db: DatabaseId) -> Vec<u8> {
    key_with(Tag::CatalogIndex, &[&db.to_be_bytes()])
}

pub fn all_index_records_prefix() -> Vec<u8> {
    vec![Tag::CatalogIndex as u8]
}

pub fn sequence_key(name: &SequenceName) -> Vec<u8> {
    key_with(Tag::Sequence, &[name.to_string().as_bytes()])
}

/// Prefix covering every per-table row sequence of `db`.
pub fn row_sequence_db_prefix(db: DatabaseId) -> Vec<u8> {
    key_with(Tag::Sequence, &[format!("row:{db}:").as_bytes()])
}

pub fn row_key(db: DatabaseId, tbl: TableId, row_key: &[u8]) -> Vec<u8> {
    key_with(Tag::Data, &[&db.to_be_bytes(), &tbl.to_be_bytes(), row_key])
}

pub fn data_prefix(db: DatabaseId, tbl: TableId) -> Vec<u8> {
    key_with(Tag::Data, &[&db.to_be_bytes(), &tbl.to_be_bytes()])
}

pub fn data_db_prefix(db: DatabaseId) -> Vec<u8> {
    key_with(Tag::Data, &[&db.to_be_bytes()])
}

pub fn index_entry_key(
    db: DatabaseId,
    tbl: TableId,
    idx: IndexId,
    tuple: &[u8],
    row_key: &[u8],
) -> Vec<u8> {
    key_with(
        Tag::Index,
        &[
            &db.to_be_bytes(),
            &tbl.to_be_bytes(),
            &idx.to_be_bytes(),
            tuple,
            row_key,
        ],
    )
}

pub fn index_entries_prefix(db: DatabaseId, tbl: TableId, idx: IndexId) -> Vec<u8> {
    key_with(
        Tag::Index,
        &[&db.to_be_bytes(), &tbl.to_be_bytes(), &idx.to_be_bytes()],
    )
}

/// Prefix matching the entries of one index whose tuple equals `tuple`
/// exactly; used by uniqueness probes and point lookups.
pub fn index_tuple_prefix(db: DatabaseId, tbl: TableId, idx: IndexId, tuple: &[u8]) -> Vec<u8> {
    key_with(
        Tag::Index,
        &[&db.to_be_bytes(), &tbl.to_be_bytes(), &idx.to_be_bytes(), tuple],
    )
}

pub fn index_entries_table_prefix(db: DatabaseId, tbl: TableId) -> Vec<u8> {
    key_with(Tag::Index, &[&db.to_be_bytes(), &tbl.to_be_bytes()])
}

pub fn index_entries_db_prefix(db: DatabaseId) -> Vec<u8> {
    key_with(Tag::Index, &[&db.to_be_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSchema, TableSchema};
    use granitedb_primitives::col_list;
    use pretty_assertions::assert_eq;

    fn encode_one(v: &Value) -> Vec<u8> {
        let mut buf = Vec::new();
        write_ordered(&mut buf, v).unwrap();
        buf
    }

    #[test]
    fn null_sentinel_sorts_before_everything() {
        let null = encode_one(&Value::Null);
        for v in [
            Value::Bool(false),
            Value::I64(i64::MIN),
            Value::U64(0),
            Value::F64(f64::NEG_INFINITY),
            Value::String(String::new()),
        ] {
            assert!(null < encode_one(&v), "NULL must sort before {v}");
        }
    }

    #[test]
    fn signed_integers_sort_numerically() {
        let values = [i64::MIN, -1_000_000, -1, 0, 1, 42, i64::MAX];
        let mut encoded: Vec<Vec<u8>> = values.iter().map(|v| encode_one(&Value::I64(*v))).collect();
        let sorted = encoded.clone();
        encoded.sort();
        assert_eq!(encoded, sorted);
    }

    #[test]
    fn floats_sort_by_total_order() {
        let values = [
            f64::NEG_INFINITY,
            -1.5,
            -0.0,
            0.0,
            f64::MIN_POSITIVE,
            1.5,
            f64::INFINITY,
        ];
        let encoded: Vec<Vec<u8>> = values.iter().map(|v| encode_one(&Value::F64(*v))).collect();
        for pair in encoded.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn embedded_zero_bytes_round_trip() {
        let original = Value::Bytes(vec![0x00, 0x61, 0x00, 0x00, 0x62]);
        let encoded = encode_one(&original);
        let mut input = &encoded[..];
        let decoded = read_ordered(&mut input, &LogicalType::Bytes).unwrap();
        assert_eq!(decoded, original);
        assert!(input.is_empty());
    }

    #[test]
    fn string_prefix_sorts_before_extension() {
        let a = encode_one(&Value::String("ab".into()));
        let b = encode_one(&Value::String("ab\u{0}".into()));
        let c = encode_one(&Value::String("abc".into()));
        assert!(a < b);
        assert!(b < c);
    }

    fn two_col_schema() -> TableSchema {
        TableSchema {
            id: TableId::new(1),
            database_id: DatabaseId::new(1),
            name: "t".into(),
            columns: vec![
                ColumnSchema {
                    id: ColId::new(1),
                    name: "id".into(),
                    ty: LogicalType::I32,
                    nullable: false,
                    default: None,
                },
                ColumnSchema {
                    id: ColId::new(2),
                    name: "name".into(),
                    ty: LogicalType::Varchar(16),
                    nullable: true,
                    default: None,
                },
            ],
            primary_key: col_list([ColId::new(1)]),
            options: Vec::new(),
        }
    }

    #[test]
    fn null_primary_key_is_rejected() {
        let schema = two_col_schema();
        let err = encode_row_key(&schema, &[Value::Null, Value::String("x".into())]).unwrap_err();
        assert_eq!(err, CodecError::NullKeyColumn);
    }

    #[test]
    fn index_tuple_decodes_and_leaves_row_key_suffix() {
        let schema = two_col_schema();
        let row = [Value::I32(7), Value::String("bob".into())];
        let tuple = encode_index_tuple(&schema, &[ColId::new(2)], &row).unwrap();
        let row_key = encode_row_key(&schema, &row).unwrap();

        let mut entry = tuple.clone();
        entry.extend_from_slice(&row_key);
        let (values, consumed) =
            decode_key_tuple(&entry, &[LogicalType::Varchar(16)]).unwrap();
        assert_eq!(values, vec![Value::String("bob".into())]);
        assert_eq!(&entry[consumed..], &row_key[..]);
    }

    #[test]
    fn sequence_names_render_stably() {
        assert_eq!(SequenceName::Database.to_string(), "db");
        assert_eq!(
            SequenceName::Row(DatabaseId::new(3), TableId::new(9)).to_string(),
            "row:3:9"
        );
    }
}
