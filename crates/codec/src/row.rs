//! Row payload serialization.
//!
//! Unlike the key encoding this format is not order-preserving; it only has
//! to round-trip exactly and be self-describing enough to catch a row whose
//! shape does not match the schema it is decoded under. Layout: a `u16`
//! column count, then per column a one-byte type tag and a fixed-width or
//! `u32`-length-prefixed body.

use crate::error::CodecError;
use crate::schema::TableSchema;
use crate::value::{LogicalType, Value};

const PAY_NULL: u8 = 0x00;
const PAY_BOOL: u8 = 0x01;
const PAY_I8: u8 = 0x02;
const PAY_I16: u8 = 0x03;
const PAY_I32: u8 = 0x04;
const PAY_I64: u8 = 0x05;
const PAY_U8: u8 = 0x06;
const PAY_U16: u8 = 0x07;
const PAY_U32: u8 = 0x08;
const PAY_U64: u8 = 0x09;
const PAY_F32: u8 = 0x0a;
const PAY_F64: u8 = 0x0b;
const PAY_STRING: u8 = 0x0c;
const PAY_BYTES: u8 = 0x0d;
const PAY_TIME: u8 = 0x0e;

fn expected_tag(ty: &LogicalType) -> u8 {
    match ty {
        LogicalType::Bool => PAY_BOOL,
        LogicalType::I8 => PAY_I8,
        LogicalType::I16 => PAY_I16,
        LogicalType::I32 => PAY_I32,
        LogicalType::I64 => PAY_I64,
        LogicalType::U8 => PAY_U8,
        LogicalType::U16 => PAY_U16,
        LogicalType::U32 => PAY_U32,
        LogicalType::U64 => PAY_U64,
        LogicalType::F32 => PAY_F32,
        LogicalType::F64 => PAY_F64,
        LogicalType::String | LogicalType::Varchar(_) => PAY_STRING,
        LogicalType::Bytes => PAY_BYTES,
        LogicalType::Timestamp => PAY_TIME,
    }
}

/// Appends the encoding of a single value to `buf`.
pub fn write_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.push(PAY_NULL),
        Value::Bool(v) => {
            buf.push(PAY_BOOL);
            buf.push(*v as u8);
        }
        Value::I8(v) => {
            buf.push(PAY_I8);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        Value::I16(v) => {
            buf.push(PAY_I16);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        Value::I32(v) => {
            buf.push(PAY_I32);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        Value::I64(v) => {
            buf.push(PAY_I64);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        Value::U8(v) => {
            buf.push(PAY_U8);
            buf.push(*v);
        }
        Value::U16(v) => {
            buf.push(PAY_U16);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        Value::U32(v) => {
            buf.push(PAY_U32);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        Value::U64(v) => {
            buf.push(PAY_U64);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        Value::F32(v) => {
            buf.push(PAY_F32);
            buf.extend_from_slice(&v.to_bits().to_be_bytes());
        }
        Value::F64(v) => {
            buf.push(PAY_F64);
            buf.extend_from_slice(&v.to_bits().to_be_bytes());
        }
        Value::String(v) => {
            buf.push(PAY_STRING);
            write_len_prefixed(buf, v.as_bytes());
        }
        Value::Bytes(v) => {
            buf.push(PAY_BYTES);
            write_len_prefixed(buf, v);
        }
        Value::Timestamp(v) => {
            buf.push(PAY_TIME);
            buf.extend_from_slice(&v.to_be_bytes());
        }
    }
}

/// Reads a single value from the front of `input`, without reference to a
/// schema; width information comes from the tag alone.
pub fn read_value(input: &mut &[u8]) -> Result<Value, CodecError> {
    let tag = take_byte(input)?;
    Ok(match tag {
        PAY_NULL => Value::Null,
        PAY_BOOL => match take_byte(input)? {
            0x00 => Value::Bool(false),
            0x01 => Value::Bool(true),
            b => return Err(CodecError::UnknownTag(b)),
        },
        PAY_I8 => Value::I8(take_byte(input)? as i8),
        PAY_I16 => Value::I16(i16::from_be_bytes(take_array(input)?)),
        PAY_I32 => Value::I32(i32::from_be_bytes(take_array(input)?)),
        PAY_I64 => Value::I64(i64::from_be_bytes(take_array(input)?)),
        PAY_U8 => Value::U8(take_byte(input)?),
        PAY_U16 => Value::U16(u16::from_be_bytes(take_array(input)?)),
        PAY_U32 => Value::U32(u32::from_be_bytes(take_array(input)?)),
        PAY_U64 => Value::U64(u64::from_be_bytes(take_array(input)?)),
        PAY_F32 => Value::F32(f32::from_bits(u32::from_be_bytes(take_array(input)?))),
        PAY_F64 => Value::F64(f64::from_bits(u64::from_be_bytes(take_array(input)?))),
        PAY_STRING => {
            let bytes = read_len_prefixed(input)?;
            Value::String(String::from_utf8(bytes).map_err(|_| CodecError::Utf8)?)
        }
        PAY_BYTES => Value::Bytes(read_len_prefixed(input)?),
        PAY_TIME => Value::Timestamp(i64::from_be_bytes(take_array(input)?)),
        other => return Err(CodecError::UnknownTag(other)),
    })
}

/// Encodes `row` in schema column order.
pub fn encode_row(schema: &TableSchema, row: &[Value]) -> Result<Vec<u8>, CodecError> {
    if row.len() != schema.columns.len() {
        return Err(CodecError::ArityMismatch {
            expected: schema.columns.len(),
            found: row.len(),
        });
    }
    let mut buf = Vec::new();
    buf.extend_from_slice(&(row.len() as u16).to_be_bytes());
    for value in row {
        write_value(&mut buf, value);
    }
    Ok(buf)
}

/// Decodes a row written by [`encode_row`], checking its shape against
/// `schema`: the arity must match and every non-null column tag must agree
/// with the declared column type.
pub fn decode_row(schema: &TableSchema, bytes: &[u8]) -> Result<Vec<Value>, CodecError> {
    let mut input = bytes;
    let count = u16::from_be_bytes(take_array(&mut input)?) as usize;
    if count != schema.columns.len() {
        return Err(CodecError::ArityMismatch {
            expected: schema.columns.len(),
            found: count,
        });
    }
    let mut row = Vec::with_capacity(count);
    for col in &schema.columns {
        let tag = input.first().copied().ok_or(CodecError::Truncated)?;
        if tag != PAY_NULL && tag != expected_tag(&col.ty) {
            return Err(CodecError::TagMismatch {
                ty: col.ty.to_string(),
                found: tag,
            });
        }
        row.push(read_value(&mut input)?);
    }
    if !input.is_empty() {
        return Err(CodecError::TrailingBytes(input.len()));
    }
    Ok(row)
}

fn write_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn read_len_prefixed(input: &mut &[u8]) -> Result<Vec<u8>, CodecError> {
    let len = u32::from_be_bytes(take_array(input)?) as usize;
    if input.len() < len {
        return Err(CodecError::Truncated);
    }
    let (head, rest) = input.split_at(len);
    *input = rest;
    Ok(head.to_vec())
}

fn take_byte(input: &mut &[u8]) -> Result<u8, CodecError> {
    let (&b, rest) = input.split_first().ok_or(CodecError::Truncated)?;
    *input = rest;
    Ok(b)
}

fn take_array<const N: usize>(input: &mut &[u8]) -> Result<[u8; N], CodecError> {
    if input.len() < N {
        return Err(CodecError::Truncated);
    }
    let (head, rest) = input.split_at(N);
    *input = rest;
    Ok(head.try_into().unwrap())
}
