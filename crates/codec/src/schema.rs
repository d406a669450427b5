//! Catalog record types and their binary encoding.
//!
//! `*Def` types are caller input to DDL; the catalog turns them into `*Schema`
//! records by minting ids. One binary encoding is shared by every catalog
//! implementation, so records written by one can always be read by another.

use crate::error::CodecError;
use crate::row::{read_value, write_value};
use crate::value::{LogicalType, Value};
use granitedb_primitives::{ColId, ColList, DatabaseId, IndexId, TableId};

/// Metadata for one logical database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseMeta {
    pub id: DatabaseId,
    pub name: String,
    pub properties: Vec<(String, String)>,
}

/// One column of a stored table schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub id: ColId,
    pub name: String,
    pub ty: LogicalType,
    pub nullable: bool,
    pub default: Option<Value>,
}

/// A stored table schema. Column ordinal defines storage order in encoded
/// rows; the primary key is a list of column ids, empty when the table uses
/// synthetic row ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub id: TableId,
    pub database_id: DatabaseId,
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    pub primary_key: ColList,
    pub options: Vec<(String, String)>,
}

impl TableSchema {
    /// Looks a column up by id, returning its ordinal and definition.
    pub fn column(&self, id: ColId) -> Option<(usize, &ColumnSchema)> {
        self.columns
            .iter()
            .enumerate()
            .find(|(_, c)| c.id == id)
            .map(|(i, c)| (i, c))
    }

    pub fn column_by_name(&self, name: &str) -> Option<(usize, &ColumnSchema)> {
        self.columns
            .iter()
            .enumerate()
            .find(|(_, c)| c.name == name)
            .map(|(i, c)| (i, c))
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Declared types of the primary-key columns, in key order.
    pub fn primary_key_types(&self) -> Vec<LogicalType> {
        self.primary_key
            .iter()
            .map(|id| {
                self.column(*id)
                    .expect("primary key refers to a column of this table")
                    .1
                    .ty
                    .clone()
            })
            .collect()
    }
}

/// A stored secondary-index schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub id: IndexId,
    pub table_id: TableId,
    pub name: String,
    pub columns: ColList,
    pub unique: bool,
    pub clustered: bool,
}

/// Caller input for `create_table`; columns are referenced by name because
/// ids do not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    pub options: Vec<(String, String)>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            options: Vec::new(),
        }
    }

    pub fn with_column(mut self, col: ColumnDef) -> Self {
        self.columns.push(col);
        self
    }

    pub fn with_primary_key(mut self, cols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.primary_key = cols.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: LogicalType,
    pub nullable: bool,
    pub default: Option<Value>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: LogicalType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Caller input for `create_index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub clustered: bool,
}

impl IndexDef {
    pub fn new(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
            clustered: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

// --- record encoding -------------------------------------------------------

const TYPE_BOOL: u8 = 0x01;
const TYPE_I8: u8 = 0x02;
const TYPE_I16: u8 = 0x03;
const TYPE_I32: u8 = 0x04;
const TYPE_I64: u8 = 0x05;
const TYPE_U8: u8 = 0x06;
const TYPE_U16: u8 = 0x07;
const TYPE_U32: u8 = 0x08;
const TYPE_U64: u8 = 0x09;
const TYPE_F32: u8 = 0x0a;
const TYPE_F64: u8 = 0x0b;
const TYPE_STRING: u8 = 0x0c;
const TYPE_VARCHAR: u8 = 0x0d;
const TYPE_BYTES: u8 = 0x0e;
const TYPE_TIME: u8 = 0x0f;

fn write_type(buf: &mut Vec<u8>, ty: &LogicalType) {
    match ty {
        LogicalType::Bool => buf.push(TYPE_BOOL),
        LogicalType::I8 => buf.push(TYPE_I8),
        LogicalType::I16 => buf.push(TYPE_I16),
        LogicalType::I32 => buf.push(TYPE_I32),
        LogicalType::I64 => buf.push(TYPE_I64),
        LogicalType::U8 => buf.push(TYPE_U8),
        LogicalType::U16 => buf.push(TYPE_U16),
        LogicalType::U32 => buf.push(TYPE_U32),
        LogicalType::U64 => buf.push(TYPE_U64),
        LogicalType::F32 => buf.push(TYPE_F32),
        LogicalType::F64 => buf.push(TYPE_F64),
        LogicalType::String => buf.push(TYPE_STRING),
        LogicalType::Varchar(n) => {
            buf.push(TYPE_VARCHAR);
            buf.extend_from_slice(&n.to_be_bytes());
        }
        LogicalType::Bytes => buf.push(TYPE_BYTES),
        LogicalType::Timestamp => buf.push(TYPE_TIME),
    }
}

fn read_type(input: &mut &[u8]) -> Result<LogicalType, CodecError> {
    Ok(match take_byte(input)? {
        TYPE_BOOL => LogicalType::Bool,
        TYPE_I8 => LogicalType::I8,
        TYPE_I16 => LogicalType::I16,
        TYPE_I32 => LogicalType::I32,
        TYPE_I64 => LogicalType::I64,
        TYPE_U8 => LogicalType::U8,
        TYPE_U16 => LogicalType::U16,
        TYPE_U32 => LogicalType::U32,
        TYPE_U64 => LogicalType::U64,
        TYPE_F32 => LogicalType::F32,
        TYPE_F64 => LogicalType::F64,
        TYPE_STRING => LogicalType::String,
        TYPE_VARCHAR => LogicalType::Varchar(u32::from_be_bytes(take_array(input)?)),
        TYPE_BYTES => LogicalType::Bytes,
        TYPE_TIME => LogicalType::Timestamp,
        other => return Err(CodecError::UnknownTag(other)),
    })
}

impl DatabaseMeta {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.id.to_be_bytes());
        write_str(&mut buf, &self.name);
        write_pairs(&mut buf, &self.properties);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut input = bytes;
        let meta = DatabaseMeta {
            id: DatabaseId::from_be_bytes(take_array(&mut input)?),
            name: read_str(&mut input)?,
            properties: read_pairs(&mut input)?,
        };
        expect_empty(input)?;
        Ok(meta)
    }
}

impl TableSchema {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.id.to_be_bytes());
        buf.extend_from_slice(&self.database_id.to_be_bytes());
        write_str(&mut buf, &self.name);
        buf.extend_from_slice(&(self.columns.len() as u16).to_be_bytes());
        for col in &self.columns {
            buf.extend_from_slice(&col.id.to_be_bytes());
            write_str(&mut buf, &col.name);
            write_type(&mut buf, &col.ty);
            buf.push(col.nullable as u8);
            match &col.default {
                Some(value) => {
                    buf.push(0x01);
                    write_value(&mut buf, value);
                }
                None => buf.push(0x00),
            }
        }
        buf.extend_from_slice(&(self.primary_key.len() as u16).to_be_bytes());
        for col_id in &self.primary_key {
            buf.extend_from_slice(&col_id.to_be_bytes());
        }
        write_pairs(&mut buf, &self.options);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut input = bytes;
        let id = TableId::from_be_bytes(take_array(&mut input)?);
        let database_id = DatabaseId::from_be_bytes(take_array(&mut input)?);
        let name = read_str(&mut input)?;
        let ncols = u16::from_be_bytes(take_array(&mut input)?) as usize;
        let mut columns = Vec::with_capacity(ncols);
        for _ in 0..ncols {
            let col_id = ColId::from_be_bytes(take_array(&mut input)?);
            let col_name = read_str(&mut input)?;
            let ty = read_type(&mut input)?;
            let nullable = take_byte(&mut input)? != 0;
            let default = match take_byte(&mut input)? {
                0x00 => None,
                _ => Some(read_value(&mut input)?),
            };
            columns.push(ColumnSchema {
                id: col_id,
                name: col_name,
                ty,
                nullable,
                default,
            });
        }
        let npk = u16::from_be_bytes(take_array(&mut input)?) as usize;
        let mut primary_key = ColList::new();
        for _ in 0..npk {
            primary_key.push(ColId::from_be_bytes(take_array(&mut input)?));
        }
        let options = read_pairs(&mut input)?;
        expect_empty(input)?;
        Ok(TableSchema {
            id,
            database_id,
            name,
            columns,
            primary_key,
            options,
        })
    }
}

impl IndexSchema {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.id.to_be_bytes());
        buf.extend_from_slice(&self.table_id.to_be_bytes());
        write_str(&mut buf, &self.name);
        buf.extend_from_slice(&(self.columns.len() as u16).to_be_bytes());
        for col_id in &self.columns {
            buf.extend_from_slice(&col_id.to_be_bytes());
        }
        buf.push(self.unique as u8);
        buf.push(self.clustered as u8);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut input = bytes;
        let id = IndexId::from_be_bytes(take_array(&mut input)?);
        let table_id = TableId::from_be_bytes(take_array(&mut input)?);
        let name = read_str(&mut input)?;
        let ncols = u16::from_be_bytes(take_array(&mut input)?) as usize;
        let mut columns = ColList::new();
        for _ in 0..ncols {
            columns.push(ColId::from_be_bytes(take_array(&mut input)?));
        }
        let unique = take_byte(&mut input)? != 0;
        let clustered = take_byte(&mut input)? != 0;
        expect_empty(input)?;
        Ok(IndexSchema {
            id,
            table_id,
            name,
            columns,
            unique,
            clustered,
        })
    }
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn read_str(input: &mut &[u8]) -> Result<String, CodecError> {
    let len = u32::from_be_bytes(take_array(input)?) as usize;
    if input.len() < len {
        return Err(CodecError::Truncated);
    }
    let (head, rest) = input.split_at(len);
    *input = rest;
    String::from_utf8(head.to_vec()).map_err(|_| CodecError::Utf8)
}

fn write_pairs(buf: &mut Vec<u8>, pairs: &[(String, String)]) {
    buf.extend_from_slice(&(pairs.len() as u32).to_be_bytes());
    for (k, v) in pairs {
        write_str(buf, k);
        write_str(buf, v);
    }
}

fn read_pairs(input: &mut &[u8]) -> Result<Vec<(String, String)>, CodecError> {
    let n = u32::from_be_bytes(take_array(input)?) as usize;
    let mut pairs = Vec::with_capacity(n);
    for _ in 0..n {
        pairs.push((read_str(input)?, read_str(input)?));
    }
    Ok(pairs)
}

fn expect_empty(input: &[u8]) -> Result<(), CodecError> {
    if input.is_empty() {
        Ok(())
    } else {
        Err(CodecError::TrailingBytes(input.len()))
    }
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
