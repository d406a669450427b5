//! Lazy cursors over table data and index entries.
//!
//! Both iterators borrow the transaction they read through, so the borrow
//! checker guarantees no cursor survives its transaction, and both check
//! the execution context between items so a cancelled scan stops promptly
//! and releases its cursor by being dropped.

use crate::error::{DbError, Result};
use crate::execution_context::ExecutionContext;
use crate::txn::Transaction;
use granitedb_codec::key::decode_key_tuple;
use granitedb_codec::{key, row, IndexSchema, LogicalType, TableSchema, Value};
use granitedb_kv::Scan;
use granitedb_primitives::RowId;
use std::sync::Arc;

/// Options narrowing a table scan by a primary-key range.
///
/// `lower` is inclusive; `upper` is inclusive and may be a strict prefix of
/// the primary key, in which case every row whose key extends it matches.
#[derive(Default, Clone)]
pub struct ScanOptions {
    pub lower: Option<Vec<Value>>,
    pub upper: Option<Vec<Value>>,
    pub limit: Option<usize>,
}

impl ScanOptions {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_lower(mut self, values: Vec<Value>) -> Self {
        self.lower = Some(values);
        self
    }

    pub fn with_upper(mut self, values: Vec<Value>) -> Self {
        self.upper = Some(values);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// True when `suffix` is still inside the inclusive upper bound.
fn within_upper(suffix: &[u8], upper: &Option<Vec<u8>>) -> bool {
    match upper {
        None => true,
        Some(upper) => suffix <= upper.as_slice() || suffix.starts_with(upper),
    }
}

fn below_lower(suffix: &[u8], lower: &Option<Vec<u8>>) -> bool {
    match lower {
        None => false,
        Some(lower) => suffix < lower.as_slice(),
    }
}

/// Cursor over a table's rows in primary-key order.
pub struct RowIter<'t> {
    scan: Scan<'t>,
    ctx: &'t ExecutionContext,
    schema: Arc<TableSchema>,
    prefix_len: usize,
    lower: Option<Vec<u8>>,
    upper: Option<Vec<u8>>,
    remaining: Option<usize>,
    done: bool,
}

impl<'t> RowIter<'t> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        scan: Scan<'t>,
        ctx: &'t ExecutionContext,
        schema: Arc<TableSchema>,
        prefix_len: usize,
        lower: Option<Vec<u8>>,
        upper: Option<Vec<u8>>,
        limit: Option<usize>,
    ) -> Self {
        Self {
            scan,
            ctx,
            schema,
            prefix_len,
            lower,
            upper,
            remaining: limit,
            done: false,
        }
    }

    fn finish<T>(&mut self, result: T) -> T {
        self.done = true;
        result
    }
}

impl Iterator for RowIter<'_> {
    type Item = Result<(RowId, Vec<Value>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || matches!(self.remaining, Some(0)) {
            return None;
        }
        loop {
            if let Err(e) = self.ctx.check() {
                return self.finish(Some(Err(e)));
            }
            let (data_key, payload) = match self.scan.next() {
                None => return self.finish(None),
                Some(Err(e)) => return self.finish(Some(Err(e.into()))),
                Some(Ok(entry)) => entry,
            };
            let row_key = &data_key[self.prefix_len..];
            if below_lower(row_key, &self.lower) {
                continue;
            }
            if !within_upper(row_key, &self.upper) {
                return self.finish(None);
            }
            let row = match row::decode_row(&self.schema, &payload) {
                Ok(row) => row,
                Err(e) => {
                    let context = format!("row in table `{}`", self.schema.name);
                    return self.finish(Some(Err(DbError::corruption(context, e))));
                }
            };
            if let Some(remaining) = &mut self.remaining {
                *remaining -= 1;
            }
            return Some(Ok((RowId::from_key_bytes(row_key.to_vec()), row)));
        }
    }
}

/// What an index cursor yields per entry.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub row_id: RowId,
    /// The full row for a materializing scan, or just the indexed column
    /// values for a covering scan.
    pub values: Vec<Value>,
}

/// Cursor over one index's entries in tuple order, optionally
/// materializing each referenced row through the transaction.
pub struct IndexIter<'t> {
    scan: Scan<'t>,
    txn: &'t Transaction,
    ctx: &'t ExecutionContext,
    schema: Arc<TableSchema>,
    index: IndexSchema,
    tuple_types: Vec<LogicalType>,
    /// Length of the index's entry prefix, before the encoded tuple.
    entries_prefix_len: usize,
    lower: Option<Vec<u8>>,
    upper: Option<Vec<u8>>,
    covering: bool,
    done: bool,
}

impl<'t> IndexIter<'t> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        scan: Scan<'t>,
        txn: &'t Transaction,
        ctx: &'t ExecutionContext,
        schema: Arc<TableSchema>,
        index: IndexSchema,
        entries_prefix_len: usize,
        lower: Option<Vec<u8>>,
        upper: Option<Vec<u8>>,
        covering: bool,
    ) -> Self {
        let tuple_types = index
            .columns
            .iter()
            .map(|id| {
                schema
                    .column(*id)
                    .expect("index refers to a column of this table")
                    .1
                    .ty
                    .clone()
            })
            .collect();
        Self {
            scan,
            txn,
            ctx,
            schema,
            index,
            tuple_types,
            entries_prefix_len,
            lower,
            upper,
            covering,
            done: false,
        }
    }

    fn finish<T>(&mut self, result: T) -> T {
        self.done = true;
        result
    }

    fn entry(&self, suffix: &[u8], row_key: &[u8]) -> Result<IndexEntry> {
        let row_id = RowId::from_key_bytes(row_key.to_vec());
        let values = if self.covering {
            let (values, _) = decode_key_tuple(suffix, &self.tuple_types).map_err(|e| {
                DbError::corruption(format!("entry of index `{}`", self.index.name), e)
            })?;
            values
        } else {
            let data_key = key::row_key(self.schema.database_id, self.schema.id, row_key);
            let payload = self.txn.get(self.ctx, &data_key)?.ok_or_else(|| {
                DbError::Corruption(format!(
                    "entry of index `{}` points at a missing row",
                    self.index.name
                ))
            })?;
            row::decode_row(&self.schema, &payload).map_err(|e| {
                DbError::corruption(format!("row in table `{}`", self.schema.name), e)
            })?
        };
        Ok(IndexEntry { row_id, values })
    }
}

impl Iterator for IndexIter<'_> {
    type Item = Result<IndexEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Err(e) = self.ctx.check() {
                return self.finish(Some(Err(e)));
            }
            let (entry_key, row_key) = match self.scan.next() {
                None => return self.finish(None),
                Some(Err(e)) => return self.finish(Some(Err(e.into()))),
                Some(Ok(entry)) => entry,
            };
            let suffix = &entry_key[self.entries_prefix_len..];
            if below_lower(suffix, &self.lower) {
                continue;
            }
            if !within_upper(suffix, &self.upper) {
                return self.finish(None);
            }
            let item = self.entry(suffix, &row_key);
            if item.is_err() {
                self.done = true;
            }
            return Some(item);
        }
    }
}
