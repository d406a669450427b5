//! Row-level storage for one table: CRUD, scans, secondary-index
//! maintenance and truncation, all through a caller-supplied transaction.
//!
//! A `Table` is a view: it owns no data, only the schema snapshot taken
//! when the handle was opened plus a shared handle to the engine
//! internals. Every write computes the affected `Data` and `Index` keys
//! and stages them in the caller's transaction, so a statement's row write
//! and its index maintenance commit or fail together.

use crate::db::scan::{IndexIter, RowIter, ScanOptions};
use crate::engine::EngineInner;
use crate::error::{DbError, IndexError, Result, TableError};
use crate::execution_context::ExecutionContext;
use crate::txn::Transaction;
use granitedb_codec::{key, row, IndexDef, IndexSchema, TableSchema, Value};
use granitedb_kv::IsolationLevel;
use granitedb_primitives::RowId;
use itertools::Itertools;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct Table {
    inner: Arc<EngineInner>,
    schema: RwLock<Arc<TableSchema>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table").finish_non_exhaustive()
    }
}

impl Table {
    pub(crate) fn new(inner: Arc<EngineInner>, schema: Arc<TableSchema>) -> Self {
        Self {
            inner,
            schema: RwLock::new(schema),
            closed: AtomicBool::new(false),
        }
    }

    pub fn schema(&self) -> Arc<TableSchema> {
        self.schema.read().clone()
    }

    pub fn name(&self) -> String {
        self.schema.read().name.clone()
    }

    /// Closes this handle. Further operations fail with
    /// [`TableError::Closed`]; the table itself is untouched.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(TableError::Closed.into())
        } else {
            Ok(())
        }
    }

    /// The row id a row with these primary-key values would be stored
    /// under. `values` are the key columns only, in key order.
    pub fn row_id_from_pk(&self, values: &[Value]) -> Result<RowId> {
        let schema = self.schema();
        if !schema.has_primary_key() {
            return Err(TableError::NoPrimaryKey(schema.name.clone()).into());
        }
        if values.len() != schema.primary_key.len() {
            return Err(TableError::Arity {
                table: schema.name.clone(),
                expected: schema.primary_key.len(),
                found: values.len(),
            }
            .into());
        }
        let mut buf = Vec::new();
        for (value, col_id) in values.iter().zip(schema.primary_key.iter()) {
            let (_, col) = schema
                .column(*col_id)
                .expect("primary key refers to a column of this table");
            if value.is_null() {
                return Err(granitedb_codec::CodecError::NullKeyColumn.into());
            }
            if !col.ty.accepts(value) {
                return Err(TableError::TypeMismatch {
                    column: col.name.clone(),
                    ty: col.ty.to_string(),
                    value: value.to_string(),
                }
                .into());
            }
            key::write_ordered(&mut buf, value)?;
        }
        Ok(RowId::from_key_bytes(buf))
    }

    /// Inserts `row`, returning its storage id.
    ///
    /// Probes the primary key and every unique index before staging any
    /// write, so a rejected insert leaves the transaction unchanged.
    pub fn insert(
        &self,
        ctx: &ExecutionContext,
        txn: &mut Transaction,
        row: Vec<Value>,
    ) -> Result<RowId> {
        self.check_open()?;
        ctx.check()?;
        let schema = self.schema();
        validate_row(&schema, &row)?;

        let row_key = if schema.has_primary_key() {
            key::encode_row_key(&schema, &row)?
        } else {
            let next =
                self.inner
                    .catalog
                    .next_row_id(ctx, txn, schema.database_id, schema.id)?;
            let mut buf = Vec::new();
            key::write_ordered(&mut buf, &Value::U64(next))?;
            buf
        };

        let data_key = key::row_key(schema.database_id, schema.id, &row_key);
        if txn.get(ctx, &data_key)?.is_some() {
            return Err(TableError::DuplicateKey(RowId::from_key_bytes(row_key)).into());
        }

        let indexes = self.inner.catalog.list_indexes(schema.id)?;
        let mut entries = Vec::with_capacity(indexes.len());
        for index in &indexes {
            let tuple = key::encode_index_tuple(&schema, &index.columns, &row)?;
            if index.unique {
                self.probe_unique(ctx, txn, &schema, index, &tuple, None)?;
            }
            entries.push(key::index_entry_key(
                schema.database_id,
                schema.id,
                index.id,
                &tuple,
                &row_key,
            ));
        }

        txn.set(ctx, data_key, row::encode_row(&schema, &row)?)?;
        for entry in entries {
            txn.set(ctx, entry, row_key.clone())?;
        }
        Ok(RowId::from_key_bytes(row_key))
    }

    /// Reads the row stored under `row_id`.
    pub fn read(
        &self,
        ctx: &ExecutionContext,
        txn: &Transaction,
        row_id: &RowId,
    ) -> Result<Vec<Value>> {
        self.check_open()?;
        let schema = self.schema();
        let data_key = key::row_key(schema.database_id, schema.id, row_id.as_bytes());
        let payload = txn
            .get(ctx, &data_key)?
            .ok_or_else(|| TableError::RowNotFound(row_id.clone()))?;
        row::decode_row(&schema, &payload)
            .map_err(|e| DbError::corruption(format!("row in table `{}`", schema.name), e))
    }

    /// Applies `updates` (column id to new value) to the row at `row_id`.
    ///
    /// When the primary key changes this is a delete of the old row plus an
    /// insert of the new one, index maintenance included, inside the same
    /// transaction. Returns the row's id after the update.
    pub fn update(
        &self,
        ctx: &ExecutionContext,
        txn: &mut Transaction,
        row_id: &RowId,
        updates: &BTreeMap<granitedb_primitives::ColId, Value>,
    ) -> Result<RowId> {
        self.check_open()?;
        ctx.check()?;
        let schema = self.schema();
        let old_row = self.read(ctx, txn, row_id)?;

        let mut new_row = old_row.clone();
        for (col_id, value) in updates {
            let (pos, _) = schema
                .column(*col_id)
                .ok_or(TableError::ColumnIdNotFound(*col_id))?;
            new_row[pos] = value.clone();
        }
        validate_row(&schema, &new_row)?;

        let old_key = row_id.as_bytes().to_vec();
        let new_key = if schema.has_primary_key() {
            key::encode_row_key(&schema, &new_row)?
        } else {
            old_key.clone()
        };
        let indexes = self.inner.catalog.list_indexes(schema.id)?;

        if new_key != old_key {
            let new_data_key = key::row_key(schema.database_id, schema.id, &new_key);
            if txn.get(ctx, &new_data_key)?.is_some() {
                return Err(
                    TableError::DuplicateKey(RowId::from_key_bytes(new_key)).into(),
                );
            }
            let mut deletes = Vec::with_capacity(indexes.len());
            let mut writes = Vec::with_capacity(indexes.len());
            for index in &indexes {
                let old_tuple = key::encode_index_tuple(&schema, &index.columns, &old_row)?;
                let new_tuple = key::encode_index_tuple(&schema, &index.columns, &new_row)?;
                if index.unique {
                    self.probe_unique(ctx, txn, &schema, index, &new_tuple, Some(&old_key))?;
                }
                deletes.push(key::index_entry_key(
                    schema.database_id,
                    schema.id,
                    index.id,
                    &old_tuple,
                    &old_key,
                ));
                writes.push(key::index_entry_key(
                    schema.database_id,
                    schema.id,
                    index.id,
                    &new_tuple,
                    &new_key,
                ));
            }
            txn.delete(ctx, key::row_key(schema.database_id, schema.id, &old_key))?;
            for entry in deletes {
                txn.delete(ctx, entry)?;
            }
            txn.set(ctx, new_data_key, row::encode_row(&schema, &new_row)?)?;
            for entry in writes {
                txn.set(ctx, entry, new_key.clone())?;
            }
            return Ok(RowId::from_key_bytes(new_key));
        }

        let mut deletes = Vec::new();
        let mut writes = Vec::new();
        for index in &indexes {
            let old_tuple = key::encode_index_tuple(&schema, &index.columns, &old_row)?;
            let new_tuple = key::encode_index_tuple(&schema, &index.columns, &new_row)?;
            if old_tuple == new_tuple {
                continue;
            }
            if index.unique {
                self.probe_unique(ctx, txn, &schema, index, &new_tuple, Some(&old_key))?;
            }
            deletes.push(key::index_entry_key(
                schema.database_id,
                schema.id,
                index.id,
                &old_tuple,
                &old_key,
            ));
            writes.push(key::index_entry_key(
                schema.database_id,
                schema.id,
                index.id,
                &new_tuple,
                &old_key,
            ));
        }
        txn.set(
            ctx,
            key::row_key(schema.database_id, schema.id, &old_key),
            row::encode_row(&schema, &new_row)?,
        )?;
        for entry in deletes {
            txn.delete(ctx, entry)?;
        }
        for entry in writes {
            txn.set(ctx, entry, old_key.clone())?;
        }
        Ok(row_id.clone())
    }

    /// Deletes the row at `row_id` and every index entry derived from it.
    pub fn delete(
        &self,
        ctx: &ExecutionContext,
        txn: &mut Transaction,
        row_id: &RowId,
    ) -> Result<()> {
        self.check_open()?;
        ctx.check()?;
        let schema = self.schema();
        let row = self.read(ctx, txn, row_id)?;

        for index in self.inner.catalog.list_indexes(schema.id)? {
            let tuple = key::encode_index_tuple(&schema, &index.columns, &row)?;
            txn.delete(
                ctx,
                key::index_entry_key(
                    schema.database_id,
                    schema.id,
                    index.id,
                    &tuple,
                    row_id.as_bytes(),
                ),
            )?;
        }
        txn.delete(
            ctx,
            key::row_key(schema.database_id, schema.id, row_id.as_bytes()),
        )?;
        Ok(())
    }

    /// Opens a cursor over the table's rows in primary-key order.
    pub fn scan<'t>(
        &self,
        ctx: &'t ExecutionContext,
        txn: &'t Transaction,
        options: ScanOptions,
    ) -> Result<RowIter<'t>> {
        self.check_open()?;
        ctx.check()?;
        let schema = self.schema();
        let prefix = key::data_prefix(schema.database_id, schema.id);
        let lower = options
            .lower
            .map(|values| self.encode_pk_prefix(&schema, &values))
            .transpose()?;
        let upper = options
            .upper
            .map(|values| self.encode_pk_prefix(&schema, &values))
            .transpose()?;
        let scan = txn.scan_prefix(ctx, &prefix)?;
        Ok(RowIter::new(
            scan,
            ctx,
            schema,
            prefix.len(),
            lower,
            upper,
            options.limit,
        ))
    }

    /// Removes every row and every index entry, keeping the schema, the
    /// index definitions and the row-id high-water mark. Returns the number
    /// of rows removed.
    pub fn truncate(&self, ctx: &ExecutionContext, txn: &mut Transaction) -> Result<u64> {
        self.check_open()?;
        ctx.check()?;
        let schema = self.schema();
        let data_keys = txn.list_prefix_keys(ctx, &key::data_prefix(schema.database_id, schema.id))?;
        let removed = data_keys.len() as u64;
        for data_key in data_keys {
            txn.delete(ctx, data_key)?;
        }
        let entry_keys = txn.list_prefix_keys(
            ctx,
            &key::index_entries_table_prefix(schema.database_id, schema.id),
        )?;
        for entry_key in entry_keys {
            txn.delete(ctx, entry_key)?;
        }
        Ok(removed)
    }

    /// Creates an index inside the caller's transaction: writes the schema
    /// record and backfills an entry per existing row, failing on the first
    /// duplicate for a unique index. The caller must publish the returned
    /// schema to the catalog cache once the transaction commits.
    pub fn create_index_in(
        &self,
        ctx: &ExecutionContext,
        txn: &mut Transaction,
        def: &IndexDef,
    ) -> Result<IndexSchema> {
        self.check_open()?;
        ctx.check()?;
        let schema = self.schema();
        let index = self
            .inner
            .catalog
            .create_index_record(ctx, txn, &schema, def)?;

        let prefix = key::data_prefix(schema.database_id, schema.id);
        for (data_key, payload) in txn.list_prefix(ctx, &prefix)? {
            ctx.check()?;
            let row = row::decode_row(&schema, &payload)
                .map_err(|e| DbError::corruption(format!("row in table `{}`", schema.name), e))?;
            let row_key = data_key[prefix.len()..].to_vec();
            let tuple = key::encode_index_tuple(&schema, &index.columns, &row)?;
            if index.unique {
                self.probe_unique(ctx, txn, &schema, &index, &tuple, None)?;
            }
            txn.set(
                ctx,
                key::index_entry_key(schema.database_id, schema.id, index.id, &tuple, &row_key),
                row_key.clone(),
            )?;
        }
        Ok(index)
    }

    /// Creates an index in its own transaction and publishes it.
    pub fn create_index(&self, ctx: &ExecutionContext, def: &IndexDef) -> Result<IndexSchema> {
        self.check_open()?;
        let _ddl = self.inner.ddl_lock.lock();
        let mut txn = Transaction::new(self.inner.kv.begin(false)?, IsolationLevel::Serializable);
        match self.create_index_in(ctx, &mut txn, def) {
            Ok(index) => {
                txn.commit(ctx)?;
                self.inner.catalog.publish_index(index.clone());
                Ok(index)
            }
            Err(e) => {
                let _ = txn.rollback();
                Err(e)
            }
        }
    }

    /// Deletes an index's record and every entry under it, inside the
    /// caller's transaction. Pair with a cache retraction after commit.
    pub fn drop_index_in(
        &self,
        ctx: &ExecutionContext,
        txn: &mut Transaction,
        name: &str,
    ) -> Result<IndexSchema> {
        self.check_open()?;
        ctx.check()?;
        let schema = self.schema();
        let index = self.inner.catalog.get_index(schema.id, name)?;
        self.inner
            .catalog
            .delete_index_record(ctx, txn, &schema, &index)?;
        for entry_key in txn.list_prefix_keys(
            ctx,
            &key::index_entries_prefix(schema.database_id, schema.id, index.id),
        )? {
            txn.delete(ctx, entry_key)?;
        }
        Ok(index)
    }

    /// Drops an index in its own transaction and retracts it.
    pub fn drop_index(&self, ctx: &ExecutionContext, name: &str) -> Result<()> {
        self.check_open()?;
        let _ddl = self.inner.ddl_lock.lock();
        let mut txn = Transaction::new(self.inner.kv.begin(false)?, IsolationLevel::Serializable);
        match self.drop_index_in(ctx, &mut txn, name) {
            Ok(index) => {
                txn.commit(ctx)?;
                self.inner.catalog.retract_index(index.table_id, &index.name);
                Ok(())
            }
            Err(e) => {
                let _ = txn.rollback();
                Err(e)
            }
        }
    }

    pub fn get_index(&self, name: &str) -> Result<IndexSchema> {
        self.check_open()?;
        self.inner.catalog.get_index(self.schema.read().id, name)
    }

    pub fn list_indexes(&self) -> Result<Vec<IndexSchema>> {
        self.check_open()?;
        self.inner.catalog.list_indexes(self.schema.read().id)
    }

    /// Point lookup through an index: every row whose indexed columns equal
    /// `values` (which may be a prefix of the index's columns).
    pub fn index_lookup<'t>(
        &self,
        ctx: &'t ExecutionContext,
        txn: &'t Transaction,
        name: &str,
        values: &[Value],
    ) -> Result<IndexIter<'t>> {
        self.check_open()?;
        ctx.check()?;
        let schema = self.schema();
        let index = self.inner.catalog.get_index(schema.id, name)?;
        let tuple = self.encode_index_prefix(&schema, &index, values)?;
        let entries_prefix =
            key::index_entries_prefix(schema.database_id, schema.id, index.id);
        let scan_prefix =
            key::index_tuple_prefix(schema.database_id, schema.id, index.id, &tuple);
        let scan = txn.scan_prefix(ctx, &scan_prefix)?;
        Ok(IndexIter::new(
            scan,
            txn,
            ctx,
            schema,
            index,
            entries_prefix.len(),
            None,
            None,
            false,
        ))
    }

    /// Range scan through an index; bounds are tuples (possibly prefixes)
    /// of the indexed columns, lower and upper both inclusive.
    pub fn index_range<'t>(
        &self,
        ctx: &'t ExecutionContext,
        txn: &'t Transaction,
        name: &str,
        lower: Option<&[Value]>,
        upper: Option<&[Value]>,
    ) -> Result<IndexIter<'t>> {
        self.index_scan(ctx, txn, name, lower, upper, false)
    }

    /// Like [`Table::index_range`] but yields the indexed column values
    /// directly from the entries, skipping the row lookup.
    pub fn index_scan_covering<'t>(
        &self,
        ctx: &'t ExecutionContext,
        txn: &'t Transaction,
        name: &str,
        lower: Option<&[Value]>,
        upper: Option<&[Value]>,
    ) -> Result<IndexIter<'t>> {
        self.index_scan(ctx, txn, name, lower, upper, true)
    }

    fn index_scan<'t>(
        &self,
        ctx: &'t ExecutionContext,
        txn: &'t Transaction,
        name: &str,
        lower: Option<&[Value]>,
        upper: Option<&[Value]>,
        covering: bool,
    ) -> Result<IndexIter<'t>> {
        self.check_open()?;
        ctx.check()?;
        let schema = self.schema();
        let index = self.inner.catalog.get_index(schema.id, name)?;
        let lower = lower
            .map(|values| self.encode_index_prefix(&schema, &index, values))
            .transpose()?;
        let upper = upper
            .map(|values| self.encode_index_prefix(&schema, &index, values))
            .transpose()?;
        let entries_prefix =
            key::index_entries_prefix(schema.database_id, schema.id, index.id);
        let scan = txn.scan_prefix(ctx, &entries_prefix)?;
        Ok(IndexIter::new(
            scan,
            txn,
            ctx,
            schema,
            index,
            entries_prefix.len(),
            lower,
            upper,
            covering,
        ))
    }

    fn probe_unique(
        &self,
        ctx: &ExecutionContext,
        txn: &Transaction,
        schema: &TableSchema,
        index: &IndexSchema,
        tuple: &[u8],
        exclude_row: Option<&[u8]>,
    ) -> Result<()> {
        let prefix = key::index_tuple_prefix(schema.database_id, schema.id, index.id, tuple);
        for item in txn.scan_prefix(ctx, &prefix)? {
            let (entry_key, _) = item.map_err(DbError::from)?;
            let suffix = &entry_key[prefix.len()..];
            if exclude_row != Some(suffix) {
                return Err(IndexError::UniqueViolation {
                    index: index.name.clone(),
                    values: render_tuple(schema, index, tuple),
                }
                .into());
            }
            ctx.check()?;
        }
        Ok(())
    }

    fn encode_pk_prefix(&self, schema: &TableSchema, values: &[Value]) -> Result<Vec<u8>> {
        if values.len() > schema.primary_key.len() {
            return Err(TableError::Arity {
                table: schema.name.clone(),
                expected: schema.primary_key.len(),
                found: values.len(),
            }
            .into());
        }
        let mut buf = Vec::new();
        for (value, col_id) in values.iter().zip(schema.primary_key.iter()) {
            let (_, col) = schema
                .column(*col_id)
                .expect("primary key refers to a column of this table");
            if value.is_null() {
                return Err(granitedb_codec::CodecError::NullKeyColumn.into());
            }
            if !col.ty.accepts(value) {
                return Err(TableError::TypeMismatch {
                    column: col.name.clone(),
                    ty: col.ty.to_string(),
                    value: value.to_string(),
                }
                .into());
            }
            key::write_ordered(&mut buf, value)?;
        }
        Ok(buf)
    }

    fn encode_index_prefix(
        &self,
        schema: &TableSchema,
        index: &IndexSchema,
        values: &[Value],
    ) -> Result<Vec<u8>> {
        if values.len() > index.columns.len() {
            return Err(TableError::Arity {
                table: schema.name.clone(),
                expected: index.columns.len(),
                found: values.len(),
            }
            .into());
        }
        let mut buf = Vec::new();
        for (value, col_id) in values.iter().zip(index.columns.iter()) {
            let (_, col) = schema
                .column(*col_id)
                .expect("index refers to a column of this table");
            if !value.is_null() && !col.ty.accepts(value) {
                return Err(TableError::TypeMismatch {
                    column: col.name.clone(),
                    ty: col.ty.to_string(),
                    value: value.to_string(),
                }
                .into());
            }
            key::write_ordered(&mut buf, value)?;
        }
        Ok(buf)
    }
}

fn validate_row(schema: &TableSchema, row: &[Value]) -> Result<()> {
    if row.len() != schema.columns.len() {
        return Err(TableError::Arity {
            table: schema.name.clone(),
            expected: schema.columns.len(),
            found: row.len(),
        }
        .into());
    }
    for (col, value) in schema.columns.iter().zip(row.iter()) {
        if value.is_null() {
            if !col.nullable {
                return Err(TableError::NotNull(col.name.clone()).into());
            }
            continue;
        }
        if !col.ty.accepts(value) {
            return Err(TableError::TypeMismatch {
                column: col.name.clone(),
                ty: col.ty.to_string(),
                value: value.to_string(),
            }
            .into());
        }
        if col.ty.exceeds_length(value) {
            return Err(TableError::ValueTooLong {
                column: col.name.clone(),
                ty: col.ty.to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// Renders an encoded index tuple for error messages.
fn render_tuple(schema: &TableSchema, index: &IndexSchema, tuple: &[u8]) -> String {
    let types: Vec<_> = index
        .columns
        .iter()
        .filter_map(|id| schema.column(*id).map(|(_, c)| c.ty.clone()))
        .collect();
    match key::decode_key_tuple(tuple, &types) {
        Ok((values, _)) => values.iter().map(|v| v.to_string()).join(", "),
        Err(_) => "?".to_owned(),
    }
}
