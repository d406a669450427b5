//! Schema registry: databases, tables and secondary indexes, plus the
//! monotonic ID sequences that name them.
//!
//! Two implementations of one [`Catalog`] contract. [`MemoryCatalog`] keeps
//! everything in maps and atomic counters; [`PersistentCatalog`] keeps the
//! same maps as a warm cache over durable records in the KV engine, and
//! persists every minted ID's high-water mark in the same transaction as
//! the object that uses it, so IDs are never reused across restarts.

mod cache;
mod memory;
mod persistent;

pub use memory::MemoryCatalog;
pub use persistent::PersistentCatalog;

pub(crate) use cache::CatalogCache;

use crate::error::{DbError, IndexError, Result, SequenceError, TableError};
use crate::execution_context::ExecutionContext;
use crate::txn::Transaction;
use granitedb_codec::{
    ColumnSchema, DatabaseMeta, IndexDef, IndexSchema, TableDef, TableSchema,
};
use granitedb_primitives::{ColId, ColList, DatabaseId, IndexId, TableId};
use std::collections::HashMap;
use std::sync::Arc;

/// The schema registry contract shared by both catalog implementations.
///
/// Lookup methods (`get_*`, `list_*`) read the in-memory state and never
/// touch the store. Mutating methods run their writes inside a single
/// serializable engine transaction and update the in-memory state only
/// after it commits, so readers never observe partial DDL.
///
/// Index records are the exception to the self-contained-transaction rule:
/// index creation must share a transaction with the backfill of its
/// entries, so the record operations take the caller's transaction and the
/// caller publishes or retracts the cached entry once that transaction
/// settles.
pub trait Catalog: Send + Sync {
    fn initialize(&self, ctx: &ExecutionContext) -> Result<()>;
    fn shutdown(&self, ctx: &ExecutionContext) -> Result<()>;

    fn create_database(
        &self,
        ctx: &ExecutionContext,
        name: &str,
        properties: Vec<(String, String)>,
    ) -> Result<DatabaseMeta>;
    /// Drops the database and every descendant key (table schemas, index
    /// schemas, rows, index entries, per-table sequences) in one
    /// transaction.
    fn drop_database(&self, ctx: &ExecutionContext, name: &str) -> Result<()>;
    fn get_database(&self, name: &str) -> Result<DatabaseMeta>;
    fn get_database_case_insensitive(&self, name: &str) -> Result<DatabaseMeta>;
    fn list_databases(&self) -> Result<Vec<DatabaseMeta>>;

    fn create_table(
        &self,
        ctx: &ExecutionContext,
        database: &str,
        def: TableDef,
    ) -> Result<Arc<TableSchema>>;
    fn drop_table(&self, ctx: &ExecutionContext, database: &str, table: &str) -> Result<()>;
    fn rename_table(
        &self,
        ctx: &ExecutionContext,
        database: &str,
        table: &str,
        new_name: &str,
    ) -> Result<Arc<TableSchema>>;
    fn get_table(&self, database: &str, table: &str) -> Result<Arc<TableSchema>>;
    fn get_table_case_insensitive(
        &self,
        database: &str,
        table: &str,
    ) -> Result<Arc<TableSchema>>;
    fn list_tables(&self, database: &str) -> Result<Vec<Arc<TableSchema>>>;

    fn get_index(&self, table: TableId, name: &str) -> Result<IndexSchema>;
    fn list_indexes(&self, table: TableId) -> Result<Vec<IndexSchema>>;
    /// Mints an [`IndexId`] and writes the index record into the caller's
    /// transaction. The cached entry appears only once the caller commits
    /// and calls [`Catalog::publish_index`].
    fn create_index_record(
        &self,
        ctx: &ExecutionContext,
        txn: &mut Transaction,
        table: &TableSchema,
        def: &IndexDef,
    ) -> Result<IndexSchema>;
    /// Deletes the index record in the caller's transaction; pair with
    /// [`Catalog::retract_index`] after commit.
    fn delete_index_record(
        &self,
        ctx: &ExecutionContext,
        txn: &mut Transaction,
        table: &TableSchema,
        index: &IndexSchema,
    ) -> Result<()>;
    fn publish_index(&self, schema: IndexSchema);
    fn retract_index(&self, table: TableId, name: &str);

    /// Mints the next synthetic row id for a table, persisting the
    /// high-water mark in the caller's transaction.
    fn next_row_id(
        &self,
        ctx: &ExecutionContext,
        txn: &mut Transaction,
        database: DatabaseId,
        table: TableId,
    ) -> Result<u64>;
}

/// In-memory counters behind the four catalog ID sequences and the
/// per-table row sequences. The persistent catalog initializes these from
/// the stored high-water marks; advancing them is always monotonic, so a
/// rolled-back transaction leaves a gap, never a reused id.
#[derive(Default)]
pub(crate) struct SequenceState {
    pub database: u64,
    pub table: u64,
    pub column: u64,
    pub index: u64,
    pub rows: HashMap<(DatabaseId, TableId), u64>,
}

impl SequenceState {
    pub fn next_database_id(&mut self) -> DatabaseId {
        self.database += 1;
        DatabaseId::new(self.database)
    }

    pub fn next_table_id(&mut self) -> TableId {
        self.table += 1;
        TableId::new(self.table)
    }

    pub fn next_column_id(&mut self) -> ColId {
        self.column += 1;
        ColId::new(self.column)
    }

    pub fn next_index_id(&mut self) -> IndexId {
        self.index += 1;
        IndexId::new(self.index)
    }
}

/// Deletes every key under each prefix within the caller's transaction.
pub(crate) fn purge_prefixes(
    ctx: &ExecutionContext,
    txn: &mut Transaction,
    prefixes: &[Vec<u8>],
) -> Result<()> {
    for prefix in prefixes {
        for key in txn.list_prefix_keys(ctx, prefix)? {
            txn.delete(ctx, key)?;
        }
    }
    Ok(())
}

/// Decodes a stored sequence counter.
pub(crate) fn parse_counter(bytes: &[u8], sequence: &str) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| SequenceError::Malformed(sequence.to_owned()))?;
    Ok(u64::from_be_bytes(raw))
}

/// Builds a [`TableSchema`] from a definition, minting column ids through
/// `next_col`. Validates column-name uniqueness and the primary key.
pub(crate) fn table_schema_from_def(
    database_id: DatabaseId,
    table_id: TableId,
    def: &TableDef,
    mut next_col: impl FnMut() -> ColId,
) -> Result<TableSchema> {
    let mut columns = Vec::with_capacity(def.columns.len());
    for col in &def.columns {
        if columns.iter().any(|c: &ColumnSchema| c.name == col.name) {
            return Err(TableError::DuplicateColumnName(col.name.clone()).into());
        }
        columns.push(ColumnSchema {
            id: next_col(),
            name: col.name.clone(),
            ty: col.ty.clone(),
            nullable: col.nullable,
            default: col.default.clone(),
        });
    }

    let mut primary_key = ColList::new();
    for name in &def.primary_key {
        let col = columns
            .iter()
            .find(|c| &c.name == name)
            .ok_or_else(|| TableError::ColumnNotFound(name.clone()))?;
        if col.nullable {
            return Err(TableError::NullablePrimaryKey(name.clone()).into());
        }
        primary_key.push(col.id);
    }

    Ok(TableSchema {
        id: table_id,
        database_id,
        name: def.name.clone(),
        columns,
        primary_key,
        options: def.options.clone(),
    })
}

/// Builds an [`IndexSchema`] from a definition against its table.
pub(crate) fn index_schema_from_def(
    table: &TableSchema,
    index_id: IndexId,
    def: &IndexDef,
) -> Result<IndexSchema> {
    if def.columns.is_empty() {
        return Err(IndexError::NoColumns(def.name.clone()).into());
    }
    let mut columns = ColList::new();
    for name in &def.columns {
        let (_, col) = table
            .column_by_name(name)
            .ok_or_else(|| IndexError::ColumnNotFound {
                index: def.name.clone(),
                column: name.clone(),
            })?;
        columns.push(col.id);
    }
    if def.clustered && columns.as_slice() != table.primary_key.as_slice() {
        return Err(DbError::Index(IndexError::ClusteredMismatch(def.name.clone())));
    }
    Ok(IndexSchema {
        id: index_id,
        table_id: table.id,
        name: def.name.clone(),
        columns,
        unique: def.unique,
        clustered: def.clustered,
    })
}
