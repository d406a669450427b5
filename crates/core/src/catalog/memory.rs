//! The volatile catalog: plain maps under one lock, atomic in-memory ID
//! counters, nothing persisted. Row data still lives in the KV engine, so
//! drops purge the same keyspace the persistent catalog would.

use super::{
    index_schema_from_def, purge_prefixes, table_schema_from_def, Catalog, CatalogCache,
    SequenceState,
};
use crate::error::{CatalogError, IndexError, Result};
use crate::execution_context::ExecutionContext;
use crate::txn::Transaction;
use granitedb_codec::{key, DatabaseMeta, IndexDef, IndexSchema, TableDef, TableSchema};
use granitedb_kv::{IsolationLevel, KvEngine};
use granitedb_primitives::{DatabaseId, TableId};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

pub struct MemoryCatalog {
    kv: KvEngine,
    cache: RwLock<CatalogCache>,
    seqs: Mutex<SequenceState>,
}

impl MemoryCatalog {
    pub fn new(kv: KvEngine) -> Self {
        Self {
            kv,
            cache: RwLock::new(CatalogCache::default()),
            seqs: Mutex::new(SequenceState::default()),
        }
    }

    fn begin(&self) -> Result<Transaction> {
        Ok(Transaction::new(
            self.kv.begin(false)?,
            IsolationLevel::Serializable,
        ))
    }
}

impl Catalog for MemoryCatalog {
    fn initialize(&self, _ctx: &ExecutionContext) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self, _ctx: &ExecutionContext) -> Result<()> {
        self.cache.write().clear();
        Ok(())
    }

    fn create_database(
        &self,
        ctx: &ExecutionContext,
        name: &str,
        properties: Vec<(String, String)>,
    ) -> Result<DatabaseMeta> {
        ctx.check()?;
        let mut cache = self.cache.write();
        if cache.database(name).is_some() {
            return Err(CatalogError::DatabaseExists(name.to_owned()).into());
        }
        let meta = DatabaseMeta {
            id: self.seqs.lock().next_database_id(),
            name: name.to_owned(),
            properties,
        };
        cache.insert_database(meta.clone());
        log::debug!("created database `{name}` ({})", meta.id);
        Ok(meta)
    }

    fn drop_database(&self, ctx: &ExecutionContext, name: &str) -> Result<()> {
        ctx.check()?;
        let mut cache = self.cache.write();
        let meta = cache
            .database(name)
            .cloned()
            .ok_or_else(|| CatalogError::DatabaseNotFound(name.to_owned()))?;

        let mut txn = self.begin()?;
        purge_prefixes(
            ctx,
            &mut txn,
            &[
                key::data_db_prefix(meta.id),
                key::index_entries_db_prefix(meta.id),
            ],
        )?;
        txn.commit(ctx)?;

        cache.remove_database(name);
        self.seqs.lock().rows.retain(|(db, _), _| *db != meta.id);
        log::debug!("dropped database `{name}` ({})", meta.id);
        Ok(())
    }

    fn get_database(&self, name: &str) -> Result<DatabaseMeta> {
        self.cache
            .read()
            .database(name)
            .cloned()
            .ok_or_else(|| CatalogError::DatabaseNotFound(name.to_owned()).into())
    }

    fn get_database_case_insensitive(&self, name: &str) -> Result<DatabaseMeta> {
        self.cache
            .read()
            .database_case_insensitive(name)
            .cloned()
            .ok_or_else(|| CatalogError::DatabaseNotFound(name.to_owned()).into())
    }

    fn list_databases(&self) -> Result<Vec<DatabaseMeta>> {
        Ok(self.cache.read().list_databases())
    }

    fn create_table(
        &self,
        ctx: &ExecutionContext,
        database: &str,
        def: TableDef,
    ) -> Result<Arc<TableSchema>> {
        ctx.check()?;
        let mut cache = self.cache.write();
        let meta = cache
            .database(database)
            .cloned()
            .ok_or_else(|| CatalogError::DatabaseNotFound(database.to_owned()))?;
        if cache.table(meta.id, &def.name).is_some() {
            return Err(CatalogError::TableExists(def.name.clone()).into());
        }
        let mut seqs = self.seqs.lock();
        let table_id = seqs.next_table_id();
        let schema = Arc::new(table_schema_from_def(meta.id, table_id, &def, || {
            seqs.next_column_id()
        })?);
        cache.insert_table(schema.clone());
        log::debug!("created table `{database}`.`{}` ({table_id})", schema.name);
        Ok(schema)
    }

    fn drop_table(&self, ctx: &ExecutionContext, database: &str, table: &str) -> Result<()> {
        ctx.check()?;
        let mut cache = self.cache.write();
        let meta = cache
            .database(database)
            .cloned()
            .ok_or_else(|| CatalogError::DatabaseNotFound(database.to_owned()))?;
        let schema = cache
            .table(meta.id, table)
            .cloned()
            .ok_or_else(|| CatalogError::TableNotFound(table.to_owned()))?;

        let mut txn = self.begin()?;
        purge_prefixes(
            ctx,
            &mut txn,
            &[
                key::data_prefix(meta.id, schema.id),
                key::index_entries_table_prefix(meta.id, schema.id),
            ],
        )?;
        txn.commit(ctx)?;

        cache.remove_table(meta.id, table);
        self.seqs.lock().rows.remove(&(meta.id, schema.id));
        Ok(())
    }

    fn rename_table(
        &self,
        ctx: &ExecutionContext,
        database: &str,
        table: &str,
        new_name: &str,
    ) -> Result<Arc<TableSchema>> {
        ctx.check()?;
        let mut cache = self.cache.write();
        let meta = cache
            .database(database)
            .cloned()
            .ok_or_else(|| CatalogError::DatabaseNotFound(database.to_owned()))?;
        if cache.table(meta.id, new_name).is_some() {
            return Err(CatalogError::TableExists(new_name.to_owned()).into());
        }
        let schema = cache
            .table(meta.id, table)
            .cloned()
            .ok_or_else(|| CatalogError::TableNotFound(table.to_owned()))?;
        let indexes = cache.indexes_of(schema.id);
        cache.remove_table(meta.id, table);
        let mut renamed = (*schema).clone();
        renamed.name = new_name.to_owned();
        let renamed = Arc::new(renamed);
        cache.insert_table(renamed.clone());
        for index in indexes {
            cache.insert_index(index);
        }
        Ok(renamed)
    }

    fn get_table(&self, database: &str, table: &str) -> Result<Arc<TableSchema>> {
        let cache = self.cache.read();
        let meta = cache
            .database(database)
            .ok_or_else(|| CatalogError::DatabaseNotFound(database.to_owned()))?;
        cache
            .table(meta.id, table)
            .cloned()
            .ok_or_else(|| CatalogError::TableNotFound(table.to_owned()).into())
    }

    fn get_table_case_insensitive(&self, database: &str, table: &str) -> Result<Arc<TableSchema>> {
        let cache = self.cache.read();
        let meta = cache
            .database_case_insensitive(database)
            .ok_or_else(|| CatalogError::DatabaseNotFound(database.to_owned()))?;
        cache
            .table_case_insensitive(meta.id, table)
            .cloned()
            .ok_or_else(|| CatalogError::TableNotFound(table.to_owned()).into())
    }

    fn list_tables(&self, database: &str) -> Result<Vec<Arc<TableSchema>>> {
        let cache = self.cache.read();
        let meta = cache
            .database(database)
            .ok_or_else(|| CatalogError::DatabaseNotFound(database.to_owned()))?;
        Ok(cache.tables_of(meta.id))
    }

    fn get_index(&self, table: TableId, name: &str) -> Result<IndexSchema> {
        self.cache
            .read()
            .index(table, name)
            .cloned()
            .ok_or_else(|| IndexError::NotFound(name.to_owned()).into())
    }

    fn list_indexes(&self, table: TableId) -> Result<Vec<IndexSchema>> {
        Ok(self.cache.read().indexes_of(table))
    }

    fn create_index_record(
        &self,
        ctx: &ExecutionContext,
        _txn: &mut Transaction,
        table: &TableSchema,
        def: &IndexDef,
    ) -> Result<IndexSchema> {
        ctx.check()?;
        let cache = self.cache.read();
        if cache.index(table.id, &def.name).is_some() {
            return Err(IndexError::Exists(def.name.clone()).into());
        }
        if def.clustered && cache.has_clustered_index(table.id) {
            return Err(IndexError::ClusteredExists(table.name.clone()).into());
        }
        drop(cache);
        let index_id = self.seqs.lock().next_index_id();
        index_schema_from_def(table, index_id, def)
    }

    fn delete_index_record(
        &self,
        ctx: &ExecutionContext,
        _txn: &mut Transaction,
        _table: &TableSchema,
        _index: &IndexSchema,
    ) -> Result<()> {
        ctx.check()
    }

    fn publish_index(&self, schema: IndexSchema) {
        self.cache.write().insert_index(schema);
    }

    fn retract_index(&self, table: TableId, name: &str) {
        self.cache.write().remove_index(table, name);
    }

    fn next_row_id(
        &self,
        ctx: &ExecutionContext,
        _txn: &mut Transaction,
        database: DatabaseId,
        table: TableId,
    ) -> Result<u64> {
        ctx.check()?;
        let mut seqs = self.seqs.lock();
        let counter = seqs.rows.entry((database, table)).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}
