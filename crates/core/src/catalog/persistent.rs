//! The durable catalog: records in the KV engine under the catalog
//! namespaces, mirrored by a warm cache rebuilt at startup.
//!
//! Every mutation runs in a single serializable transaction; the cache is
//! touched only after commit returns, so concurrent readers never observe
//! partial DDL. DDL statements themselves are serialized by holding the
//! cache write lock for the duration of the mutation.

use super::{
    index_schema_from_def, parse_counter, purge_prefixes, table_schema_from_def, Catalog,
    CatalogCache, SequenceState,
};
use crate::error::{CatalogError, DbError, IndexError, Result};
use crate::execution_context::ExecutionContext;
use crate::txn::Transaction;
use granitedb_codec::{
    key, DatabaseMeta, IndexDef, IndexSchema, SequenceName, TableDef, TableSchema,
};
use granitedb_kv::{IsolationLevel, KvEngine};
use granitedb_primitives::{DatabaseId, TableId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;

pub struct PersistentCatalog {
    kv: KvEngine,
    cache: RwLock<CatalogCache>,
    seqs: Mutex<SequenceState>,
}

impl PersistentCatalog {
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

    fn begin_read(&self) -> Result<Transaction> {
        Ok(Transaction::new(
            self.kv.begin(true)?,
            IsolationLevel::Serializable,
        ))
    }

    fn load_counter(
        &self,
        ctx: &ExecutionContext,
        txn: &Transaction,
        name: SequenceName,
    ) -> Result<u64> {
        match txn.get(ctx, &key::sequence_key(&name))? {
            Some(bytes) => parse_counter(&bytes, &name.to_string()),
            None => Ok(0),
        }
    }
}

impl Catalog for PersistentCatalog {
    fn initialize(&self, ctx: &ExecutionContext) -> Result<()> {
        let txn = self.begin_read()?;

        {
            let mut seqs = self.seqs.lock();
            seqs.database = self.load_counter(ctx, &txn, SequenceName::Database)?;
            seqs.table = self.load_counter(ctx, &txn, SequenceName::Table)?;
            seqs.column = self.load_counter(ctx, &txn, SequenceName::Column)?;
            seqs.index = self.load_counter(ctx, &txn, SequenceName::Index)?;
        }

        let mut cache = self.cache.write();
        cache.clear();

        let mut database_ids = HashSet::new();
        for (_, value) in txn.list_prefix(ctx, &key::database_prefix())? {
            let meta = DatabaseMeta::decode(&value)
                .map_err(|e| DbError::corruption("database record", e))?;
            database_ids.insert(meta.id);
            cache.insert_database(meta);
        }

        let mut table_ids = HashSet::new();
        for (_, value) in txn.list_prefix(ctx, &key::all_table_records_prefix())? {
            let schema = TableSchema::decode(&value)
                .map_err(|e| DbError::corruption("table record", e))?;
            if !database_ids.contains(&schema.database_id) {
                // Left behind by an interrupted drop; the next drop of the
                // same database id clears it.
                log::warn!(
                    "skipping orphan table `{}` of missing database {}",
                    schema.name,
                    schema.database_id
                );
                continue;
            }
            table_ids.insert(schema.id);
            cache.insert_table(Arc::new(schema));
        }

        for (_, value) in txn.list_prefix(ctx, &key::all_index_records_prefix())? {
            let schema = IndexSchema::decode(&value)
                .map_err(|e| DbError::corruption("index record", e))?;
            if !table_ids.contains(&schema.table_id) {
                log::warn!(
                    "skipping orphan index `{}` of missing table {}",
                    schema.name,
                    schema.table_id
                );
                continue;
            }
            cache.insert_index(schema);
        }

        log::info!(
            "catalog warmed: {} databases",
            cache.list_databases().len()
        );
        Ok(())
    }

    fn shutdown(&self, _ctx: &ExecutionContext) -> Result<()> {
        self.kv.flush()?;
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

        let mut txn = self.begin()?;
        let (id, high_water) = {
            let mut seqs = self.seqs.lock();
            (seqs.next_database_id(), seqs.database)
        };
        let meta = DatabaseMeta {
            id,
            name: name.to_owned(),
            properties,
        };
        txn.set(
            ctx,
            key::sequence_key(&SequenceName::Database),
            high_water.to_be_bytes().to_vec(),
        )?;
        txn.set(ctx, key::database_key(id), meta.encode())?;
        txn.commit(ctx)?;

        cache.insert_database(meta.clone());
        log::debug!("created database `{name}` ({id})");
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
                key::table_records_prefix(meta.id),
                key::index_records_db_prefix(meta.id),
                key::data_db_prefix(meta.id),
                key::index_entries_db_prefix(meta.id),
                key::row_sequence_db_prefix(meta.id),
            ],
        )?;
        txn.delete(ctx, key::database_key(meta.id))?;
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

        let mut txn = self.begin()?;
        let mut seqs = self.seqs.lock();
        let table_id = seqs.next_table_id();
        let schema = table_schema_from_def(meta.id, table_id, &def, || seqs.next_column_id())?;
        let (table_hw, column_hw) = (seqs.table, seqs.column);
        drop(seqs);

        txn.set(
            ctx,
            key::sequence_key(&SequenceName::Table),
            table_hw.to_be_bytes().to_vec(),
        )?;
        txn.set(
            ctx,
            key::sequence_key(&SequenceName::Column),
            column_hw.to_be_bytes().to_vec(),
        )?;
        txn.set(ctx, key::table_key(meta.id, table_id), schema.encode())?;
        txn.commit(ctx)?;

        let schema = Arc::new(schema);
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
                key::index_records_prefix(meta.id, schema.id),
                key::data_prefix(meta.id, schema.id),
                key::index_entries_table_prefix(meta.id, schema.id),
            ],
        )?;
        txn.delete(
            ctx,
            key::sequence_key(&SequenceName::Row(meta.id, schema.id)),
        )?;
        txn.delete(ctx, key::table_key(meta.id, schema.id))?;
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

        let mut renamed = (*schema).clone();
        renamed.name = new_name.to_owned();

        let mut txn = self.begin()?;
        txn.set(ctx, key::table_key(meta.id, schema.id), renamed.encode())?;
        txn.commit(ctx)?;

        let indexes = cache.indexes_of(schema.id);
        cache.remove_table(meta.id, table);
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
        txn: &mut Transaction,
        table: &TableSchema,
        def: &IndexDef,
    ) -> Result<IndexSchema> {
        ctx.check()?;
        {
            let cache = self.cache.read();
            if cache.index(table.id, &def.name).is_some() {
                return Err(IndexError::Exists(def.name.clone()).into());
            }
            if def.clustered && cache.has_clustered_index(table.id) {
                return Err(IndexError::ClusteredExists(table.name.clone()).into());
            }
        }
        let (index_id, high_water) = {
            let mut seqs = self.seqs.lock();
            (seqs.next_index_id(), seqs.index)
        };
        let schema = index_schema_from_def(table, index_id, def)?;
        txn.set(
            ctx,
            key::sequence_key(&SequenceName::Index),
            high_water.to_be_bytes().to_vec(),
        )?;
        txn.set(
            ctx,
            key::index_record_key(table.database_id, table.id, index_id),
            schema.encode(),
        )?;
        Ok(schema)
    }

    fn delete_index_record(
        &self,
        ctx: &ExecutionContext,
        txn: &mut Transaction,
        table: &TableSchema,
        index: &IndexSchema,
    ) -> Result<()> {
        txn.delete(
            ctx,
            key::index_record_key(table.database_id, table.id, index.id),
        )
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
        txn: &mut Transaction,
        database: DatabaseId,
        table: TableId,
    ) -> Result<u64> {
        ctx.check()?;
        let sequence = SequenceName::Row(database, table);
        let mut seqs = self.seqs.lock();
        let current = match seqs.rows.get(&(database, table)) {
            Some(value) => *value,
            None => match txn.get(ctx, &key::sequence_key(&sequence))? {
                Some(bytes) => parse_counter(&bytes, &sequence.to_string())?,
                None => 0,
            },
        };
        let next = current + 1;
        seqs.rows.insert((database, table), next);
        txn.set(
            ctx,
            key::sequence_key(&sequence),
            next.to_be_bytes().to_vec(),
        )?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use granitedb_codec::{ColumnDef, LogicalType};
    use granitedb_kv::KvConfig;
    use pretty_assertions::assert_eq;

    fn ctx() -> ExecutionContext {
        ExecutionContext::internal()
    }

    fn open_catalog(kv: &KvEngine) -> PersistentCatalog {
        let catalog = PersistentCatalog::new(kv.clone());
        catalog.initialize(&ctx()).unwrap();
        catalog
    }

    fn mem_kv() -> KvEngine {
        KvEngine::open(KvConfig::default().in_memory()).unwrap()
    }

    fn users_def() -> TableDef {
        TableDef::new("users")
            .with_column(ColumnDef::new("id", LogicalType::I64).not_null())
            .with_column(ColumnDef::new("name", LogicalType::Varchar(32)))
            .with_primary_key(["id"])
    }

    #[test]
    fn records_survive_reopen() {
        let kv = mem_kv();
        {
            let catalog = open_catalog(&kv);
            catalog.create_database(&ctx(), "app", Vec::new()).unwrap();
            catalog.create_table(&ctx(), "app", users_def()).unwrap();
        }

        let catalog = open_catalog(&kv);
        let names: Vec<_> = catalog
            .list_databases()
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["app".to_string()]);
        let schema = catalog.get_table("app", "users").unwrap();
        assert_eq!(schema.columns.len(), 2);
    }

    #[test]
    fn minted_ids_stay_monotonic_across_reopen() {
        let kv = mem_kv();
        let first = {
            let catalog = open_catalog(&kv);
            catalog.create_database(&ctx(), "a", Vec::new()).unwrap().id
        };

        let catalog = open_catalog(&kv);
        let second = catalog.create_database(&ctx(), "b", Vec::new()).unwrap().id;
        assert!(second.idx() > first.idx());
    }

    #[test]
    fn dropping_a_database_removes_every_descendant_key() {
        let kv = mem_kv();
        let catalog = open_catalog(&kv);
        let meta = catalog.create_database(&ctx(), "app", Vec::new()).unwrap();
        catalog.create_table(&ctx(), "app", users_def()).unwrap();
        catalog.drop_database(&ctx(), "app").unwrap();

        assert!(matches!(
            catalog.list_tables("app"),
            Err(DbError::Catalog(CatalogError::DatabaseNotFound(_)))
        ));
        let txn = catalog.begin_read().unwrap();
        for prefix in [
            key::table_records_prefix(meta.id),
            key::data_db_prefix(meta.id),
            key::index_entries_db_prefix(meta.id),
        ] {
            assert!(txn.list_prefix(&ctx(), &prefix).unwrap().is_empty());
        }
        assert!(txn
            .get(&ctx(), &key::database_key(meta.id))
            .unwrap()
            .is_none());
    }

    #[test]
    fn orphan_records_are_skipped_on_initialize() {
        let kv = mem_kv();
        {
            let catalog = open_catalog(&kv);
            catalog.create_database(&ctx(), "app", Vec::new()).unwrap();
        }

        // Hand-write a table record pointing at a database that was never
        // created, as an interrupted drop would leave behind.
        let orphan = TableSchema {
            id: TableId::new(77),
            database_id: DatabaseId::new(99),
            name: "ghost".into(),
            columns: Vec::new(),
            primary_key: granitedb_primitives::col_list([]),
            options: Vec::new(),
        };
        let mut txn = Transaction::new(kv.begin(false).unwrap(), IsolationLevel::Serializable);
        txn.set(
            &ctx(),
            key::table_key(orphan.database_id, orphan.id),
            orphan.encode(),
        )
        .unwrap();
        txn.commit(&ctx()).unwrap();

        let catalog = open_catalog(&kv);
        assert_eq!(catalog.list_databases().unwrap().len(), 1);
        assert!(catalog.list_tables("app").unwrap().is_empty());
    }

    #[test]
    fn rename_preserves_indexes_and_id() {
        let kv = mem_kv();
        let catalog = open_catalog(&kv);
        catalog.create_database(&ctx(), "app", Vec::new()).unwrap();
        let schema = catalog.create_table(&ctx(), "app", users_def()).unwrap();

        let mut txn = Transaction::new(kv.begin(false).unwrap(), IsolationLevel::Serializable);
        let index = catalog
            .create_index_record(&ctx(), &mut txn, &schema, &IndexDef::new("ix", ["name"]))
            .unwrap();
        txn.commit(&ctx()).unwrap();
        catalog.publish_index(index);

        let renamed = catalog
            .rename_table(&ctx(), "app", "users", "people")
            .unwrap();
        assert_eq!(renamed.id, schema.id);
        assert_eq!(catalog.list_indexes(schema.id).unwrap().len(), 1);
        assert!(catalog.get_table("app", "users").is_err());
        assert!(catalog.get_table("app", "people").is_ok());
    }
}
