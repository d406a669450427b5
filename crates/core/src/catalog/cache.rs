//! The in-memory mirror of catalog records.
//!
//! Shared by both catalog implementations: the memory catalog uses it as its
//! only storage, the persistent catalog as a warm cache reloaded at startup
//! and mutated strictly after a commit succeeds.

use granitedb_codec::{DatabaseMeta, IndexSchema, TableSchema};
use granitedb_primitives::{DatabaseId, TableId};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub(crate) struct CatalogCache {
    databases: HashMap<String, DatabaseMeta>,
    tables: HashMap<DatabaseId, HashMap<String, Arc<TableSchema>>>,
    indexes: HashMap<TableId, HashMap<String, IndexSchema>>,
}

impl CatalogCache {
    pub fn database(&self, name: &str) -> Option<&DatabaseMeta> {
        self.databases.get(name)
    }

    /// Exact match wins; otherwise the first ASCII-case-insensitive match
    /// in name order, for wire-protocol compatibility.
    pub fn database_case_insensitive(&self, name: &str) -> Option<&DatabaseMeta> {
        if let Some(meta) = self.databases.get(name) {
            return Some(meta);
        }
        self.databases
            .iter()
            .filter(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .min_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, meta)| meta)
    }

    pub fn insert_database(&mut self, meta: DatabaseMeta) {
        self.tables.entry(meta.id).or_default();
        self.databases.insert(meta.name.clone(), meta);
    }

    /// Removes a database and every table and index under it.
    pub fn remove_database(&mut self, name: &str) -> Option<DatabaseMeta> {
        let meta = self.databases.remove(name)?;
        if let Some(tables) = self.tables.remove(&meta.id) {
            for schema in tables.values() {
                self.indexes.remove(&schema.id);
            }
        }
        Some(meta)
    }

    pub fn list_databases(&self) -> Vec<DatabaseMeta> {
        let mut all: Vec<_> = self.databases.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn table(&self, database: DatabaseId, name: &str) -> Option<&Arc<TableSchema>> {
        self.tables.get(&database)?.get(name)
    }

    pub fn table_case_insensitive(
        &self,
        database: DatabaseId,
        name: &str,
    ) -> Option<&Arc<TableSchema>> {
        let tables = self.tables.get(&database)?;
        if let Some(schema) = tables.get(name) {
            return Some(schema);
        }
        tables
            .iter()
            .filter(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .min_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, schema)| schema)
    }

    pub fn tables_of(&self, database: DatabaseId) -> Vec<Arc<TableSchema>> {
        let mut all: Vec<_> = self
            .tables
            .get(&database)
            .map(|tables| tables.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn insert_table(&mut self, schema: Arc<TableSchema>) {
        self.indexes.entry(schema.id).or_default();
        self.tables
            .entry(schema.database_id)
            .or_default()
            .insert(schema.name.clone(), schema);
    }

    pub fn remove_table(&mut self, database: DatabaseId, name: &str) -> Option<Arc<TableSchema>> {
        let schema = self.tables.get_mut(&database)?.remove(name)?;
        self.indexes.remove(&schema.id);
        Some(schema)
    }

    pub fn index(&self, table: TableId, name: &str) -> Option<&IndexSchema> {
        self.indexes.get(&table)?.get(name)
    }

    pub fn indexes_of(&self, table: TableId) -> Vec<IndexSchema> {
        let mut all: Vec<_> = self
            .indexes
            .get(&table)
            .map(|indexes| indexes.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn insert_index(&mut self, schema: IndexSchema) {
        self.indexes
            .entry(schema.table_id)
            .or_default()
            .insert(schema.name.clone(), schema);
    }

    pub fn remove_index(&mut self, table: TableId, name: &str) -> Option<IndexSchema> {
        self.indexes.get_mut(&table)?.remove(name)
    }

    pub fn has_clustered_index(&self, table: TableId) -> bool {
        self.indexes
            .get(&table)
            .is_some_and(|indexes| indexes.values().any(|index| index.clustered))
    }

    pub fn clear(&mut self) {
        self.databases.clear();
        self.tables.clear();
        self.indexes.clear();
    }
}
