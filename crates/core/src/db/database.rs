//! Logical databases: namespaces in the shared keyspace.
//!
//! A `Database` is a view (metadata plus an engine handle); opening and
//! closing one allocates nothing beyond the handle, since a single KV
//! store backs every logical database.

use crate::db::table::Table;
use crate::engine::{is_system_database, EngineInner};
use crate::error::{CatalogError, Result};
use crate::execution_context::ExecutionContext;
use granitedb_codec::{DatabaseMeta, TableDef};
use granitedb_primitives::DatabaseId;
use std::sync::Arc;

/// Lifecycle of logical databases over the catalog.
pub struct DatabaseManager {
    inner: Arc<EngineInner>,
}

impl DatabaseManager {
    pub(crate) fn new(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    pub fn create(&self, ctx: &ExecutionContext, name: &str) -> Result<Database> {
        if is_system_database(name) {
            return Err(CatalogError::PermissionDenied(name.to_owned()).into());
        }
        let meta = self.inner.catalog.create_database(ctx, name, Vec::new())?;
        Ok(Database::new(meta, self.inner.clone()))
    }

    /// Opens an existing database; exact-match lookup.
    pub fn open(&self, name: &str) -> Result<Database> {
        let meta = self.inner.catalog.get_database(name)?;
        Ok(Database::new(meta, self.inner.clone()))
    }

    /// Case-insensitive variant of [`DatabaseManager::open`] for
    /// wire-protocol name resolution.
    pub fn open_case_insensitive(&self, name: &str) -> Result<Database> {
        let meta = self.inner.catalog.get_database_case_insensitive(name)?;
        Ok(Database::new(meta, self.inner.clone()))
    }

    /// Validates that the database exists. Handles are views, so there is
    /// nothing further to release.
    pub fn close(&self, name: &str) -> Result<()> {
        self.inner.catalog.get_database(name).map(|_| ())
    }

    pub fn drop(&self, ctx: &ExecutionContext, name: &str) -> Result<()> {
        if is_system_database(name) {
            return Err(CatalogError::PermissionDenied(name.to_owned()).into());
        }
        self.inner.catalog.drop_database(ctx, name)
    }

    pub fn list(&self) -> Result<Vec<Database>> {
        Ok(self
            .inner
            .catalog
            .list_databases()?
            .into_iter()
            .map(|meta| Database::new(meta, self.inner.clone()))
            .collect())
    }
}

/// A handle to one logical database.
pub struct Database {
    meta: DatabaseMeta,
    inner: Arc<EngineInner>,
}

impl Database {
    pub(crate) fn new(meta: DatabaseMeta, inner: Arc<EngineInner>) -> Self {
        Self { meta, inner }
    }

    pub fn id(&self) -> DatabaseId {
        self.meta.id
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn meta(&self) -> &DatabaseMeta {
        &self.meta
    }

    fn check_writable(&self) -> Result<()> {
        if is_system_database(&self.meta.name) {
            return Err(CatalogError::PermissionDenied(self.meta.name.clone()).into());
        }
        Ok(())
    }

    pub fn create_table(&self, ctx: &ExecutionContext, def: TableDef) -> Result<Table> {
        self.check_writable()?;
        let schema = self.inner.catalog.create_table(ctx, &self.meta.name, def)?;
        Ok(Table::new(self.inner.clone(), schema))
    }

    pub fn drop_table(&self, ctx: &ExecutionContext, name: &str) -> Result<()> {
        self.check_writable()?;
        self.inner.catalog.drop_table(ctx, &self.meta.name, name)
    }

    pub fn rename_table(
        &self,
        ctx: &ExecutionContext,
        name: &str,
        new_name: &str,
    ) -> Result<Table> {
        self.check_writable()?;
        let schema = self
            .inner
            .catalog
            .rename_table(ctx, &self.meta.name, name, new_name)?;
        Ok(Table::new(self.inner.clone(), schema))
    }

    pub fn table(&self, name: &str) -> Result<Table> {
        let schema = self.inner.catalog.get_table(&self.meta.name, name)?;
        Ok(Table::new(self.inner.clone(), schema))
    }

    pub fn table_case_insensitive(&self, name: &str) -> Result<Table> {
        let schema = self
            .inner
            .catalog
            .get_table_case_insensitive(&self.meta.name, name)?;
        Ok(Table::new(self.inner.clone(), schema))
    }

    pub fn list_tables(&self) -> Result<Vec<Table>> {
        Ok(self
            .inner
            .catalog
            .list_tables(&self.meta.name)?
            .into_iter()
            .map(|schema| Table::new(self.inner.clone(), schema))
            .collect())
    }
}
