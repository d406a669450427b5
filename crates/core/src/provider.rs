//! The database-provider view exported to the external SQL engine.
//!
//! The SQL layer resolves names through this object during analysis and
//! execution; it never sees the KV engine or raw keys.

use crate::db::database::Database;
use crate::db::table::Table;
use crate::engine::EngineInner;
use crate::error::Result;
use std::sync::Arc;

pub struct DatabaseProvider {
    inner: Arc<EngineInner>,
}

impl DatabaseProvider {
    pub(crate) fn new(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    /// Resolves a database by exact name.
    pub fn database(&self, name: &str) -> Result<Database> {
        let meta = self.inner.catalog.get_database(name)?;
        Ok(Database::new(meta, self.inner.clone()))
    }

    pub fn all_databases(&self) -> Result<Vec<Database>> {
        Ok(self
            .inner
            .catalog
            .list_databases()?
            .into_iter()
            .map(|meta| Database::new(meta, self.inner.clone()))
            .collect())
    }

    /// Resolves a table by exact database and table name.
    pub fn table(&self, database: &str, name: &str) -> Result<Table> {
        let schema = self.inner.catalog.get_table(database, name)?;
        Ok(Table::new(self.inner.clone(), schema))
    }

    /// Case-insensitive table resolution, as the wire protocol requires.
    pub fn table_case_insensitive(&self, database: &str, name: &str) -> Result<Table> {
        let schema = self
            .inner
            .catalog
            .get_table_case_insensitive(database, name)?;
        Ok(Table::new(self.inner.clone(), schema))
    }
}
