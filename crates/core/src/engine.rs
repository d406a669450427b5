//! The engine façade: owns exactly one KV engine and one catalog, hands out
//! database and table views, and is the only place upper layers can begin
//! transactions. Raw KV primitives are deliberately not exposed.

use crate::catalog::{Catalog, MemoryCatalog, PersistentCatalog};
use crate::config::{CatalogMode, EngineConfig};
use crate::db::database::{Database, DatabaseManager};
use crate::error::{DbError, Result};
use crate::execution_context::ExecutionContext;
use crate::provider::DatabaseProvider;
use crate::txn::Transaction;
use granitedb_kv::{IsolationLevel, KvEngine};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Databases every engine exposes read-only for wire-protocol
/// compatibility. DDL against them fails with `PermissionDenied`.
pub const SYSTEM_DATABASES: [&str; 2] = ["information_schema", "mysql"];

pub(crate) fn is_system_database(name: &str) -> bool {
    SYSTEM_DATABASES
        .iter()
        .any(|system| system.eq_ignore_ascii_case(name))
}

pub(crate) struct EngineInner {
    pub(crate) kv: KvEngine,
    pub(crate) catalog: Box<dyn Catalog>,
    pub(crate) config: EngineConfig,
    /// Serializes index DDL, whose record write and backfill share a
    /// transaction and therefore cannot hide behind the catalog's lock.
    pub(crate) ddl_lock: Mutex<()>,
    closed: AtomicBool,
}

/// The top-level storage engine object. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Opens the engine: the KV store, the catalog (warm cache included)
    /// and the system databases.
    pub fn open(config: EngineConfig) -> Result<Engine> {
        let ctx = ExecutionContext::internal();
        let kv = KvEngine::open(config.kv_config())?;
        let catalog: Box<dyn Catalog> = match config.catalog {
            CatalogMode::Memory => Box::new(MemoryCatalog::new(kv.clone())),
            CatalogMode::Persistent => Box::new(PersistentCatalog::new(kv.clone())),
        };
        catalog.initialize(&ctx)?;

        for name in SYSTEM_DATABASES {
            if catalog.get_database(name).is_err() {
                catalog.create_database(&ctx, name, Vec::new())?;
            }
        }
        log::info!("engine open ({:?} catalog)", config.catalog);

        Ok(Engine {
            inner: Arc::new(EngineInner {
                kv,
                catalog,
                config,
                ddl_lock: Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn databases(&self) -> DatabaseManager {
        DatabaseManager::new(self.inner.clone())
    }

    pub fn create_database(&self, ctx: &ExecutionContext, name: &str) -> Result<Database> {
        self.databases().create(ctx, name)
    }

    pub fn database(&self, name: &str) -> Result<Database> {
        self.databases().open(name)
    }

    pub fn drop_database(&self, ctx: &ExecutionContext, name: &str) -> Result<()> {
        self.databases().drop(ctx, name)
    }

    pub fn list_databases(&self) -> Result<Vec<Database>> {
        self.databases().list()
    }

    /// Begins a read-write transaction at the requested isolation level;
    /// `RepeatableRead` and `Serializable` both run at snapshot isolation.
    pub fn begin_transaction(
        &self,
        ctx: &ExecutionContext,
        isolation: IsolationLevel,
    ) -> Result<Transaction> {
        ctx.check()?;
        Ok(Transaction::new(self.inner.kv.begin(false)?, isolation))
    }

    pub fn begin_read_only_transaction(&self, ctx: &ExecutionContext) -> Result<Transaction> {
        ctx.check()?;
        Ok(Transaction::new(
            self.inner.kv.begin(true)?,
            IsolationLevel::Snapshot,
        ))
    }

    /// Historical reads are not supported by this engine.
    pub fn begin_transaction_as_of(
        &self,
        _ctx: &ExecutionContext,
        _isolation: IsolationLevel,
        _timestamp_micros: i64,
    ) -> Result<Transaction> {
        Err(DbError::NotImplemented("temporal queries"))
    }

    /// The name-resolution view consumed by the SQL engine.
    pub fn provide_catalog(&self) -> DatabaseProvider {
        DatabaseProvider::new(self.inner.clone())
    }

    /// Opportunistic version reclamation; never required for correctness.
    pub fn gc(&self, ratio: f64) -> Result<bool> {
        Ok(self.inner.kv.gc(ratio)?)
    }

    /// Flushes and closes the catalog and the KV engine. Idempotent.
    pub fn shutdown(&self, ctx: &ExecutionContext) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.catalog.shutdown(ctx)?;
        self.inner.kv.close()?;
        log::info!("engine shut down");
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }
}
