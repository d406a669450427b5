use granitedb_kv::KvConfig;
use std::path::PathBuf;

/// Which catalog implementation an engine runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CatalogMode {
    /// Durable catalog with a warm cache; the default.
    #[default]
    Persistent,
    /// Volatile catalog for tests and transient engines. Schemas are lost
    /// on shutdown, so this is normally paired with an in-memory store.
    Memory,
}

/// Engine configuration. Loading this from files or flags is the job of an
/// outer layer; the engine only consumes the resolved values.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory for the store's files. Mandatory unless `in_memory`.
    pub data_dir: Option<PathBuf>,
    /// Run entirely in memory; no directory is used.
    pub in_memory: bool,
    /// Size threshold for the store's segment files.
    pub value_log_file_size: u64,
    /// fsync on every commit.
    pub sync_writes: bool,
    pub catalog: CatalogMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            in_memory: false,
            value_log_file_size: 1 << 30,
            sync_writes: true,
            catalog: CatalogMode::Persistent,
        }
    }
}

impl EngineConfig {
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }

    pub fn with_catalog(mut self, mode: CatalogMode) -> Self {
        self.catalog = mode;
        self
    }

    pub fn with_value_log_file_size(mut self, bytes: u64) -> Self {
        self.value_log_file_size = bytes;
        self
    }

    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    pub(crate) fn kv_config(&self) -> KvConfig {
        let mut kv = KvConfig::default()
            .with_value_log_file_size(self.value_log_file_size)
            .with_sync_writes(self.sync_writes);
        if self.in_memory {
            kv = kv.in_memory();
        } else if let Some(dir) = &self.data_dir {
            kv = kv.with_path(dir.clone());
        }
        kv
    }
}
