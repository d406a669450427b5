use std::path::PathBuf;

/// Configuration for opening a [`crate::KvEngine`].
#[derive(Debug, Clone)]
pub struct KvConfig {
    /// Root directory for the store's files. Required unless `in_memory`.
    pub path: Option<PathBuf>,
    /// Keep everything in memory; no directory is touched.
    pub in_memory: bool,
    /// Size threshold for the store's resident segment bytes.
    pub value_log_file_size: u64,
    /// Flush to disk after every commit. Turning this off trades durability
    /// of the most recent commits for throughput.
    pub sync_writes: bool,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            path: None,
            in_memory: false,
            value_log_file_size: 1 << 30,
            sync_writes: true,
        }
    }
}

impl KvConfig {
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
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
}
