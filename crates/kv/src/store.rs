//! Physical storage backends.
//!
//! A [`Store`] is a plain ordered byte map with atomic batch writes; all
//! transaction semantics live a layer up in [`crate::mvcc`]. Two backends
//! exist: [`SledStore`] for durable engines and [`MemStore`] for in-memory
//! engines and tests.

use crate::config::KvConfig;
use crate::error::KvError;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;

pub type StoreIter = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>), KvError>> + Send>;

pub trait Store: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    /// Iterates every entry whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> StoreIter;

    /// Applies `batch` atomically: either every op is visible after this
    /// returns, or none is (even across a crash).
    fn apply(&self, batch: WriteBatch) -> Result<(), KvError>;

    /// Flushes buffered writes to stable storage.
    fn flush(&self) -> Result<(), KvError>;
}

/// An ordered set of put/delete ops applied as one atomic unit.
#[derive(Default)]
pub struct WriteBatch {
    pub(crate) ops: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push((key, Some(value)));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push((key, None));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>, config: &KvConfig) -> Result<Self, KvError> {
        let db = sled::Config::default()
            .path(path)
            .cache_capacity(config.value_log_file_size)
            .flush_every_ms(Some(50))
            .mode(sled::Mode::HighThroughput)
            .open()?;
        Ok(Self { db })
    }
}

impl Store for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StoreIter {
        Box::new(
            self.db
                .scan_prefix(prefix)
                .map(|res| res.map(|(k, v)| (k.to_vec(), v.to_vec())).map_err(KvError::from)),
        )
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), KvError> {
        let mut inner = sled::Batch::default();
        for (key, value) in batch.ops {
            match value {
                Some(value) => inner.insert(key, value),
                None => inner.remove(key),
            }
        }
        self.db.apply_batch(inner)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), KvError> {
        self.db.flush()?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StoreIter {
        // Materialized under the read lock; scans see a stable snapshot of
        // the backing map and hold no lock while the caller drives them.
        let entries: Vec<_> = self
            .data
            .read()
            .range((Bound::Included(prefix.to_vec()), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Box::new(entries.into_iter().map(Ok))
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), KvError> {
        let mut data = self.data.write();
        for (key, value) in batch.ops {
            match value {
                Some(value) => {
                    data.insert(key, value);
                }
                None => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), KvError> {
        Ok(())
    }
}
