//! The embedded ordered key-value engine backing the relational layers:
//! a pluggable byte store (sled on disk, a `BTreeMap` in memory) under an
//! MVCC transaction layer with snapshot isolation, prefix cursors and
//! commit-time write-write conflict detection.

pub mod config;
pub mod error;
pub mod mvcc;
pub mod store;

pub use config::KvConfig;
pub use error::KvError;
pub use mvcc::{KvEngine, KvTxn, Scan};
pub use store::{MemStore, SledStore, Store, StoreIter, WriteBatch};

use derive_more::Display;

/// The degree to which a transaction is isolated from concurrently running
/// transactions.
///
/// The engine natively provides snapshot isolation: every transaction reads
/// a consistent snapshot taken at begin, and a commit fails with a conflict
/// if any of its written keys was also written by a transaction that
/// committed after that snapshot. `RepeatableRead` and `Serializable` are
/// accepted for wire-protocol compatibility and map onto the same snapshot
/// semantics; there is no weaker read path to fall back to.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IsolationLevel {
    RepeatableRead,
    Snapshot,
    Serializable,
}

impl Default for IsolationLevel {
    fn default() -> Self {
        Self::Snapshot
    }
}

impl IsolationLevel {
    /// The isolation actually provided for this requested level.
    pub fn effective(self) -> IsolationLevel {
        IsolationLevel::Snapshot
    }
}
