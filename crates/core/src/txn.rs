//! The engine-level transaction handed to upper layers.
//!
//! A thin layer over [`granitedb_kv::KvTxn`] that threads the execution
//! context through every store access and reports the isolation level the
//! caller asked for. `RepeatableRead` and `Serializable` both run at the
//! store's snapshot isolation; there is nothing weaker to map them to.

use crate::error::Result;
use crate::execution_context::ExecutionContext;
use granitedb_kv::{IsolationLevel, KvTxn, Scan};

pub struct Transaction {
    txn: KvTxn,
    isolation: IsolationLevel,
}

impl Transaction {
    pub(crate) fn new(txn: KvTxn, isolation: IsolationLevel) -> Self {
        Self { txn, isolation }
    }

    /// The isolation level this transaction was opened under.
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn is_read_only(&self) -> bool {
        self.txn.is_read_only()
    }

    pub fn is_closed(&self) -> bool {
        self.txn.is_closed()
    }

    pub fn get(&self, ctx: &ExecutionContext, key: &[u8]) -> Result<Option<Vec<u8>>> {
        ctx.check()?;
        Ok(self.txn.get(key)?)
    }

    pub fn set(&mut self, ctx: &ExecutionContext, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        ctx.check()?;
        Ok(self.txn.set(key, value)?)
    }

    pub fn delete(&mut self, ctx: &ExecutionContext, key: Vec<u8>) -> Result<()> {
        ctx.check()?;
        Ok(self.txn.delete(key)?)
    }

    /// Opens a cursor over the prefix. The cursor borrows this transaction,
    /// so the borrow checker enforces that it is released before commit.
    pub fn scan_prefix(&self, ctx: &ExecutionContext, prefix: &[u8]) -> Result<Scan<'_>> {
        ctx.check()?;
        Ok(self.txn.scan_prefix(prefix)?)
    }

    /// Collects every entry under `prefix`. The cursor is drained and
    /// released before this returns, cancellation checked per entry.
    pub fn list_prefix(
        &self,
        ctx: &ExecutionContext,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        ctx.check()?;
        let mut entries = Vec::new();
        for item in self.txn.scan_prefix(prefix)? {
            ctx.check()?;
            entries.push(item?);
        }
        Ok(entries)
    }

    /// Like [`Transaction::list_prefix`] but discards the values.
    pub fn list_prefix_keys(&self, ctx: &ExecutionContext, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .list_prefix(ctx, prefix)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    pub fn commit(&mut self, ctx: &ExecutionContext) -> Result<()> {
        ctx.check()?;
        Ok(self.txn.commit()?)
    }

    /// Discards all buffered writes. Dropping an open transaction has the
    /// same effect.
    pub fn rollback(&mut self) -> Result<()> {
        Ok(self.txn.rollback()?)
    }
}
