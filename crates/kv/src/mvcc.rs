//! Snapshot-isolated transactions over a [`Store`].
//!
//! Committed data is multi-versioned: each commit writes its keys under a
//! fresh version number, and a transaction only ever reads the newest
//! version at or below the snapshot it took at begin. Uncommitted writes
//! live in the transaction's in-memory write set, overlaid on the committed
//! view for read-your-writes, and reach the store only as one atomic batch
//! at commit. A crash therefore never leaves partial transactions behind;
//! recovery is just re-reading the persisted version counter.
//!
//! Write-write conflicts are detected at commit: every key in the write set
//! is checked for a version committed after this transaction's snapshot,
//! and any hit fails the commit with [`KvError::TxnConflict`].
//!
//! Store layout:
//!
//! ```text
//! 0x00 ‖ "next_version"                      -> u64 BE   (version counter)
//! 0x01 ‖ esc(user_key) ‖ 0x00 0x00 ‖ u64 BE -> 0x00      (tombstone)
//!                                            | 0x01 ‖ payload
//! ```
//!
//! `esc` escapes `0x00` as `0x00 0xFF` and the terminator is `0x00 0x00`,
//! so version keys order first by user key and then by version, and a
//! prefix of user keys is also a byte prefix of their version keys.

use crate::config::KvConfig;
use crate::error::KvError;
use crate::store::{MemStore, SledStore, Store, StoreIter, WriteBatch};
use parking_lot::{Mutex, MutexGuard};
use std::collections::btree_map::Range;
use std::collections::BTreeMap;
use std::iter::Peekable;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const AREA_META: u8 = 0x00;
const AREA_DATA: u8 = 0x01;

const TOMBSTONE: u8 = 0x00;
const PUT: u8 = 0x01;

fn next_version_key() -> Vec<u8> {
    let mut key = vec![AREA_META];
    key.extend_from_slice(b"next_version");
    key
}

fn escape_into(buf: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        if b == 0x00 {
            buf.push(0x00);
            buf.push(0xFF);
        } else {
            buf.push(b);
        }
    }
}

fn unescape(bytes: &[u8]) -> Result<Vec<u8>, KvError> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter();
    while let Some(&b) = iter.next() {
        if b == 0x00 {
            match iter.next() {
                Some(0xFF) => out.push(0x00),
                _ => return Err(KvError::Corruption("bad escape in version key".into())),
            }
        } else {
            out.push(b);
        }
    }
    Ok(out)
}

fn version_key(user_key: &[u8], version: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(user_key.len() + 11);
    key.push(AREA_DATA);
    escape_into(&mut key, user_key);
    key.push(0x00);
    key.push(0x00);
    key.extend_from_slice(&version.to_be_bytes());
    key
}

/// Prefix selecting every version of exactly `user_key`.
fn versions_prefix(user_key: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(user_key.len() + 3);
    key.push(AREA_DATA);
    escape_into(&mut key, user_key);
    key.push(0x00);
    key.push(0x00);
    key
}

/// Prefix selecting every version of every user key starting with
/// `user_prefix`. Escaping is context-free, so a byte prefix of user keys
/// is also a byte prefix of their escaped forms.
fn area_prefix(user_prefix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(user_prefix.len() + 1);
    key.push(AREA_DATA);
    escape_into(&mut key, user_prefix);
    key
}

/// Splits a raw version key into `(user_key, version)`.
fn decode_version_key(raw: &[u8]) -> Result<(Vec<u8>, u64), KvError> {
    let corrupt = || KvError::Corruption("malformed version key".into());
    if raw.len() < 11 || raw[0] != AREA_DATA {
        return Err(corrupt());
    }
    let (body, ver) = raw[1..].split_at(raw.len() - 9);
    let version = u64::from_be_bytes(ver.try_into().map_err(|_| corrupt())?);
    let escaped = body.strip_suffix(&[0x00, 0x00]).ok_or_else(corrupt)?;
    Ok((unescape(escaped)?, version))
}

fn encode_payload(value: Option<&[u8]>) -> Vec<u8> {
    match value {
        Some(value) => {
            let mut out = Vec::with_capacity(value.len() + 1);
            out.push(PUT);
            out.extend_from_slice(value);
            out
        }
        None => vec![TOMBSTONE],
    }
}

fn decode_payload(raw: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
    match raw.first() {
        Some(&TOMBSTONE) => Ok(None),
        Some(&PUT) => Ok(Some(raw[1..].to_vec())),
        _ => Err(KvError::Corruption("malformed version payload".into())),
    }
}

/// The exclusive upper bound of `prefix`'s key range, or `None` when the
/// prefix is all `0xFF` and the range is unbounded above.
fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last == 0xFF {
            end.pop();
        } else {
            *last += 1;
            return Some(end);
        }
    }
    None
}

struct EngineInner {
    store: Box<dyn Store>,
    config: KvConfig,
    /// Next commit version. Locked for the whole of commit, making it the
    /// commit serialization point.
    next_version: Mutex<u64>,
    /// Snapshot versions of live transactions; the GC horizon is the oldest.
    active: Mutex<BTreeMap<u64, usize>>,
    closed: AtomicBool,
}

/// The ordered KV engine. Cheap to clone; all clones share one store.
#[derive(Clone)]
pub struct KvEngine {
    inner: Arc<EngineInner>,
}

impl KvEngine {
    /// Opens (or creates) an engine as described by `config`.
    pub fn open(config: KvConfig) -> Result<Self, KvError> {
        let store: Box<dyn Store> = if config.in_memory {
            Box::new(MemStore::new())
        } else {
            let path = config
                .path
                .as_ref()
                .ok_or_else(|| KvError::Config("data path is required unless in-memory".into()))?;
            Box::new(SledStore::open(path, &config)?)
        };

        let next_version = match store.get(&next_version_key())? {
            Some(raw) => u64::from_be_bytes(
                raw.as_slice()
                    .try_into()
                    .map_err(|_| KvError::Corruption("malformed version counter".into()))?,
            ),
            None => 1,
        };
        log::debug!("kv engine opened at version {next_version}");

        Ok(Self {
            inner: Arc::new(EngineInner {
                store,
                config,
                next_version: Mutex::new(next_version),
                active: Mutex::new(BTreeMap::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Begins a snapshot-isolated transaction.
    pub fn begin(&self, read_only: bool) -> Result<KvTxn, KvError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(KvError::Closed);
        }
        let next_version = self.inner.next_version.lock();
        let snapshot = *next_version - 1;
        *self.inner.active.lock().entry(snapshot).or_insert(0) += 1;
        drop(next_version);
        Ok(KvTxn {
            inner: self.inner.clone(),
            snapshot,
            write_set: BTreeMap::new(),
            read_only,
            closed: false,
        })
    }

    /// Opportunistically drops versions superseded before the oldest live
    /// snapshot. Returns whether anything was reclaimed; a garbage share
    /// below `ratio` leaves the store untouched.
    pub fn gc(&self, ratio: f64) -> Result<bool, KvError> {
        let horizon = {
            let next_version = self.inner.next_version.lock();
            let active = self.inner.active.lock();
            active.keys().next().copied().unwrap_or(*next_version - 1)
        };

        let mut scanned = 0usize;
        let mut garbage: Vec<Vec<u8>> = Vec::new();
        let mut current_key: Option<Vec<u8>> = None;
        // The newest version <= horizon seen so far for the current key;
        // (raw key, is_tombstone).
        let mut survivor: Option<(Vec<u8>, bool)> = None;
        let mut has_future = false;

        let finish_key = |survivor: &mut Option<(Vec<u8>, bool)>,
                              has_future: &mut bool,
                              garbage: &mut Vec<Vec<u8>>| {
            // A surviving tombstone with no newer versions pins nothing;
            // the key is simply gone.
            if let Some((raw, true)) = survivor.take() {
                if !*has_future {
                    garbage.push(raw);
                }
            }
            *has_future = false;
        };

        for item in self.inner.store.scan_prefix(&[AREA_DATA]) {
            let (raw_key, raw_value) = item?;
            let (user_key, version) = decode_version_key(&raw_key)?;
            scanned += 1;
            if current_key.as_deref() != Some(user_key.as_slice()) {
                finish_key(&mut survivor, &mut has_future, &mut garbage);
                current_key = Some(user_key);
            }
            if version <= horizon {
                // This version supersedes any older survivor.
                if let Some((old, _)) = survivor.take() {
                    garbage.push(old);
                }
                let tombstone = raw_value.first() == Some(&TOMBSTONE);
                survivor = Some((raw_key, tombstone));
            } else {
                has_future = true;
            }
        }
        finish_key(&mut survivor, &mut has_future, &mut garbage);

        if scanned == 0 || (garbage.len() as f64) < ratio * (scanned as f64) {
            return Ok(false);
        }
        log::info!(
            "kv gc reclaiming {} of {} version records (horizon {horizon})",
            garbage.len(),
            scanned
        );
        let mut batch = WriteBatch::new();
        let reclaimed = !garbage.is_empty();
        for raw_key in garbage {
            batch.delete(raw_key);
        }
        self.inner.store.apply(batch)?;
        Ok(reclaimed)
    }

    /// Flushes buffered writes to stable storage.
    pub fn flush(&self) -> Result<(), KvError> {
        self.inner.store.flush()
    }

    /// Flushes and marks the engine closed. Idempotent.
    pub fn close(&self) -> Result<(), KvError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.store.flush()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &KvConfig {
        &self.inner.config
    }
}

/// Reads the newest committed version of `key` visible at `snapshot`.
fn committed_get(
    store: &dyn Store,
    key: &[u8],
    snapshot: u64,
) -> Result<Option<Vec<u8>>, KvError> {
    let mut best: Option<Vec<u8>> = None;
    for item in store.scan_prefix(&versions_prefix(key)) {
        let (raw_key, raw_value) = item?;
        let (_, version) = decode_version_key(&raw_key)?;
        if version > snapshot {
            break;
        }
        best = Some(raw_value);
    }
    match best {
        Some(raw) => decode_payload(&raw),
        None => Ok(None),
    }
}

/// The newest committed version number of `key`, visible or not.
fn newest_version(store: &dyn Store, key: &[u8]) -> Result<Option<u64>, KvError> {
    let mut newest = None;
    for item in store.scan_prefix(&versions_prefix(key)) {
        let (raw_key, _) = item?;
        let (_, version) = decode_version_key(&raw_key)?;
        newest = Some(version);
    }
    Ok(newest)
}

/// A snapshot-isolated transaction.
///
/// Reads observe the snapshot taken at begin plus this transaction's own
/// writes. Writes stay in memory until [`KvTxn::commit`]. Dropping an open
/// transaction rolls it back.
pub struct KvTxn {
    inner: Arc<EngineInner>,
    snapshot: u64,
    write_set: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    read_only: bool,
    closed: bool,
}

impl KvTxn {
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The version this transaction reads at.
    pub fn snapshot_version(&self) -> u64 {
        self.snapshot
    }

    fn check_open(&self) -> Result<(), KvError> {
        if self.closed {
            Err(KvError::TxnClosed)
        } else {
            Ok(())
        }
    }

    fn check_writable(&self) -> Result<(), KvError> {
        self.check_open()?;
        if self.read_only {
            Err(KvError::TxnReadOnly)
        } else {
            Ok(())
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        self.check_open()?;
        if let Some(value) = self.write_set.get(key) {
            return Ok(value.clone());
        }
        committed_get(&*self.inner.store, key, self.snapshot)
    }

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), KvError> {
        self.check_writable()?;
        self.write_set.insert(key, Some(value));
        Ok(())
    }

    pub fn delete(&mut self, key: Vec<u8>) -> Result<(), KvError> {
        self.check_writable()?;
        self.write_set.insert(key, None);
        Ok(())
    }

    /// Opens a cursor over every visible entry whose key starts with
    /// `prefix`, own writes overlaid on the committed snapshot.
    ///
    /// The cursor borrows the transaction, so it cannot outlive it, and the
    /// transaction cannot commit or write while a cursor is open.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Scan<'_>, KvError> {
        self.check_open()?;
        let committed = VisibleIter {
            iter: self.inner.store.scan_prefix(&area_prefix(prefix)),
            snapshot: self.snapshot,
            carry: None,
        };
        let upper = match prefix_end(prefix) {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        let written = self
            .write_set
            .range((Bound::Included(prefix.to_vec()), upper));
        Ok(Scan {
            committed: committed.peekable(),
            written: written.peekable(),
        })
    }

    /// Commits the write set atomically, or fails with
    /// [`KvError::TxnConflict`] if any written key gained a version after
    /// this transaction's snapshot. Either way the transaction is closed.
    pub fn commit(&mut self) -> Result<(), KvError> {
        self.check_open()?;
        let result = self.commit_inner();
        self.release();
        result
    }

    fn commit_inner(&mut self) -> Result<(), KvError> {
        if self.write_set.is_empty() {
            return Ok(());
        }
        let inner = self.inner.clone();
        let mut next_version: MutexGuard<'_, u64> = inner.next_version.lock();

        for key in self.write_set.keys() {
            if let Some(version) = newest_version(&*inner.store, key)? {
                if version > self.snapshot {
                    return Err(KvError::TxnConflict);
                }
            }
        }

        let commit_version = *next_version;
        let mut batch = WriteBatch::new();
        for (key, value) in &self.write_set {
            batch.set(version_key(key, commit_version), encode_payload(value.as_deref()));
        }
        batch.set(next_version_key(), (commit_version + 1).to_be_bytes().to_vec());

        inner.store.apply(batch)?;
        // The batch is in; the counter must advance even if the flush
        // below fails, or the next commit would reuse this version.
        *next_version = commit_version + 1;
        if inner.config.sync_writes {
            inner.store.flush()?;
        }
        Ok(())
    }

    /// Discards the write set and closes the transaction.
    pub fn rollback(&mut self) -> Result<(), KvError> {
        self.check_open()?;
        self.write_set.clear();
        self.release();
        Ok(())
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut active = self.inner.active.lock();
        if let Some(count) = active.get_mut(&self.snapshot) {
            *count -= 1;
            if *count == 0 {
                active.remove(&self.snapshot);
            }
        }
    }
}

impl Drop for KvTxn {
    fn drop(&mut self) {
        self.release();
    }
}

/// Yields the newest visible committed value per user key, skipping
/// tombstones. Input records arrive ordered by (user key, version).
struct VisibleIter {
    iter: StoreIter,
    snapshot: u64,
    carry: Option<(Vec<u8>, u64, Vec<u8>)>,
}

impl VisibleIter {
    fn pull(&mut self) -> Option<Result<(Vec<u8>, u64, Vec<u8>), KvError>> {
        if let Some(item) = self.carry.take() {
            return Some(Ok(item));
        }
        let (raw_key, raw_value) = match self.iter.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e)),
        };
        match decode_version_key(&raw_key) {
            Ok((user_key, version)) => Some(Ok((user_key, version, raw_value))),
            Err(e) => Some(Err(e)),
        }
    }
}

impl Iterator for VisibleIter {
    type Item = Result<(Vec<u8>, Option<Vec<u8>>), KvError>;

    fn next(&mut self) -> Option<Self::Item> {
        'group: loop {
            let (user_key, version, raw_value) = match self.pull()? {
                Ok(item) => item,
                Err(e) => return Some(Err(e)),
            };
            let mut best = (version <= self.snapshot).then_some(raw_value);
            loop {
                match self.pull() {
                    None => break,
                    Some(Err(e)) => return Some(Err(e)),
                    Some(Ok((next_key, next_version, next_value))) => {
                        if next_key == user_key {
                            if next_version <= self.snapshot {
                                best = Some(next_value);
                            }
                        } else {
                            self.carry = Some((next_key, next_version, next_value));
                            break;
                        }
                    }
                }
            }
            match best {
                None => continue 'group,
                Some(raw) => match decode_payload(&raw) {
                    Err(e) => return Some(Err(e)),
                    Ok(None) => continue 'group,
                    Ok(Some(value)) => return Some(Ok((user_key, Some(value)))),
                },
            }
        }
    }
}

/// A prefix cursor merging the committed snapshot with the transaction's
/// write set, in key order.
pub struct Scan<'a> {
    committed: Peekable<VisibleIter>,
    written: Peekable<Range<'a, Vec<u8>, Option<Vec<u8>>>>,
}

impl Iterator for Scan<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>), KvError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let take_committed = match (self.committed.peek(), self.written.peek()) {
                (None, None) => return None,
                (Some(Err(_)), _) => {
                    let err = self.committed.next().expect("peeked").unwrap_err();
                    return Some(Err(err));
                }
                (Some(Ok((ck, _))), Some((wk, _))) => match ck.as_slice().cmp(wk.as_slice()) {
                    std::cmp::Ordering::Less => true,
                    std::cmp::Ordering::Equal => {
                        // Own write shadows the committed value.
                        self.committed.next();
                        false
                    }
                    std::cmp::Ordering::Greater => false,
                },
                (Some(Ok(_)), None) => true,
                (None, Some(_)) => false,
            };
            if take_committed {
                let (key, value) = match self.committed.next().expect("peeked") {
                    Ok(entry) => entry,
                    Err(e) => return Some(Err(e)),
                };
                return Some(Ok((key, value.expect("visible iter yields puts only"))));
            }
            let (key, value) = self.written.next().expect("peeked");
            match value {
                // Deleted in this transaction.
                None => continue,
                Some(value) => return Some(Ok((key.clone(), value.clone()))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mem_engine() -> KvEngine {
        KvEngine::open(KvConfig::default().in_memory()).unwrap()
    }

    fn collect(scan: Scan<'_>) -> Vec<(Vec<u8>, Vec<u8>)> {
        scan.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn read_your_writes_and_snapshot_reads() {
        let engine = mem_engine();

        let mut setup = engine.begin(false).unwrap();
        setup.set(b"k".to_vec(), b"v1".to_vec()).unwrap();
        setup.commit().unwrap();

        let mut t1 = engine.begin(false).unwrap();
        let t2 = engine.begin(true).unwrap();

        t1.set(b"k".to_vec(), b"v2".to_vec()).unwrap();
        assert_eq!(t1.get(b"k").unwrap(), Some(b"v2".to_vec()));
        // t2 still sees the committed value, before and after t1 commits.
        assert_eq!(t2.get(b"k").unwrap(), Some(b"v1".to_vec()));
        t1.commit().unwrap();
        assert_eq!(t2.get(b"k").unwrap(), Some(b"v1".to_vec()));

        let t3 = engine.begin(true).unwrap();
        assert_eq!(t3.get(b"k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn write_write_conflict_fails_second_committer() {
        let engine = mem_engine();
        let mut t1 = engine.begin(false).unwrap();
        let mut t2 = engine.begin(false).unwrap();

        t1.set(b"k".to_vec(), b"a".to_vec()).unwrap();
        t2.set(b"k".to_vec(), b"b".to_vec()).unwrap();

        t1.commit().unwrap();
        assert!(matches!(t2.commit(), Err(KvError::TxnConflict)));
        // The loser is closed.
        assert!(t2.is_closed());

        let t3 = engine.begin(true).unwrap();
        assert_eq!(t3.get(b"k").unwrap(), Some(b"a".to_vec()));
    }

    #[test]
    fn disjoint_writers_both_commit() {
        let engine = mem_engine();
        let mut t1 = engine.begin(false).unwrap();
        let mut t2 = engine.begin(false).unwrap();
        t1.set(b"a".to_vec(), b"1".to_vec()).unwrap();
        t2.set(b"b".to_vec(), b"2".to_vec()).unwrap();
        t1.commit().unwrap();
        t2.commit().unwrap();

        let t3 = engine.begin(true).unwrap();
        assert_eq!(t3.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(t3.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn rollback_discards_writes() {
        let engine = mem_engine();
        let mut t1 = engine.begin(false).unwrap();
        t1.set(b"k".to_vec(), b"v".to_vec()).unwrap();
        t1.rollback().unwrap();
        assert!(matches!(t1.get(b"k"), Err(KvError::TxnClosed)));

        let t2 = engine.begin(true).unwrap();
        assert_eq!(t2.get(b"k").unwrap(), None);
    }

    #[test]
    fn closed_and_read_only_are_enforced() {
        let engine = mem_engine();
        let mut ro = engine.begin(true).unwrap();
        assert!(matches!(
            ro.set(b"k".to_vec(), b"v".to_vec()),
            Err(KvError::TxnReadOnly)
        ));
        assert!(matches!(ro.delete(b"k".to_vec()), Err(KvError::TxnReadOnly)));
        ro.commit().unwrap();
        assert!(matches!(ro.commit(), Err(KvError::TxnClosed)));
        assert!(matches!(ro.rollback(), Err(KvError::TxnClosed)));
    }

    #[test]
    fn scan_merges_writes_over_snapshot() {
        let engine = mem_engine();
        let mut setup = engine.begin(false).unwrap();
        setup.set(b"p/a".to_vec(), b"1".to_vec()).unwrap();
        setup.set(b"p/b".to_vec(), b"2".to_vec()).unwrap();
        setup.set(b"p/d".to_vec(), b"4".to_vec()).unwrap();
        setup.set(b"q/x".to_vec(), b"9".to_vec()).unwrap();
        setup.commit().unwrap();

        let mut txn = engine.begin(false).unwrap();
        txn.set(b"p/c".to_vec(), b"3".to_vec()).unwrap();
        txn.set(b"p/b".to_vec(), b"2b".to_vec()).unwrap();
        txn.delete(b"p/d".to_vec()).unwrap();

        let items = collect(txn.scan_prefix(b"p/").unwrap());
        assert_eq!(
            items,
            vec![
                (b"p/a".to_vec(), b"1".to_vec()),
                (b"p/b".to_vec(), b"2b".to_vec()),
                (b"p/c".to_vec(), b"3".to_vec()),
            ]
        );
    }

    #[test]
    fn scan_skips_versions_after_snapshot() {
        let engine = mem_engine();
        let mut setup = engine.begin(false).unwrap();
        setup.set(b"p/a".to_vec(), b"old".to_vec()).unwrap();
        setup.commit().unwrap();

        let reader = engine.begin(true).unwrap();

        let mut writer = engine.begin(false).unwrap();
        writer.set(b"p/a".to_vec(), b"new".to_vec()).unwrap();
        writer.set(b"p/b".to_vec(), b"new".to_vec()).unwrap();
        writer.commit().unwrap();

        let items = collect(reader.scan_prefix(b"p/").unwrap());
        assert_eq!(items, vec![(b"p/a".to_vec(), b"old".to_vec())]);
    }

    #[test]
    fn keys_with_zero_bytes_round_trip_and_scan() {
        let engine = mem_engine();
        let weird = vec![0x70, 0x00, 0x71];
        let mut txn = engine.begin(false).unwrap();
        txn.set(weird.clone(), b"v".to_vec()).unwrap();
        txn.commit().unwrap();

        let reader = engine.begin(true).unwrap();
        assert_eq!(reader.get(&weird).unwrap(), Some(b"v".to_vec()));
        let items = collect(reader.scan_prefix(&[0x70]).unwrap());
        assert_eq!(items, vec![(weird, b"v".to_vec())]);
    }

    #[test]
    fn version_counter_survives_reopen() {
        let dir = tempfile::TempDir::with_prefix("granite_mvcc_test").unwrap();
        let config = KvConfig::default().with_path(dir.path());
        let before = {
            let engine = KvEngine::open(config.clone()).unwrap();
            let mut txn = engine.begin(false).unwrap();
            txn.set(b"k".to_vec(), b"v".to_vec()).unwrap();
            txn.commit().unwrap();
            let version = *engine.inner.next_version.lock();
            engine.close().unwrap();
            version
        };

        let engine = KvEngine::open(config).unwrap();
        assert_eq!(*engine.inner.next_version.lock(), before);
        let txn = engine.begin(true).unwrap();
        assert_eq!(txn.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn gc_keeps_visible_versions() {
        let engine = mem_engine();
        for value in [b"1".to_vec(), b"2".to_vec(), b"3".to_vec()] {
            let mut txn = engine.begin(false).unwrap();
            txn.set(b"k".to_vec(), value).unwrap();
            txn.commit().unwrap();
        }
        let mut txn = engine.begin(false).unwrap();
        txn.delete(b"gone".to_vec()).unwrap();
        txn.set(b"gone".to_vec(), b"x".to_vec()).unwrap();
        txn.commit().unwrap();

        assert!(engine.gc(0.1).unwrap());

        let txn = engine.begin(true).unwrap();
        assert_eq!(txn.get(b"k").unwrap(), Some(b"3".to_vec()));
        assert_eq!(txn.get(b"gone").unwrap(), Some(b"x".to_vec()));
        // A second pass finds nothing worth collecting.
        assert!(!engine.gc(0.1).unwrap());
    }

    #[test]
    fn gc_respects_active_snapshots() {
        let engine = mem_engine();
        let mut txn = engine.begin(false).unwrap();
        txn.set(b"k".to_vec(), b"old".to_vec()).unwrap();
        txn.commit().unwrap();

        let reader = engine.begin(true).unwrap();

        let mut txn = engine.begin(false).unwrap();
        txn.set(b"k".to_vec(), b"new".to_vec()).unwrap();
        txn.commit().unwrap();

        // The old version is still visible to `reader`, so gc must keep it.
        engine.gc(0.0).unwrap();
        assert_eq!(reader.get(b"k").unwrap(), Some(b"old".to_vec()));
        drop(reader);

        assert!(engine.gc(0.1).unwrap());
        let txn = engine.begin(true).unwrap();
        assert_eq!(txn.get(b"k").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn close_is_idempotent_and_blocks_new_txns() {
        let engine = mem_engine();
        engine.close().unwrap();
        engine.close().unwrap();
        assert!(matches!(engine.begin(false), Err(KvError::Closed)));
    }
}
