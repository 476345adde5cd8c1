use crate::btree::Mutation;
use crate::error::{Error, Result};
use crate::page::{KeyEntry, KeyVal};
use crate::storage::Storage;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// How a write is applied to the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateMode {
    Insert = 1,
    Del = 2,
    Set = 3,
}

struct CommitRecord {
    version: u64,
    write_set: HashSet<Vec<u8>>,
    // Blocks this commit superseded; handed back to the allocator
    // once no live snapshot can still reference them.
    freed: Vec<u64>,
}

/// Commit history and live-transaction bookkeeping. Versions come from
/// a monotonic counter ticked at begin; the conflict walk runs newest
/// first over the history queue.
pub(crate) struct TransactionTracker {
    next_version: AtomicU64,
    live: RefCell<BTreeSet<u64>>,
    history: RefCell<VecDeque<CommitRecord>>,
}

impl TransactionTracker {
    pub(crate) fn new() -> TransactionTracker {
        TransactionTracker {
            next_version: AtomicU64::new(1),
            live: RefCell::new(BTreeSet::new()),
            history: RefCell::new(VecDeque::new()),
        }
    }

    fn begin(&self) -> u64 {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        self.live.borrow_mut().insert(version);
        version
    }

    fn conflicts(&self, version: u64, read_set: &HashSet<Vec<u8>>) -> bool {
        self.history
            .borrow()
            .iter()
            .rev()
            .any(|record| record.version > version && !record.write_set.is_disjoint(read_set))
    }

    fn record_commit(&self, record: CommitRecord) {
        self.history.borrow_mut().push_back(record);
    }

    fn end(&self, version: u64, storage: &Storage) {
        self.live.borrow_mut().remove(&version);
        self.prune(storage);
    }

    // A record whose version is at or below every live transaction's
    // can never conflict again, and no live snapshot predates its
    // commit: drop it and release its superseded blocks.
    fn prune(&self, storage: &Storage) {
        let min_live = self.live.borrow().iter().next().copied();
        let mut history = self.history.borrow_mut();
        while let Some(front) = history.front() {
            let reclaimable = match min_live {
                None => true,
                Some(min) => front.version <= min,
            };
            if !reclaimable {
                break;
            }
            let record = history.pop_front().unwrap();
            for pointer in record.freed {
                storage.manager().free(pointer);
            }
        }
    }
}

/// A write transaction over a snapshot of the committed tree. Reads go
/// to the pending root once one exists, else to the snapshot; writes
/// build the pending root through copy-on-write mutations and nothing
/// reaches the metapage before `commit`. Dropping without committing
/// aborts.
pub struct WriteTransaction<'db> {
    storage: &'db Storage,
    tracker: &'db TransactionTracker,
    version: u64,
    snapshot_root: u64,
    pending_root: Option<u64>,
    read_set: HashSet<Vec<u8>>,
    write_set: HashSet<Vec<u8>>,
    allocated: Vec<u64>,
    freed: Vec<u64>,
    completed: bool,
}

impl<'db> WriteTransaction<'db> {
    pub(crate) fn new(storage: &'db Storage, tracker: &'db TransactionTracker) -> Self {
        WriteTransaction {
            storage,
            tracker,
            version: tracker.begin(),
            snapshot_root: storage.committed_root(),
            pending_root: None,
            read_set: HashSet::new(),
            write_set: HashSet::new(),
            allocated: Vec::new(),
            freed: Vec::new(),
            completed: false,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn root(&self) -> u64 {
        self.pending_root.unwrap_or(self.snapshot_root)
    }

    /// Read through this transaction. Sees its own uncommitted writes.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.read_set.insert(key.to_vec());
        self.storage.get(self.root(), key)
    }

    pub fn update(&mut self, mode: UpdateMode, key: &[u8], value: &[u8]) -> Result<()> {
        match mode {
            UpdateMode::Insert => self.insert(key, value),
            UpdateMode::Set => self.set(key, value),
            UpdateMode::Del => self.remove(key).map(|_| ()),
        }
    }

    /// Insert a key assumed absent.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let kv = KeyVal::new(key, value)?;
        let root = self.root();
        let mut mutation = Mutation::new(self.storage.manager());
        let new_root = mutation.insert(root, kv)?;
        self.apply(mutation, key, new_root);
        Ok(())
    }

    /// Upsert.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let kv = KeyVal::new(key, value)?;
        let root = self.root();
        let mut mutation = Mutation::new(self.storage.manager());
        let new_root = mutation.set(root, kv)?;
        self.apply(mutation, key, new_root);
        Ok(())
    }

    /// Delete; returns whether the key existed.
    pub fn remove(&mut self, key: &[u8]) -> Result<bool> {
        let entry = KeyEntry::from_slice(key)?;
        let root = self.root();
        let mut mutation = Mutation::new(self.storage.manager());
        match mutation.delete(root, &entry)? {
            Some(new_root) => {
                self.apply(mutation, key, new_root);
                Ok(true)
            }
            // Absent key: not found, nothing written, and the key must
            // not enter the write set.
            None => Ok(false),
        }
    }

    fn apply(&mut self, mut mutation: Mutation, key: &[u8], new_root: u64) {
        self.allocated.append(&mut mutation.allocated);
        self.freed.append(&mut mutation.freed);
        self.write_set.insert(key.to_vec());
        self.pending_root = Some(new_root);
    }

    /// Optimistic commit. Fails with `Error::Conflict` when a newer
    /// commit wrote a key this transaction read; the caller re-runs.
    pub fn commit(mut self) -> Result<()> {
        if self.tracker.conflicts(self.version, &self.read_set) {
            let version = self.version;
            self.rollback();
            return Err(Error::Conflict { version });
        }
        if let Some(root) = self.pending_root {
            self.storage.commit_root(root)?;
            self.tracker.record_commit(CommitRecord {
                version: self.version,
                write_set: std::mem::take(&mut self.write_set),
                freed: std::mem::take(&mut self.freed),
            });
        }
        self.completed = true;
        self.tracker.end(self.version, self.storage);
        Ok(())
    }

    /// Discard the pending root and both sets.
    pub fn abort(mut self) -> Result<()> {
        self.rollback();
        Ok(())
    }

    // The pending pages were never published; hand them straight back
    // to the allocator and keep the superseded ones.
    fn rollback(&mut self) {
        if self.completed {
            return;
        }
        for pointer in self.allocated.drain(..) {
            self.storage.manager().free(pointer);
        }
        self.completed = true;
        self.tracker.end(self.version, self.storage);
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        self.rollback();
    }
}

/// A read transaction pinned to the committed root at begin; later
/// commits are invisible to it.
pub struct ReadOnlyTransaction<'db> {
    storage: &'db Storage,
    tracker: &'db TransactionTracker,
    version: u64,
    root: u64,
}

impl<'db> ReadOnlyTransaction<'db> {
    pub(crate) fn new(storage: &'db Storage, tracker: &'db TransactionTracker) -> Self {
        ReadOnlyTransaction {
            storage,
            tracker,
            version: tracker.begin(),
            root: storage.committed_root(),
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.storage.get(self.root, key)
    }

    /// Inclusive range of (key, value) pairs in ascending key order.
    pub fn get_range(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.storage.get_range(self.root, start, end)
    }

    pub fn len(&self) -> Result<usize> {
        self.storage.len(self.root)
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.storage.len(self.root).map(|entries| entries == 0)
    }
}

impl Drop for ReadOnlyTransaction<'_> {
    fn drop(&mut self) {
        self.tracker.end(self.version, self.storage);
    }
}
