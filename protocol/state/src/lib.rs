use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard};

pub type Hash = [u8; 32];

fn hash_leaf(key: &[u8], value: &[u8]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(key.len() as u64).to_be_bytes());
    hasher.update(key);
    hasher.update(value);
    *hasher.finalize().as_bytes()
}

fn fold_hashes(leaves: impl Iterator<Item = Hash>) -> Hash {
    let mut hasher = blake3::Hasher::new();
    let mut empty = true;
    for leaf in leaves {
        hasher.update(&leaf);
        empty = false;
    }
    if empty {
        return [0u8; 32];
    }
    *hasher.finalize().as_bytes()
}

/// Returns the smallest key strictly greater than every key starting with `prefix`,
/// or `None` when the prefix is all `0xff` bytes (unbounded).
pub fn prefix_end_bytes(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

fn key_bounds(start: &[u8], end: Option<&[u8]>) -> Option<(Bound<Vec<u8>>, Bound<Vec<u8>>)> {
    if matches!(end, Some(end) if end <= start) {
        return None;
    }
    let upper = match end {
        Some(end) => Bound::Excluded(end.to_vec()),
        None => Bound::Unbounded,
    };
    Some((Bound::Included(start.to_vec()), upper))
}

/// Ordered key-value store owned by a single module.
///
/// Iteration is always in ascending lexicographic key order, which is what makes
/// big-endian id prefixes usable for range scans.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn set(&self, key: &[u8], value: &[u8]);
    fn delete(&self, key: &[u8]);

    /// Entries with `start <= key < end`; `end = None` means unbounded.
    fn range(&self, start: &[u8], end: Option<&[u8]>) -> Vec<(Vec<u8>, Vec<u8>)>;

    /// Like `range`, skipping the first `skip` entries and returning at most
    /// `take`. Stores should stop scanning once `take` is reached.
    fn range_page(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        skip: usize,
        take: usize,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.range(start, end)
            .into_iter()
            .skip(skip)
            .take(take)
            .collect()
    }

    fn count_range(&self, start: &[u8], end: Option<&[u8]>) -> usize {
        self.range(start, end).len()
    }

    fn has(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    fn prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let end = prefix_end_bytes(prefix);
        self.range(prefix, end.as_deref())
    }
}

impl<T: KvStore + ?Sized> KvStore for Arc<T> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        (**self).get(key)
    }

    fn set(&self, key: &[u8], value: &[u8]) {
        (**self).set(key, value)
    }

    fn delete(&self, key: &[u8]) {
        (**self).delete(key)
    }

    fn range(&self, start: &[u8], end: Option<&[u8]>) -> Vec<(Vec<u8>, Vec<u8>)> {
        (**self).range(start, end)
    }

    fn range_page(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        skip: usize,
        take: usize,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        (**self).range_page(start, end, skip, take)
    }

    fn count_range(&self, start: &[u8], end: Option<&[u8]>) -> usize {
        (**self).count_range(start, end)
    }
}

/// Position in the store's undo journal. Must be handed back through
/// `revert` or `release`.
#[derive(Debug)]
#[must_use]
pub struct Checkpoint {
    mark: usize,
    depth: usize,
}

type JournalEntry = (Vec<u8>, Option<Vec<u8>>);

#[derive(Default)]
struct Inner {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    journal: Vec<JournalEntry>,
    open: usize,
}

impl Inner {
    fn record(&mut self, key: &[u8], prior: Option<Vec<u8>>) {
        if self.open > 0 {
            self.journal.push((key.to_vec(), prior));
        }
    }

    fn close(&mut self, checkpoint: &Checkpoint) {
        self.open = checkpoint.depth - 1;
        if self.open == 0 {
            self.journal.clear();
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock means a panic already aborted block execution.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens a checkpoint. Checkpoints nest; writes made while any is open
    /// are journaled so they can be undone.
    pub fn checkpoint(&self) -> Checkpoint {
        let mut inner = self.guard();
        inner.open += 1;
        Checkpoint {
            mark: inner.journal.len(),
            depth: inner.open,
        }
    }

    /// Undoes every write since `checkpoint`, including writes kept by
    /// checkpoints nested inside it.
    pub fn revert(&self, checkpoint: Checkpoint) {
        let mut inner = self.guard();
        while inner.journal.len() > checkpoint.mark {
            let Some((key, prior)) = inner.journal.pop() else {
                break;
            };
            match prior {
                Some(value) => inner.entries.insert(key, value),
                None => inner.entries.remove(&key),
            };
        }
        inner.close(&checkpoint);
    }

    /// Keeps the writes made since `checkpoint`. An enclosing checkpoint can
    /// still revert them.
    pub fn release(&self, checkpoint: Checkpoint) {
        self.guard().close(&checkpoint);
    }

    pub fn journal_len(&self) -> usize {
        self.guard().journal.len()
    }

    pub fn len(&self) -> usize {
        self.guard().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().entries.is_empty()
    }

    pub fn commit(&self) -> Hash {
        let guard = self.guard();
        fold_hashes(guard.entries.iter().map(|(k, v)| hash_leaf(k, v)))
    }
}

impl KvStore for InMemoryStateStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.guard().entries.get(key).cloned()
    }

    fn set(&self, key: &[u8], value: &[u8]) {
        let mut inner = self.guard();
        let prior = inner.entries.insert(key.to_vec(), value.to_vec());
        inner.record(key, prior);
    }

    fn delete(&self, key: &[u8]) {
        let mut inner = self.guard();
        if let Some(prior) = inner.entries.remove(key) {
            inner.record(key, Some(prior));
        }
    }

    fn range(&self, start: &[u8], end: Option<&[u8]>) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.range_page(start, end, 0, usize::MAX)
    }

    fn range_page(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        skip: usize,
        take: usize,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        let Some(bounds) = key_bounds(start, end) else {
            return Vec::new();
        };
        self.guard()
            .entries
            .range(bounds)
            .skip(skip)
            .take(take)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn count_range(&self, start: &[u8], end: Option<&[u8]>) -> usize {
        match key_bounds(start, end) {
            Some(bounds) => self.guard().entries.range(bounds).count(),
            None => 0,
        }
    }
}
