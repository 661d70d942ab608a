//! The ordered key-value store contract the core is built against.
//!
//! Keys are POSIX-like absolute, lexicographically ordered byte-strings; values are opaque byte
//! blobs. The concrete storage engine is a collaborator out of this spec's core scope — this
//! module defines the contract plus two implementations: [`SledKv`] (a real embedded store, for
//! anything that needs to survive a restart) and [`MemoryKv`] (an in-memory store used by tests
//! and the price-replay simulator).
use crate::error::Error;
use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

/// Read-only view into the store, either a point-in-time snapshot or the live store depending on
/// the backend.
pub trait Transaction {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error>;

    /// Ascending range scan over `[from, to)`.
    fn ascend(&self, from: &[u8], to: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error>;

    /// Descending range scan over `[from, to)`.
    fn descend(&self, from: &[u8], to: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let mut items = self.ascend(from, to)?;
        items.reverse();
        Ok(items)
    }

    /// Iterate every key under `prefix`.
    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let mut upper = prefix.to_vec();
        match upper.last_mut() {
            Some(last) if *last < u8::MAX => *last += 1,
            _ => upper.push(0xFF),
        }
        self.ascend(prefix, &upper)
    }
}

/// A [`Transaction`] that may also mutate the store. Mutations are point operations (get/set/
/// delete by exact key) so that every backend, including one whose native transaction API can't
/// express transactional range scans (e.g. `sled`), can support them.
pub trait TransactionMut: Transaction {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), Error>;
    fn delete(&self, key: &[u8]) -> Result<(), Error>;
}

/// Ordered KV store with serializable read and read-write transactions.
pub trait Kv: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error>;
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), Error>;
    fn delete(&self, key: &[u8]) -> Result<(), Error>;
    fn ascend(&self, from: &[u8], to: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error>;
    fn descend(&self, from: &[u8], to: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error>;
    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error>;

    /// Runs `f` against a consistent read-only view of the store.
    fn with_reader(&self, f: &mut dyn FnMut(&dyn Transaction) -> Result<(), Error>) -> Result<(), Error>;

    /// Runs `f` inside a read-write transaction, retrying automatically on write-write conflict.
    fn with_read_writer(
        &self,
        f: &mut dyn FnMut(&dyn TransactionMut) -> Result<(), Error>,
    ) -> Result<(), Error>;
}

// ---------------------------------------------------------------------------------------------
// MemoryKv: BTreeMap-backed, optimistic-concurrency implementation used by tests.
// ---------------------------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryKv {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    version: AtomicU64,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemorySnapshot(BTreeMap<Vec<u8>, Vec<u8>>);

impl Transaction for MemorySnapshot {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.0.get(key).cloned())
    }

    fn ascend(&self, from: &[u8], to: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        Ok(self
            .0
            .range::<[u8], _>((Bound::Included(from), Bound::Excluded(to)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Staged read-write view over a [`MemoryKv`] snapshot; buffers writes until the enclosing
/// `with_read_writer` call commits them under a version check.
struct MemoryTransactionMut {
    base: BTreeMap<Vec<u8>, Vec<u8>>,
    writes: std::cell::RefCell<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl Transaction for MemoryTransactionMut {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        if let Some(staged) = self.writes.borrow().get(key) {
            return Ok(staged.clone());
        }
        Ok(self.base.get(key).cloned())
    }

    fn ascend(&self, from: &[u8], to: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .base
            .range::<[u8], _>((Bound::Included(from), Bound::Excluded(to)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (key, value) in self.writes.borrow().iter() {
            if key.as_slice() >= from && key.as_slice() < to {
                match value {
                    Some(v) => {
                        merged.insert(key.clone(), v.clone());
                    }
                    None => {
                        merged.remove(key);
                    }
                }
            }
        }

        Ok(merged.into_iter().collect())
    }
}

impl TransactionMut for MemoryTransactionMut {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.writes
            .borrow_mut()
            .insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), Error> {
        self.writes.borrow_mut().insert(key.to_vec(), None);
        Ok(())
    }
}

impl Kv for MemoryKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Ok(self
            .data
            .read()
            .expect("memory kv poisoned")
            .get(key)
            .cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.data
            .write()
            .expect("memory kv poisoned")
            .insert(key.to_vec(), value.to_vec());
        self.version.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), Error> {
        self.data.write().expect("memory kv poisoned").remove(key);
        self.version.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn ascend(&self, from: &[u8], to: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let data = self.data.read().expect("memory kv poisoned");
        MemorySnapshot(data.clone()).ascend(from, to)
    }

    fn descend(&self, from: &[u8], to: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let mut items = self.ascend(from, to)?;
        items.reverse();
        Ok(items)
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let mut upper = prefix.to_vec();
        match upper.last_mut() {
            Some(last) if *last < u8::MAX => *last += 1,
            _ => upper.push(0xFF),
        }
        self.ascend(prefix, &upper)
    }

    fn with_reader(
        &self,
        f: &mut dyn FnMut(&dyn Transaction) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let snapshot = MemorySnapshot(self.data.read().expect("memory kv poisoned").clone());
        f(&snapshot)
    }

    fn with_read_writer(
        &self,
        f: &mut dyn FnMut(&dyn TransactionMut) -> Result<(), Error>,
    ) -> Result<(), Error> {
        const MAX_ATTEMPTS: u32 = 16;

        for _ in 0..MAX_ATTEMPTS {
            let observed_version = self.version.load(Ordering::Acquire);
            let base = self.data.read().expect("memory kv poisoned").clone();
            let tx = MemoryTransactionMut {
                base,
                writes: std::cell::RefCell::new(BTreeMap::new()),
            };

            f(&tx)?;

            let mut data = self.data.write().expect("memory kv poisoned");
            if self.version.load(Ordering::Acquire) != observed_version {
                // Another writer committed while we were computing; retry from a fresh snapshot.
                continue;
            }

            for (key, value) in tx.writes.into_inner() {
                match value {
                    Some(v) => {
                        data.insert(key, v);
                    }
                    None => {
                        data.remove(&key);
                    }
                }
            }
            self.version.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        }

        Err(Error::internal(
            "with_read_writer: exceeded retry budget under write contention",
        ))
    }
}

// ---------------------------------------------------------------------------------------------
// SledKv: durable embedded store backing a real deployment.
// ---------------------------------------------------------------------------------------------

/// Durable [`Kv`] implementation backed by a `sled::Db`. `sled`'s own `Tree::transaction` already
/// retries internally on conflict, so `with_read_writer` delegates straight to it; range scans
/// inside a transaction aren't part of sled's transactional API, so `ascend`/`descend` read a
/// consistent point-in-time view via `Tree::range` rather than going through the transaction.
#[derive(Debug, Clone)]
pub struct SledKv {
    tree: sled::Tree,
}

impl SledKv {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let db = sled::open(path).map_err(|err| Error::internal(err.to_string()))?;
        let tree = db.open_tree("rampart").map_err(|err| Error::internal(err.to_string()))?;
        Ok(Self { tree })
    }
}

struct SledSnapshot<'a>(&'a sled::Tree);

impl Transaction for SledSnapshot<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        self.0
            .get(key)
            .map(|opt| opt.map(|v| v.to_vec()))
            .map_err(|err| Error::internal(err.to_string()))
    }

    fn ascend(&self, from: &[u8], to: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        self.0
            .range(from.to_vec()..to.to_vec())
            .map(|entry| {
                entry
                    .map(|(k, v)| (k.to_vec(), v.to_vec()))
                    .map_err(|err| Error::internal(err.to_string()))
            })
            .collect()
    }
}

struct SledTransactionMut<'a>(&'a sled::transaction::TransactionalTree);

impl Transaction for SledTransactionMut<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        self.0
            .get(key)
            .map(|opt| opt.map(|v| v.to_vec()))
            .map_err(|err| Error::internal(err.to_string()))
    }

    fn ascend(&self, _from: &[u8], _to: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        Err(Error::internal(
            "range scans are not supported inside a sled read-write transaction; \
             perform the scan via with_reader before opening the transaction",
        ))
    }
}

impl TransactionMut for SledTransactionMut<'_> {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.0
            .insert(key, value)
            .map(|_| ())
            .map_err(|err| Error::internal(err.to_string()))
    }

    fn delete(&self, key: &[u8]) -> Result<(), Error> {
        self.0
            .remove(key)
            .map(|_| ())
            .map_err(|err| Error::internal(err.to_string()))
    }
}

impl Kv for SledKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        SledSnapshot(&self.tree).get(key)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.tree
            .insert(key, value)
            .map(|_| ())
            .map_err(|err| Error::internal(err.to_string()))?;
        self.tree.flush().map_err(|err| Error::internal(err.to_string()))?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), Error> {
        self.tree
            .remove(key)
            .map(|_| ())
            .map_err(|err| Error::internal(err.to_string()))?;
        self.tree.flush().map_err(|err| Error::internal(err.to_string()))?;
        Ok(())
    }

    fn ascend(&self, from: &[u8], to: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        SledSnapshot(&self.tree).ascend(from, to)
    }

    fn descend(&self, from: &[u8], to: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let mut items = self.ascend(from, to)?;
        items.reverse();
        Ok(items)
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let mut upper = prefix.to_vec();
        match upper.last_mut() {
            Some(last) if *last < u8::MAX => *last += 1,
            _ => upper.push(0xFF),
        }
        self.ascend(prefix, &upper)
    }

    fn with_reader(
        &self,
        f: &mut dyn FnMut(&dyn Transaction) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let snapshot = SledSnapshot(&self.tree);
        f(&snapshot)
    }

    fn with_read_writer(
        &self,
        f: &mut dyn FnMut(&dyn TransactionMut) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let outcome = self
            .tree
            .transaction(|tx_tree| {
                let tx = SledTransactionMut(tx_tree);
                f(&tx).map_err(sled::transaction::ConflictableTransactionError::Abort)
            });

        match outcome {
            Ok(()) => {
                self.tree.flush().map_err(|err| Error::internal(err.to_string()))?;
                Ok(())
            }
            Err(sled::transaction::TransactionError::Abort(err)) => Err(err),
            Err(sled::transaction::TransactionError::Storage(err)) => {
                Err(Error::internal(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascend_is_ordered_and_descend_reverses_it() {
        let kv = MemoryKv::new();
        kv.set(b"/jobs/1", b"a").unwrap();
        kv.set(b"/jobs/2", b"b").unwrap();
        kv.set(b"/jobs/3", b"c").unwrap();

        let asc = kv.ascend(b"/jobs/1", b"/jobs/9").unwrap();
        let asc_keys: Vec<Vec<u8>> = asc.into_iter().map(|(k, _)| k).collect();
        assert_eq!(asc_keys, vec![b"/jobs/1".to_vec(), b"/jobs/2".to_vec(), b"/jobs/3".to_vec()]);

        let desc = kv.descend(b"/jobs/1", b"/jobs/9").unwrap();
        let desc_keys: Vec<Vec<u8>> = desc.into_iter().map(|(k, _)| k).collect();
        assert_eq!(desc_keys, vec![b"/jobs/3".to_vec(), b"/jobs/2".to_vec(), b"/jobs/1".to_vec()]);
    }

    #[test]
    fn scan_is_scoped_to_its_prefix() {
        let kv = MemoryKv::new();
        kv.set(b"/jobs/1", b"a").unwrap();
        kv.set(b"/jobs/2", b"b").unwrap();
        kv.set(b"/names/x", b"c").unwrap();

        let scanned = kv.scan(b"/jobs/").unwrap();
        assert_eq!(scanned.len(), 2);
        assert!(scanned.iter().all(|(k, _)| k.starts_with(b"/jobs/")));
    }

    #[test]
    fn writes_inside_a_transaction_are_visible_to_that_transaction_before_commit() {
        let kv = MemoryKv::new();
        kv.with_read_writer(&mut |tx| {
            tx.set(b"key", b"value")?;
            assert_eq!(tx.get(b"key").unwrap(), Some(b"value".to_vec()));
            Ok(())
        })
        .unwrap();
        assert_eq!(kv.get(b"key").unwrap(), Some(b"value".to_vec()));
    }

    #[test]
    fn with_read_writer_retries_on_a_concurrent_write() {
        let kv = MemoryKv::new();
        let attempts = std::cell::Cell::new(0);

        kv.with_read_writer(&mut |tx| {
            attempts.set(attempts.get() + 1);
            if attempts.get() == 1 {
                // Simulate another writer committing between this attempt's snapshot and commit.
                kv.set(b"other", b"value").unwrap();
            }
            tx.set(b"key", b"value")
        })
        .unwrap();

        assert_eq!(attempts.get(), 2, "the version bump from the concurrent write must force a retry");
        assert_eq!(kv.get(b"key").unwrap(), Some(b"value".to_vec()));
        assert_eq!(kv.get(b"other").unwrap(), Some(b"value".to_vec()));
    }

    #[test]
    fn sled_kv_persists_across_a_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let kv = SledKv::open(dir.path()).unwrap();
            kv.set(b"key", b"value").unwrap();
        }

        let kv = SledKv::open(dir.path()).unwrap();
        assert_eq!(kv.get(b"key").unwrap(), Some(b"value".to_vec()));
    }
}
