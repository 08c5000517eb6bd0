//! The Version Manager (§4.8): the live-transaction registry, MVCC
//! read/insert/delete, and commit/abort lifecycle, built on the
//! Transaction Manager, Data Manager, and Lock Table.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use ferrodb_dm::DataManager;
use ferrodb_error::{FerroError, Result};
use ferrodb_lock::{Acquired, LockTable};
use ferrodb_tm::TransactionManager;
use ferrodb_types::{IsolationLevel, Uid, Xid};

use crate::entry::Entry;
use crate::transaction::Transaction;
use crate::visibility::{is_visible, version_skip};

/// Holds the Transaction Manager, Data Manager, and Lock Table, plus the
/// registry of currently live transactions.
///
/// Entries are not cached separately from the Data Manager's own
/// `DataItem` cache: an `Entry` is just the decoded MVCC envelope of a
/// `DataItem`'s payload, so every operation below decodes one on demand
/// from whatever `DataManager::read`/`begin_update` hands back.
pub struct VersionManager {
    tm: TransactionManager,
    dm: DataManager,
    locks: LockTable,
    active: Mutex<HashMap<Xid, Arc<Mutex<Transaction>>>>,
}

impl VersionManager {
    #[must_use]
    pub fn new(tm: TransactionManager, dm: DataManager, locks: LockTable) -> Self {
        Self {
            tm,
            dm,
            locks,
            active: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn tm(&self) -> &TransactionManager {
        &self.tm
    }

    #[must_use]
    pub fn dm(&self) -> &DataManager {
        &self.dm
    }

    /// Start a new transaction at the given isolation level.
    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        let xid = self.tm.begin()?;
        let snapshot: HashSet<Xid> = if level.is_repeatable_read() {
            self.active.lock().keys().copied().collect()
        } else {
            HashSet::new()
        };
        let txn = Arc::new(Mutex::new(Transaction::new(xid, level, snapshot)));
        self.active.lock().insert(xid, txn);
        Ok(xid)
    }

    fn txn(&self, xid: Xid) -> Result<Arc<Mutex<Transaction>>> {
        self.active
            .lock()
            .get(&xid)
            .cloned()
            .ok_or_else(|| FerroError::internal(format!("{xid} is not an active transaction")))
    }

    /// Read `uid`'s payload as visible to `xid`, or `None` if absent or
    /// not visible.
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        let txn = self.txn(xid)?;
        if txn.lock().err_sticky {
            return Err(FerroError::ConcurrentUpdate);
        }

        let Some(bytes) = self.dm.read(uid)? else {
            return Ok(None);
        };
        let entry = Entry::decode(&bytes)?;
        if is_visible(&txn.lock(), &entry, &self.tm) {
            Ok(Some(entry.record))
        } else {
            Ok(None)
        }
    }

    /// Insert `data` as a new version created by `xid`.
    pub fn insert(&self, xid: Xid, data: Vec<u8>) -> Result<Uid> {
        let txn = self.txn(xid)?;
        if txn.lock().err_sticky {
            return Err(FerroError::ConcurrentUpdate);
        }
        let entry = Entry::new_inserted(xid, data);
        self.dm.insert(xid, &entry.encode())
    }

    /// Mark `uid` deleted by `xid`. Returns `false` if the row isn't
    /// visible to `xid` or was already deleted by `xid` itself.
    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        let txn = self.txn(xid)?;
        if txn.lock().err_sticky {
            return Err(FerroError::ConcurrentUpdate);
        }

        let Some(bytes) = self.dm.read(uid)? else {
            return Ok(false);
        };
        let entry = Entry::decode(&bytes)?;
        if !is_visible(&txn.lock(), &entry, &self.tm) {
            return Ok(false);
        }

        match self.locks.acquire(xid, uid) {
            Ok(Acquired::NoWait) => {}
            Ok(Acquired::Wait(gate)) => gate.wait(),
            Err(FerroError::Deadlock) => {
                self.auto_abort(&txn, xid)?;
                return Err(FerroError::ConcurrentUpdate);
            }
            Err(other) => return Err(other),
        }

        // Re-read: while this call waited on the gate, the prior holder
        // may have changed `xmax`.
        let bytes = self.dm.read(uid)?.ok_or(FerroError::NullEntry)?;
        let mut entry = Entry::decode(&bytes)?;

        if entry.xmax == xid {
            return Ok(false); // already deleted by this same transaction.
        }

        if version_skip(&txn.lock(), &entry, &self.tm) {
            self.auto_abort(&txn, xid)?;
            return Err(FerroError::ConcurrentUpdate);
        }

        entry.xmax = xid;
        let item = self.dm.begin_update(uid)?;
        self.dm.commit_update(&item, xid, &entry.encode())?;
        Ok(true)
    }

    /// Commit `xid`: release its locks, drop it from the registry, and
    /// record it committed in the Transaction Manager.
    pub fn commit(&self, xid: Xid) -> Result<()> {
        let txn = self.txn(xid)?;
        if txn.lock().err_sticky {
            return Err(FerroError::ConcurrentUpdate);
        }
        self.active.lock().remove(&xid);
        self.locks.release_all(xid);
        self.tm.commit(xid)?;
        Ok(())
    }

    /// Abort `xid`. A no-op if it was already auto-aborted (its locks and
    /// TM status were already settled at the point of auto-abort) or is
    /// no longer tracked at all.
    pub fn abort(&self, xid: Xid) -> Result<()> {
        let Some(txn) = self.active.lock().get(&xid).cloned() else {
            return Ok(());
        };
        let already_auto_aborted = txn.lock().auto_aborted;
        self.active.lock().remove(&xid);
        if already_auto_aborted {
            return Ok(());
        }
        self.locks.release_all(xid);
        self.tm.abort(xid)?;
        Ok(())
    }

    /// Mark `xid` sticky-errored and auto-aborted (deadlock or version
    /// skip), settling its locks and TM status immediately. The registry
    /// entry is kept so later calls on this XID still observe the sticky
    /// error instead of "unknown transaction".
    fn auto_abort(&self, txn: &Arc<Mutex<Transaction>>, xid: Xid) -> Result<()> {
        {
            let mut txn = txn.lock();
            txn.err_sticky = true;
            txn.auto_aborted = true;
        }
        self.locks.release_all(xid);
        self.tm.abort(xid)?;
        Ok(())
    }
}
