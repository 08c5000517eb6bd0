//! Visibility predicates (§4.6): read-committed and repeatable-read rules
//! over an `Entry`'s `(xmin, xmax)`, plus repeatable-read's version-skip
//! check.

use ferrodb_tm::TransactionManager;
use ferrodb_types::IsolationLevel;

use crate::entry::Entry;
use crate::transaction::Transaction;

/// Whether `entry` is visible to `txn`.
#[must_use]
pub fn is_visible(txn: &Transaction, entry: &Entry, tm: &TransactionManager) -> bool {
    match txn.level {
        IsolationLevel::ReadCommitted => read_committed(txn, entry, tm),
        IsolationLevel::RepeatableRead => repeatable_read(txn, entry, tm),
    }
}

fn read_committed(txn: &Transaction, entry: &Entry, tm: &TransactionManager) -> bool {
    if entry.xmin == txn.xid && !entry.is_deleted() {
        return true;
    }
    tm.is_committed(entry.xmin)
        && (!entry.is_deleted()
            || (entry.xmax != txn.xid && !tm.is_committed(entry.xmax)))
}

fn repeatable_read(txn: &Transaction, entry: &Entry, tm: &TransactionManager) -> bool {
    if entry.xmin == txn.xid && !entry.is_deleted() {
        return true;
    }
    tm.is_committed(entry.xmin)
        && entry.xmin < txn.xid
        && !txn.snapshot.contains(&entry.xmin)
        && (!entry.is_deleted()
            || (entry.xmax != txn.xid
                && (!tm.is_committed(entry.xmax)
                    || entry.xmax > txn.xid
                    || txn.snapshot.contains(&entry.xmax))))
}

/// Repeatable-read only: whether a pending write by `txn` on `entry` must
/// be refused because some transaction invisible to `txn` has already
/// deleted this version. Read-committed never signals a skip.
#[must_use]
pub fn version_skip(txn: &Transaction, entry: &Entry, tm: &TransactionManager) -> bool {
    if !txn.level.is_repeatable_read() || !entry.is_deleted() {
        return false;
    }
    tm.is_committed(entry.xmax) && (entry.xmax > txn.xid || txn.snapshot.contains(&entry.xmax))
}
