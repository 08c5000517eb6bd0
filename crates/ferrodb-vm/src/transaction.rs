//! `Transaction` (§3): in-memory per-XID state — isolation level, the
//! snapshot of XIDs active at `begin`, and a sticky error slot.

use std::collections::HashSet;

use ferrodb_types::{IsolationLevel, Xid};

/// Live state for one in-flight transaction.
pub struct Transaction {
    pub xid: Xid,
    pub level: IsolationLevel,
    /// XIDs active when this transaction began. Always empty under
    /// read-committed.
    pub snapshot: HashSet<Xid>,
    /// Set once a deadlock or version-skip auto-aborts this transaction;
    /// every further call on this XID re-raises `ConcurrentUpdate` instead
    /// of doing any other work.
    pub err_sticky: bool,
    pub auto_aborted: bool,
}

impl Transaction {
    #[must_use]
    pub fn new(xid: Xid, level: IsolationLevel, snapshot: HashSet<Xid>) -> Self {
        Self {
            xid,
            level,
            snapshot,
            err_sticky: false,
            auto_aborted: false,
        }
    }
}
