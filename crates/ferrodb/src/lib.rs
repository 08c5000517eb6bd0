//! Public API facade: wires the Transaction Manager, Data Manager,
//! Version Manager, and Lock Table into one embeddable store.
//!
//! This is the only crate most embedders need: it owns the three on-disk
//! files named by a [`DbConfig`] (`<path>.db`, `<path>.log`, `<path>.xid`)
//! and exposes record-level `begin`/`read`/`insert`/`delete`/`commit`/
//! `abort` operations. SQL parsing, planning, and indexing are external
//! collaborators layered on top of this crate, not part of it.

use ferrodb_dm::DataManager;
use ferrodb_lock::LockTable;
use ferrodb_tm::TransactionManager;
use ferrodb_vm::VersionManager;

pub use ferrodb_error::{FerroError, Result};
pub use ferrodb_types::{DbConfig, IsolationLevel, Uid, Xid, MIN_CACHE_CAPACITY};

/// The embeddable storage-and-transaction core.
///
/// Dropping a `Store` stamps page 1's clean-shutdown marker so the next
/// `Store::open` on the same files skips recovery. A process that
/// disappears without running this destructor (a crash, `SIGKILL`, a
/// panic that aborts) leaves the marker unclean, which is exactly what
/// tells the next `open` to replay the log (§3, §4.4).
pub struct Store {
    vm: VersionManager,
}

impl Store {
    /// Open the store named by `config`, creating its three files if none
    /// of them exist yet, or opening (and recovering, if needed) them if
    /// all three already exist. A partial set of files — e.g. a `.db`
    /// with no matching `.xid` — is refused rather than guessed at.
    pub fn open(config: &DbConfig) -> Result<Self> {
        config.validate()?;

        let db_path = config.db_path();
        let log_path = config.log_path();
        let xid_path = config.xid_path();

        let present = [db_path.exists(), log_path.exists(), xid_path.exists()];
        let (tm, dm) = match present {
            [false, false, false] => {
                let tm = TransactionManager::create(&xid_path)?;
                let dm = DataManager::create(&db_path, &log_path, config.mem)?;
                (tm, dm)
            }
            [true, true, true] => {
                let tm = TransactionManager::open(&xid_path)?;
                let dm = DataManager::open(&db_path, &log_path, config.mem, &tm)?;
                (tm, dm)
            }
            _ => {
                return Err(FerroError::internal(format!(
                    "partial database at {}: .db={} .log={} .xid={}",
                    config.path.display(),
                    present[0],
                    present[1],
                    present[2]
                )));
            }
        };

        let vm = VersionManager::new(tm, dm, LockTable::new());
        Ok(Self { vm })
    }

    /// Start a new transaction at the given isolation level.
    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        self.vm.begin(level)
    }

    /// Read `uid`'s payload as visible to `xid`, or `None` if it doesn't
    /// exist or isn't visible under `xid`'s isolation level.
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        self.vm.read(xid, uid)
    }

    /// Insert `data` as a new record created by `xid`, returning its UID.
    pub fn insert(&self, xid: Xid, data: Vec<u8>) -> Result<Uid> {
        self.vm.insert(xid, data)
    }

    /// Delete `uid` on behalf of `xid`. Returns `false` if the row isn't
    /// visible to `xid` or was already deleted by this same transaction.
    /// A deadlock or a version skip against a snapshot aborts `xid` and
    /// surfaces `ConcurrentUpdate`.
    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        self.vm.delete(xid, uid)
    }

    /// Commit `xid`, releasing its locks and recording it committed.
    pub fn commit(&self, xid: Xid) -> Result<()> {
        self.vm.commit(xid)
    }

    /// Abort `xid`, releasing its locks and recording it aborted. A no-op
    /// if `xid` was already auto-aborted by a deadlock or version skip.
    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.vm.abort(xid)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(err) = self.vm.dm().close() {
            tracing::error!(error = %err, "failed to stamp clean-shutdown marker on close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    fn open(dir: &std::path::Path) -> Store {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let config = DbConfig::new(dir.join("t"), MIN_CACHE_CAPACITY);
        Store::open(&config).unwrap()
    }

    /// S1 from the spec: basic round-trip through a fresh store.
    #[test]
    fn s1_basic_round_trip() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        let writer = store.begin(IsolationLevel::ReadCommitted).unwrap();
        let uid = store.insert(writer, b"hello".to_vec()).unwrap();
        store.commit(writer).unwrap();

        let reader = store.begin(IsolationLevel::ReadCommitted).unwrap();
        assert_eq!(store.read(reader, uid).unwrap(), Some(b"hello".to_vec()));
    }

    /// S2 from the spec: a repeatable-read transaction keeps seeing its
    /// original snapshot across a concurrent delete-then-reinsert.
    #[test]
    fn s2_repeatable_read_snapshot_is_stable() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        let t1 = store.begin(IsolationLevel::RepeatableRead).unwrap();
        let uid_v1 = store.insert(t1, b"v1".to_vec()).unwrap();
        store.commit(t1).unwrap();

        let t2 = store.begin(IsolationLevel::RepeatableRead).unwrap();

        let t3 = store.begin(IsolationLevel::ReadCommitted).unwrap();
        assert!(store.delete(t3, uid_v1).unwrap());
        let uid_v2 = store.insert(t3, b"v2".to_vec()).unwrap();
        store.commit(t3).unwrap();

        assert_eq!(store.read(t2, uid_v2).unwrap(), None);
        assert_eq!(store.read(t2, uid_v1).unwrap(), Some(b"v1".to_vec()));

        let t4 = store.begin(IsolationLevel::RepeatableRead).unwrap();
        assert_eq!(store.read(t4, uid_v2).unwrap(), Some(b"v2".to_vec()));
        assert_eq!(store.read(t4, uid_v1).unwrap(), None);
    }

    /// S3 from the spec: a cross deadlock auto-aborts exactly the side
    /// that detects the cycle, and the other side's wait resolves once
    /// the loser's locks are released.
    #[test]
    fn s3_deadlock_auto_aborts_one_side_and_frees_the_other() {
        let dir = tempdir().unwrap();
        let store = Arc::new(open(dir.path()));

        let writer = store.begin(IsolationLevel::ReadCommitted).unwrap();
        let row_a = store.insert(writer, b"a".to_vec()).unwrap();
        let row_b = store.insert(writer, b"b".to_vec()).unwrap();
        store.commit(writer).unwrap();

        let t1 = store.begin(IsolationLevel::ReadCommitted).unwrap();
        let t2 = store.begin(IsolationLevel::ReadCommitted).unwrap();
        assert!(store.delete(t1, row_a).unwrap());
        assert!(store.delete(t2, row_b).unwrap());

        let store_bg = Arc::clone(&store);
        let t1_waits_on_b = thread::spawn(move || store_bg.delete(t1, row_b));
        thread::sleep(Duration::from_millis(20));

        let t2_result = store.delete(t2, row_a);
        let t1_result = t1_waits_on_b.join().unwrap();

        // Exactly one side loses to the cycle check; the other proceeds
        // (directly, or after the loser's auto-abort frees its row).
        assert_ne!(t1_result.is_ok(), t2_result.is_ok());
        assert!(matches!(
            t1_result.or(t2_result),
            Err(FerroError::ConcurrentUpdate) | Ok(_)
        ));
    }

    /// S4 from the spec: a crash mid-transaction is detected on reopen;
    /// committed work survives and the in-flight transaction's inserts
    /// become invisible.
    #[test]
    fn s4_wal_recovery_after_a_simulated_crash() {
        let dir = tempdir().unwrap();
        let config = DbConfig::new(dir.path().join("t"), MIN_CACHE_CAPACITY);

        let (committed_uids, uncommitted_uid) = {
            let store = Store::open(&config).unwrap();
            let t1 = store.begin(IsolationLevel::ReadCommitted).unwrap();
            let uids: Vec<_> = (0..3)
                .map(|i| store.insert(t1, format!("row-{i}").into_bytes()).unwrap())
                .collect();
            store.commit(t1).unwrap();

            let t2 = store.begin(IsolationLevel::ReadCommitted).unwrap();
            let dangling = store.insert(t2, b"never-committed".to_vec()).unwrap();
            store.insert(t2, b"also-never-committed".to_vec()).unwrap();

            // Simulate a crash: leak the store so `Drop` never runs and
            // the clean-shutdown marker is never stamped.
            std::mem::forget(store);
            (uids, dangling)
        };

        let store = Store::open(&config).unwrap();
        let reader = store.begin(IsolationLevel::ReadCommitted).unwrap();
        for (i, uid) in committed_uids.iter().enumerate() {
            assert_eq!(
                store.read(reader, *uid).unwrap(),
                Some(format!("row-{i}").into_bytes())
            );
        }
        assert_eq!(store.read(reader, uncommitted_uid).unwrap(), None);
    }

    /// A clean shutdown must not trigger recovery on the next open: the
    /// same scenario as S4's setup, but with an orderly `Drop`, must leave
    /// the in-flight transaction's data simply absent (never committed),
    /// not specially "recovered".
    #[test]
    fn clean_shutdown_skips_recovery_on_reopen() {
        let dir = tempdir().unwrap();
        let config = DbConfig::new(dir.path().join("t"), MIN_CACHE_CAPACITY);

        let uid = {
            let store = Store::open(&config).unwrap();
            let t1 = store.begin(IsolationLevel::ReadCommitted).unwrap();
            let uid = store.insert(t1, b"hello".to_vec()).unwrap();
            store.commit(t1).unwrap();
            uid
        }; // Store dropped here: marker stamped clean.

        let store = Store::open(&config).unwrap();
        let reader = store.begin(IsolationLevel::ReadCommitted).unwrap();
        assert_eq!(store.read(reader, uid).unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn rejects_a_partial_set_of_database_files() {
        let dir = tempdir().unwrap();
        let config = DbConfig::new(dir.path().join("t"), MIN_CACHE_CAPACITY);
        std::fs::write(config.db_path(), []).unwrap();

        let err = Store::open(&config).unwrap_err();
        assert!(matches!(err, FerroError::Internal(_)));
    }

    /// S6 from the spec, at a reduced scale: bulk inserts in one
    /// transaction all re-read byte-for-byte after commit.
    #[test]
    fn bulk_inserts_all_re_read_byte_for_byte() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        let writer = store.begin(IsolationLevel::ReadCommitted).unwrap();
        let payload = vec![0xAB_u8; 100];
        let uids: Vec<_> = (0..500)
            .map(|_| store.insert(writer, payload.clone()).unwrap())
            .collect();
        store.commit(writer).unwrap();

        let reader = store.begin(IsolationLevel::ReadCommitted).unwrap();
        for uid in uids {
            assert_eq!(store.read(reader, uid).unwrap(), Some(payload.clone()));
        }
    }
}
