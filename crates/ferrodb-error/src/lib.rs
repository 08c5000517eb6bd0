//! Error taxonomy for the FerroDB storage-and-transaction core.
//!
//! Mirrors the behavioral contract of the spec: a handful of recoverable
//! conditions (`CacheFull`, `DataTooLarge`, `DatabaseBusy`, `Deadlock`,
//! `ConcurrentUpdate`, `NullEntry`) are returned to callers, while structural
//! corruption and I/O failures are fatal and should terminate the process.

use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, FerroError>;

/// Errors surfaced by the transaction manager, data manager, lock table, and
/// version manager.
#[derive(Debug, thiserror::Error)]
pub enum FerroError {
    /// The page cache is at capacity and the requested page is not resident.
    #[error("page cache full (capacity={capacity})")]
    CacheFull { capacity: usize },

    /// A record, once wrapped in its `DataItem` and MVCC envelope, would not
    /// fit in a single page.
    #[error("record of {size} bytes (after envelope) exceeds the {max}-byte page budget")]
    DataTooLarge { size: usize, max: usize },

    /// The free-space index had no room for an insert after retrying.
    #[error("no free page available after retrying allocation")]
    DatabaseBusy,

    /// A cycle was detected in the lock table's wait-for graph.
    #[error("deadlock detected")]
    Deadlock,

    /// A transaction's write conflicted with a concurrent writer, either via
    /// deadlock or an MVCC version skip; the transaction has been aborted.
    #[error("concurrent update conflict; transaction was aborted")]
    ConcurrentUpdate,

    /// The `DataItem` behind a UID has its valid byte cleared.
    #[error("entry not found")]
    NullEntry,

    /// The XID status file failed structural validation on open.
    #[error("corrupt transaction file: {0}")]
    BadXidFile(String),

    /// The write-ahead log failed checksum validation on open.
    #[error("corrupt log file: {0}")]
    BadLogFile(String),

    /// Page-cache capacity requested below the supported minimum.
    #[error("page cache capacity {requested} is below the minimum of {minimum}")]
    MemTooSmall { requested: usize, minimum: usize },

    /// A read-only transaction attempted to mutate the store.
    #[error("transaction is read-only")]
    ReadOnly,

    /// Expected the storage file to not exist yet.
    #[error("file already exists: {0}")]
    FileExists(PathBuf),

    /// Expected the storage file to already exist.
    #[error("file does not exist: {0}")]
    FileNotExists(PathBuf),

    /// The storage file could not be opened for read/write.
    #[error("cannot open file for read/write: {0}")]
    CannotRw(PathBuf),

    /// Wraps an I/O failure that is not itself fatal to report (e.g. surfaced
    /// during an open/create call rather than mid-transaction).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for invariant violations that indicate a bug rather than an
    /// environmental condition.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FerroError {
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True for the small set of errors a caller is expected to retry or
    /// recover from; everything else indicates corruption or exhausted
    /// resources and should be treated as fatal by the embedding process.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CacheFull { .. }
                | Self::DataTooLarge { .. }
                | Self::DatabaseBusy
                | Self::Deadlock
                | Self::ConcurrentUpdate
                | Self::NullEntry
                | Self::ReadOnly
        )
    }
}

/// Terminates the process after logging a structural-corruption or I/O
/// failure that the spec designates fatal (§5, §7: "Panics are fatal").
///
/// Recovery on next open is the only repair mechanism for these conditions,
/// so there is nothing useful a caller could do with a `Result` here.
#[track_caller]
pub fn fatal(context: &str, err: impl fmt::Display) -> ! {
    tracing::error!(context, error = %err, "fatal storage error; terminating");
    panic!("fatal storage error in {context}: {err}");
}
