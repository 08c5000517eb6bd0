//! The Transaction Manager (§4.5): a persistent, append-mostly registry of
//! per-XID status, backed by a small header-prefixed file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;

use ferrodb_error::{fatal, FerroError, Result};
use ferrodb_types::Xid;

use crate::status::XidStatus;

const HEADER_LEN: u64 = 8;

struct TmState {
    file: File,
    /// Number of XIDs known to the file (XID 0, the super XID, is not
    /// among them: XID `n` lives at byte `HEADER_LEN + n - 1`).
    count: u64,
}

/// Persistent transaction-state registry.
pub struct TransactionManager {
    state: Mutex<TmState>,
}

impl TransactionManager {
    /// Create a brand-new, empty XID file.
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Err(FerroError::FileExists(path.to_path_buf()));
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&0u64.to_le_bytes())?;
        file.sync_all()?;
        Ok(Self {
            state: Mutex::new(TmState { file, count: 0 }),
        })
    }

    /// Open an existing XID file, validating that its length matches the
    /// header's declared count. A mismatch is fatal corruption.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FerroError::FileNotExists(path.to_path_buf()));
        }
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < HEADER_LEN {
            return Err(FerroError::BadXidFile(
                "xid file shorter than its header".to_owned(),
            ));
        }
        let mut header = [0u8; 8];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        let count = u64::from_le_bytes(header);

        if HEADER_LEN + count != file_len {
            fatal(
                "xid file open",
                FerroError::BadXidFile(format!(
                    "declared count {count} implies length {} but file is {file_len} bytes",
                    HEADER_LEN + count
                )),
            );
        }

        Ok(Self {
            state: Mutex::new(TmState { file, count }),
        })
    }

    /// Reserve a fresh XID, recording it active, and persist the new
    /// counter. Both writes are forced to disk before returning.
    pub fn begin(&self) -> Result<Xid> {
        let mut state = self.state.lock();
        let xid = Xid::new(state.count + 1);

        let offset = HEADER_LEN + state.count;
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(&[XidStatus::Active.to_byte()])?;
        state.file.sync_data()?;

        state.count += 1;
        state.file.seek(SeekFrom::Start(0))?;
        state.file.write_all(&state.count.to_le_bytes())?;
        state.file.sync_data()?;

        Ok(xid)
    }

    /// Mark `xid` committed.
    pub fn commit(&self, xid: Xid) -> Result<()> {
        self.set_status(xid, XidStatus::Committed)
    }

    /// Mark `xid` aborted.
    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.set_status(xid, XidStatus::Aborted)
    }

    fn set_status(&self, xid: Xid, status: XidStatus) -> Result<()> {
        if xid.is_super() {
            return Err(FerroError::internal("cannot change status of the super XID"));
        }
        let mut state = self.state.lock();
        let offset = HEADER_LEN + xid.get() - 1;
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(&[status.to_byte()])?;
        state.file.sync_data()?;
        Ok(())
    }

    #[must_use]
    pub fn is_active(&self, xid: Xid) -> bool {
        self.status(xid) == XidStatus::Active
    }

    #[must_use]
    pub fn is_committed(&self, xid: Xid) -> bool {
        xid.is_super() || self.status(xid) == XidStatus::Committed
    }

    #[must_use]
    pub fn is_aborted(&self, xid: Xid) -> bool {
        self.status(xid) == XidStatus::Aborted
    }

    fn status(&self, xid: Xid) -> XidStatus {
        if xid.is_super() {
            return XidStatus::Committed;
        }
        let mut state = self.state.lock();
        if xid.get() > state.count {
            fatal(
                "xid status lookup",
                FerroError::internal(format!("xid {xid} was never issued")),
            );
        }
        let offset = HEADER_LEN + xid.get() - 1;
        let mut byte = [0u8; 1];
        state
            .file
            .seek(SeekFrom::Start(offset))
            .unwrap_or_else(|e| fatal("seeking xid file", e));
        state
            .file
            .read_exact(&mut byte)
            .unwrap_or_else(|e| fatal("reading xid file", e));
        XidStatus::from_byte(byte[0]).unwrap_or_else(|| {
            fatal(
                "xid status lookup",
                FerroError::BadXidFile(format!("unknown status byte {}", byte[0])),
            )
        })
    }

    /// Every XID still marked active, in ascending order. Used by recovery
    /// to find the in-flight transactions that must be undone.
    #[must_use]
    pub fn active_xids(&self) -> Vec<Xid> {
        let mut state = self.state.lock();
        let mut active = Vec::new();
        let mut bytes = vec![0u8; state.count as usize];
        state
            .file
            .seek(SeekFrom::Start(HEADER_LEN))
            .unwrap_or_else(|e| fatal("seeking xid file", e));
        state
            .file
            .read_exact(&mut bytes)
            .unwrap_or_else(|e| fatal("reading xid file", e));
        for (i, byte) in bytes.into_iter().enumerate() {
            if XidStatus::from_byte(byte) == Some(XidStatus::Active) {
                active.push(Xid::new(i as u64 + 1));
            }
        }
        active
    }
}
