//! `DataItem` (§3, §4.3): a versioned slot within a page —
//! `[valid:1][size:2][bytes:size]` — with a before-image/write-lock
//! protocol for logged, in-place mutation.

use std::sync::Arc;

use parking_lot::Mutex;

use ferrodb_error::{FerroError, Result};
use ferrodb_pager::SharedPage;
use ferrodb_types::{PageNumber, Uid, Xid};
use ferrodb_wal::Logger;

use crate::slot_lock::SlotLock;
use crate::wal_record::WalRecord;

/// Header length: `[valid:1][size:2]`.
pub const HEADER_LEN: usize = 3;

/// Slot is live. Despite the field's name, this polarity is inverted from
/// what "valid" suggests: `VALID` is the value written for a present slot;
/// recovery's undo pass is the only place that flips it back to invalid
/// (see `recovery::INVALID`).
const VALID: u8 = 0;

/// Build the on-disk `[valid][size][bytes]` encoding for a fresh slot.
#[must_use]
pub fn encode_header(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + bytes.len());
    out.push(VALID);
    out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(bytes);
    out
}

/// A cached, live handle onto one `DataItem` slot.
pub struct DataItem {
    uid: Uid,
    page: Arc<SharedPage>,
    offset: usize,
    lock: SlotLock,
    before_image: Mutex<Option<Vec<u8>>>,
}

impl DataItem {
    pub(crate) fn new(uid: Uid, page: Arc<SharedPage>) -> Self {
        Self {
            uid,
            page,
            offset: uid.offset() as usize,
            lock: SlotLock::new(),
            before_image: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn uid(&self) -> Uid {
        self.uid
    }

    #[must_use]
    pub fn pgno(&self) -> PageNumber {
        self.uid.pgno()
    }

    fn size(&self) -> usize {
        self.page
            .with_bytes(|b| u16::from_le_bytes([b[self.offset + 1], b[self.offset + 2]]) as usize)
    }

    /// Whether this slot currently holds a live record.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let _guard = self.lock.read();
        self.page.with_bytes(|b| b[self.offset] == VALID)
    }

    /// Copy of the slot's current payload bytes.
    #[must_use]
    pub fn read_payload(&self) -> Vec<u8> {
        let _guard = self.lock.read();
        let start = self.offset + HEADER_LEN;
        let size = self.size();
        self.page.with_bytes(|b| b[start..start + size].to_vec())
    }

    /// Acquire exclusive access and snapshot the current payload as the
    /// before-image. Must be followed by `after` or `un_before`.
    pub fn before(&self) {
        self.lock.acquire_write();
        let start = self.offset + HEADER_LEN;
        let size = self.size();
        let snapshot = self.page.with_bytes(|b| b[start..start + size].to_vec());
        *self.before_image.lock() = Some(snapshot);
    }

    /// Overwrite the payload in place. `new_bytes` must be exactly the
    /// slot's existing size (this protocol never resizes a slot).
    pub fn write_payload(&self, new_bytes: &[u8]) -> Result<()> {
        let size = self.size();
        if new_bytes.len() != size {
            return Err(FerroError::internal(format!(
                "write_payload length {} does not match slot size {size}",
                new_bytes.len()
            )));
        }
        let start = self.offset + HEADER_LEN;
        self.page.overwrite_raw(start, new_bytes);
        Ok(())
    }

    /// Log the update (old payload vs. new payload) and release the write
    /// lock acquired by `before`.
    pub fn after(&self, xid: Xid, wal: &Logger) -> Result<()> {
        let old = self
            .before_image
            .lock()
            .take()
            .ok_or_else(|| FerroError::internal("after() called without a matching before()"))?;
        let new = self.read_payload_locked();
        let record = WalRecord::Update {
            xid,
            uid: self.uid,
            old,
            new,
        };
        wal.append(&record.encode())?;
        self.lock.release_write();
        Ok(())
    }

    /// Restore the before-image and release the write lock, abandoning
    /// the in-progress mutation.
    pub fn un_before(&self) {
        if let Some(old) = self.before_image.lock().take() {
            let start = self.offset + HEADER_LEN;
            self.page.overwrite_raw(start, &old);
        }
        self.lock.release_write();
    }

    fn read_payload_locked(&self) -> Vec<u8> {
        let start = self.offset + HEADER_LEN;
        let size = self.size();
        self.page.with_bytes(|b| b[start..start + size].to_vec())
    }
}
