//! Page layout (§3, §6): the free-space offset header for ordinary pages,
//! and the clean-shutdown marker carried in page 1.

use parking_lot::Mutex;

use ferrodb_types::{PageNumber, PAGE_SIZE};

/// Byte range of page 1's open-marker nonce, written on every open.
const NONCE_A: std::ops::Range<usize> = 100..108;
/// Byte range page 1's nonce is copied into on a clean shutdown.
const NONCE_B: std::ops::Range<usize> = 108..116;

struct PageInner {
    bytes: Vec<u8>,
    dirty: bool,
}

/// A single fixed-size page, shared (via `Arc`) between the cache entry and
/// whatever `DataItem`s currently reference it.
pub struct SharedPage {
    pgno: PageNumber,
    inner: Mutex<PageInner>,
}

impl SharedPage {
    #[must_use]
    pub fn new(pgno: PageNumber, bytes: Vec<u8>) -> Self {
        debug_assert_eq!(bytes.len(), PAGE_SIZE);
        Self {
            pgno,
            inner: Mutex::new(PageInner {
                bytes,
                dirty: false,
            }),
        }
    }

    #[must_use]
    pub fn zeroed(pgno: PageNumber) -> Self {
        Self::new(pgno, vec![0u8; PAGE_SIZE])
    }

    #[must_use]
    pub const fn pgno(&self) -> PageNumber {
        self.pgno
    }

    /// Read-only access to the page's raw bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.inner.lock();
        f(&guard.bytes)
    }

    /// Mutable access to the page's raw bytes; marks the page dirty.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.inner.lock();
        guard.dirty = true;
        f(&mut guard.bytes)
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }

    pub fn mark_clean(&self) {
        self.inner.lock().dirty = false;
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.lock().bytes.clone()
    }

    pub fn overwrite(&self, bytes: &[u8]) {
        let mut guard = self.inner.lock();
        guard.bytes.copy_from_slice(bytes);
        guard.dirty = true;
    }

    // -- Ordinary page layout: [fso:u16 LE][payload...] ---------------------

    #[must_use]
    pub fn fso(&self) -> u16 {
        self.with_bytes(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn set_fso(&self, fso: u16) {
        self.with_bytes_mut(|b| b[0..2].copy_from_slice(&fso.to_le_bytes()));
    }

    /// Splice `data` at `offset`, growing the FSO to `offset + data.len()`
    /// if it isn't already that far.
    pub fn splice_raw(&self, offset: usize, data: &[u8]) {
        let mut guard = self.inner.lock();
        guard.bytes[offset..offset + data.len()].copy_from_slice(data);
        let grown = (offset + data.len()) as u16;
        let current = u16::from_le_bytes([guard.bytes[0], guard.bytes[1]]);
        let new_fso = current.max(grown);
        guard.bytes[0..2].copy_from_slice(&new_fso.to_le_bytes());
        guard.dirty = true;
    }

    /// Overwrite bytes at `offset` without touching the FSO (used for
    /// in-place updates where the slot size never changes).
    pub fn overwrite_raw(&self, offset: usize, data: &[u8]) {
        self.with_bytes_mut(|b| b[offset..offset + data.len()].copy_from_slice(data));
    }

    // -- Page 1: clean-shutdown marker --------------------------------------

    /// Write a fresh open-marker nonce into `[100, 108)`.
    pub fn write_open_marker(&self, nonce: [u8; 8]) {
        self.with_bytes_mut(|b| b[NONCE_A].copy_from_slice(&nonce));
    }

    /// Copy the open-marker nonce into `[108, 116)`, proving a clean
    /// shutdown on the next open.
    pub fn stamp_clean_shutdown(&self) {
        let mut guard = self.inner.lock();
        let (a, rest) = guard.bytes.split_at_mut(NONCE_B.start);
        rest[..8].copy_from_slice(&a[NONCE_A]);
        guard.dirty = true;
    }

    /// Whether the two marker regions agree, i.e. the last shutdown was
    /// clean.
    #[must_use]
    pub fn is_clean_shutdown(&self) -> bool {
        self.with_bytes(|b| b[NONCE_A.clone()] == b[NONCE_B.clone()])
    }
}
