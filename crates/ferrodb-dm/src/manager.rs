//! The Data Manager (§4.3): orchestrates the Page Cache, Free-Space
//! Index, Logger, and `DataItem` protocol into `read`/`insert` and the
//! before/after update path.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;

use ferrodb_error::{FerroError, Result};
use ferrodb_pager::{FreeSpaceIndex, PageCache};
use ferrodb_tm::TransactionManager;
use ferrodb_types::{PageNumber, Uid, Xid, PAGE_HEADER_SIZE, PAGE_SIZE};
use ferrodb_wal::Logger;

use crate::data_item::{encode_header, DataItem};
use crate::recovery;
use crate::wal_record::WalRecord;

/// Insertion retries this many times, allocating a fresh page on each
/// miss, before giving up with `DatabaseBusy`.
const INSERT_RETRIES: u32 = 5;

/// An empty ordinary data page: FSO set to `PAGE_HEADER_SIZE` so the first
/// slot lands right after the header, not on top of it.
fn blank_data_page() -> Vec<u8> {
    let mut page = vec![0u8; PAGE_SIZE];
    page[0..2].copy_from_slice(&(PAGE_HEADER_SIZE as u16).to_le_bytes());
    page
}

struct ItemEntry {
    item: Arc<DataItem>,
    refcount: u32,
}

/// Caches `DataItem`s by UID on top of the Page Cache, and is the sole
/// writer of WAL records.
pub struct DataManager {
    pager: PageCache,
    free_space: FreeSpaceIndex,
    wal: Logger,
    items: Mutex<HashMap<Uid, ItemEntry>>,
}

impl DataManager {
    /// Initialize a brand-new database: a fresh data file, log, and a
    /// page 1 carrying the open-shutdown marker (clean by construction).
    pub fn create(db_path: &Path, log_path: &Path, cache_capacity: usize) -> Result<Self> {
        let pager = PageCache::open(db_path, cache_capacity)?;
        let wal = Logger::create(log_path)?;

        // Only the open-marker half is written; the clean-shutdown half
        // stays zeroed. Stamping both equal here would make a crash before
        // this session's first `close` look clean on the next open, which
        // defeats the whole point of the marker (§3).
        let mut marker = vec![0u8; PAGE_SIZE];
        marker[100..108].copy_from_slice(&random_nonce());
        pager.new_page(&marker);

        Ok(Self {
            pager,
            free_space: FreeSpaceIndex::new(),
            wal,
            items: Mutex::new(HashMap::new()),
        })
    }

    /// Open an existing database. Runs recovery if page 1's shutdown
    /// marker shows the prior run crashed, then rebuilds the free-space
    /// index from every page beyond page 1.
    pub fn open(
        db_path: &Path,
        log_path: &Path,
        cache_capacity: usize,
        tm: &TransactionManager,
    ) -> Result<Self> {
        let wal = Logger::open(log_path)?;
        let pager = PageCache::open(db_path, cache_capacity)?;

        let page1 = pager.get_page(PageNumber::ONE)?;
        let clean = page1.is_clean_shutdown();
        pager.release(PageNumber::ONE);

        if !clean {
            tracing::warn!("unclean shutdown detected; running recovery");
            recovery::run(&pager, &wal, tm)?;
        }

        // Refresh the open-marker nonce for this session but deliberately
        // leave the clean-shutdown half alone: only an explicit `close`
        // copies the new nonce over, so a crash before that point still
        // shows up as unclean on the next open.
        let page1 = pager.get_page(PageNumber::ONE)?;
        page1.write_open_marker(random_nonce());
        pager.flush(&page1);
        pager.release(PageNumber::ONE);

        let free_space = FreeSpaceIndex::new();
        for raw in 2..=pager.page_count() {
            let pgno = PageNumber::new(raw).expect("loop bound is non-zero");
            let page = pager.get_page(pgno)?;
            let free = PAGE_SIZE - page.fso() as usize;
            pager.release(pgno);
            free_space.add(pgno, free);
        }

        Ok(Self {
            pager,
            free_space,
            wal,
            items: Mutex::new(HashMap::new()),
        })
    }

    /// Read a slot's payload, or `None` if it has been logically deleted.
    pub fn read(&self, uid: Uid) -> Result<Option<Vec<u8>>> {
        let item = self.get_item(uid)?;
        let result = if item.is_valid() {
            Some(item.read_payload())
        } else {
            None
        };
        self.release_item(uid);
        Ok(result)
    }

    /// Wrap `bytes` as a fresh slot and insert it, write-ahead logged.
    /// Returns the new slot's UID.
    pub fn insert(&self, xid: Xid, bytes: &[u8]) -> Result<Uid> {
        let raw = encode_header(bytes);
        if raw.len() > PAGE_SIZE - 2 {
            return Err(FerroError::DataTooLarge {
                size: raw.len(),
                max: PAGE_SIZE - 2,
            });
        }

        for _ in 0..INSERT_RETRIES {
            let pgno = match self.free_space.select(raw.len()) {
                Some(pgno) => pgno,
                None => self.pager.new_page(&blank_data_page()),
            };

            let page = self.pager.get_page(pgno)?;
            let fso = page.fso();
            let available = PAGE_SIZE - fso as usize;
            if available < raw.len() {
                // The index's catch-all bucket under-delivered; this page
                // can't take the record. Re-file it at its real free
                // space and retry with a fresh page.
                self.free_space.add(pgno, available);
                self.pager.release(pgno);
                continue;
            }

            let record = WalRecord::Insert {
                xid,
                pgno,
                offset: fso,
                raw: raw.clone(),
            };
            self.wal.append(&record.encode())?;
            page.splice_raw(fso as usize, &raw);
            self.pager.release(pgno);
            self.free_space.add(pgno, PAGE_SIZE - page.fso() as usize);

            return Ok(Uid::new(pgno, fso));
        }

        Err(FerroError::DatabaseBusy)
    }

    /// Begin a logged mutation of `uid`'s payload: acquires the slot's
    /// write lock and snapshots its before-image. Must be followed by
    /// `commit_update` or `cancel_update`.
    pub fn begin_update(&self, uid: Uid) -> Result<Arc<DataItem>> {
        let item = self.get_item(uid)?;
        item.before();
        Ok(item)
    }

    /// Apply `new_bytes` (same length as the slot's current payload),
    /// write the update WAL record, and release the write lock.
    pub fn commit_update(&self, item: &Arc<DataItem>, xid: Xid, new_bytes: &[u8]) -> Result<()> {
        item.write_payload(new_bytes)?;
        item.after(xid, &self.wal)?;
        self.release_item(item.uid());
        Ok(())
    }

    /// Abandon an in-progress mutation, restoring the before-image.
    pub fn cancel_update(&self, item: &Arc<DataItem>) {
        item.un_before();
        self.release_item(item.uid());
    }

    /// Stamp page 1's clean-shutdown marker and flush it. The embedding
    /// process is expected to call this on an orderly exit; skipping it
    /// (a crash) is exactly what the next `open` detects via
    /// `is_clean_shutdown` and repairs with recovery.
    pub fn close(&self) -> Result<()> {
        let page1 = self.pager.get_page(PageNumber::ONE)?;
        page1.stamp_clean_shutdown();
        self.pager.flush(&page1);
        self.pager.release(PageNumber::ONE);
        Ok(())
    }

    fn get_item(&self, uid: Uid) -> Result<Arc<DataItem>> {
        {
            let mut items = self.items.lock();
            if let Some(entry) = items.get_mut(&uid) {
                entry.refcount += 1;
                return Ok(Arc::clone(&entry.item));
            }
        }
        let page = self.pager.get_page(uid.pgno())?;
        let item = Arc::new(DataItem::new(uid, page));
        let mut items = self.items.lock();
        // Another thread may have raced us; prefer whichever is already
        // cached to keep a single write-lock per slot.
        let entry = items.entry(uid).or_insert_with(|| ItemEntry {
            item: Arc::clone(&item),
            refcount: 0,
        });
        entry.refcount += 1;
        Ok(Arc::clone(&entry.item))
    }

    fn release_item(&self, uid: Uid) {
        let evicted = {
            let mut items = self.items.lock();
            let Some(entry) = items.get_mut(&uid) else {
                return;
            };
            entry.refcount -= 1;
            if entry.refcount > 0 {
                return;
            }
            items.remove(&uid)
        };
        if evicted.is_some() {
            self.pager.release(uid.pgno());
        }
    }
}

fn random_nonce() -> [u8; 8] {
    let mut rng = rand::thread_rng();
    let mut nonce = [0u8; 8];
    rng.fill(&mut nonce);
    nonce
}
