//! The Page Cache (§4.1): a fixed-capacity, reference-counted cache of
//! pages backed by a single data file. Eviction only ever happens when a
//! release drops a page's refcount to zero — there is no LRU scan.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use ferrodb_error::{fatal, FerroError, Result};
use ferrodb_types::{PageNumber, MIN_CACHE_CAPACITY, PAGE_SIZE};

use crate::page::SharedPage;

struct CacheEntry {
    page: Arc<SharedPage>,
    refcount: u32,
}

struct CacheState {
    entries: HashMap<PageNumber, CacheEntry>,
    loading: HashSet<PageNumber>,
    /// Next page number `new_page` will allocate.
    next_pgno: u32,
}

/// Reference-counted cache of fixed-size pages, backed by one data file.
pub struct PageCache {
    state: Mutex<CacheState>,
    file: Mutex<File>,
    capacity: usize,
}

impl PageCache {
    /// Open (creating if absent) the data file backing this cache.
    ///
    /// Capacity below the spec's minimum is a fatal misconfiguration, not a
    /// recoverable error (§4.1: "Capacity below 10 is fatal").
    pub fn open(path: &Path, capacity: usize) -> Result<Self> {
        if capacity < MIN_CACHE_CAPACITY {
            fatal(
                "page cache open",
                FerroError::MemTooSmall {
                    requested: capacity,
                    minimum: MIN_CACHE_CAPACITY,
                },
            );
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let file_len = file.metadata()?.len();
        let page_count = (file_len / PAGE_SIZE as u64) as u32;

        Ok(Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                loading: HashSet::new(),
                next_pgno: page_count + 1,
            }),
            file: Mutex::new(file),
            capacity,
        })
    }

    /// Number of pages currently allocated in the data file.
    #[must_use]
    pub fn page_count(&self) -> u32 {
        self.state.lock().next_pgno - 1
    }

    /// Get (loading from disk if necessary) the page, incrementing its
    /// refcount. Fails with `CacheFull` if the cache is at capacity and the
    /// page isn't already resident.
    pub fn get_page(&self, pgno: PageNumber) -> Result<Arc<SharedPage>> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(entry) = state.entries.get_mut(&pgno) {
                    entry.refcount += 1;
                    return Ok(Arc::clone(&entry.page));
                }
                if !state.loading.contains(&pgno) {
                    if state.entries.len() >= self.capacity {
                        return Err(FerroError::CacheFull {
                            capacity: self.capacity,
                        });
                    }
                    state.loading.insert(pgno);
                    break;
                }
            }
            // Another thread is loading this exact page; back off briefly.
            thread::sleep(Duration::from_micros(200));
        }

        let bytes = self.read_page_from_file(pgno);

        let mut state = self.state.lock();
        state.loading.remove(&pgno);
        let page = Arc::new(SharedPage::new(pgno, bytes));
        state.entries.insert(
            pgno,
            CacheEntry {
                page: Arc::clone(&page),
                refcount: 1,
            },
        );
        Ok(page)
    }

    /// Release a previously obtained page, decrementing its refcount. At
    /// zero, flushes it (if dirty) and drops it from the cache.
    pub fn release(&self, pgno: PageNumber) {
        let evicted = {
            let mut state = self.state.lock();
            let Some(entry) = state.entries.get_mut(&pgno) else {
                return;
            };
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount > 0 {
                return;
            }
            state.entries.remove(&pgno).map(|e| e.page)
        };

        if let Some(page) = evicted {
            if page.is_dirty() {
                self.write_page_to_file(pgno, &page.snapshot());
                page.mark_clean();
            }
        }
    }

    /// Flush a page's current contents to disk without evicting it from
    /// the cache.
    pub fn flush(&self, page: &SharedPage) {
        if page.is_dirty() {
            self.write_page_to_file(page.pgno(), &page.snapshot());
            page.mark_clean();
        }
    }

    /// Atomically allocate the next page number, write `init_bytes` to disk
    /// at its offset, and return the page number. The new page is *not*
    /// inserted into the cache.
    pub fn new_page(&self, init_bytes: &[u8]) -> PageNumber {
        debug_assert_eq!(init_bytes.len(), PAGE_SIZE);
        let raw = {
            let mut state = self.state.lock();
            let raw = state.next_pgno;
            state.next_pgno += 1;
            raw
        };
        let pgno = PageNumber::new(raw).expect("allocated page numbers start at 1");
        self.write_page_to_file(pgno, init_bytes);
        pgno
    }

    /// Truncate the data file to `max_pgno` pages (at least 1), used by
    /// recovery to discard pages only ever referenced by a crashed,
    /// never-flushed write.
    pub fn truncate_to(&self, max_pgno: u32) {
        let max_pgno = max_pgno.max(1);
        let mut state = self.state.lock();
        state.entries.retain(|pgno, _| pgno.get() <= max_pgno);
        state.next_pgno = max_pgno + 1;
        drop(state);

        let file = self.file.lock();
        file.set_len(u64::from(max_pgno) * PAGE_SIZE as u64)
            .unwrap_or_else(|e| fatal("truncating data file", e));
    }

    fn read_page_from_file(&self, pgno: PageNumber) -> Vec<u8> {
        let offset = u64::from(pgno.get() - 1) * PAGE_SIZE as u64;
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))
            .unwrap_or_else(|e| fatal("seeking data file", e));
        let file_len = file
            .metadata()
            .unwrap_or_else(|e| fatal("stat data file", e))
            .len();
        if offset + PAGE_SIZE as u64 <= file_len {
            file.read_exact(&mut buf)
                .unwrap_or_else(|e| fatal("reading page", e));
        }
        // Pages beyond EOF (shouldn't normally happen) read as zeroed.
        buf
    }

    fn write_page_to_file(&self, pgno: PageNumber, bytes: &[u8]) {
        let offset = u64::from(pgno.get() - 1) * PAGE_SIZE as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))
            .unwrap_or_else(|e| fatal("seeking data file", e));
        file.write_all(bytes)
            .unwrap_or_else(|e| fatal("writing page", e));
        file.sync_data().unwrap_or_else(|e| fatal("fsync page", e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cache(capacity: usize) -> (tempfile::TempDir, PageCache) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let cache = PageCache::open(&path, capacity).unwrap();
        (dir, cache)
    }

    #[test]
    fn new_page_grows_file_deterministically() {
        let (dir, cache) = cache(MIN_CACHE_CAPACITY);
        let init = vec![0u8; PAGE_SIZE];
        let p1 = cache.new_page(&init);
        let p2 = cache.new_page(&init);
        assert_eq!(p1.get(), 1);
        assert_eq!(p2.get(), 2);
        let len = std::fs::metadata(dir.path().join("test.db")).unwrap().len();
        assert_eq!(len, 2 * PAGE_SIZE as u64);
    }

    #[test]
    fn get_release_round_trips_through_disk() {
        let (_dir, cache) = cache(MIN_CACHE_CAPACITY);
        let mut init = vec![0u8; PAGE_SIZE];
        init[5] = 0xAB;
        let pgno = cache.new_page(&init);

        let page = cache.get_page(pgno).unwrap();
        page.with_bytes(|b| assert_eq!(b[5], 0xAB));
        page.with_bytes_mut(|b| b[5] = 0xCD);
        cache.release(pgno);

        let page2 = cache.get_page(pgno).unwrap();
        page2.with_bytes(|b| assert_eq!(b[5], 0xCD));
        cache.release(pgno);
    }

    #[test]
    fn cache_full_when_capacity_exhausted_by_distinct_pages() {
        let (_dir, cache) = cache(MIN_CACHE_CAPACITY);
        let init = vec![0u8; PAGE_SIZE];
        let mut held = Vec::new();
        for _ in 0..20 {
            held.push(cache.new_page(&init));
        }
        let mut pages = Vec::new();
        for pgno in &held[..MIN_CACHE_CAPACITY] {
            pages.push(cache.get_page(*pgno).unwrap());
        }
        let err = cache.get_page(held[MIN_CACHE_CAPACITY]).unwrap_err();
        assert!(matches!(err, FerroError::CacheFull { .. }));
    }

    #[test]
    fn releasing_frees_capacity_for_a_new_page() {
        let (_dir, cache) = cache(MIN_CACHE_CAPACITY);
        let init = vec![0u8; PAGE_SIZE];
        let mut held = Vec::new();
        for _ in 0..11 {
            held.push(cache.new_page(&init));
        }
        for pgno in &held[..MIN_CACHE_CAPACITY] {
            let _ = cache.get_page(*pgno).unwrap();
        }
        // At capacity; release one and the next get_page should succeed.
        cache.release(held[0]);
        let page = cache.get_page(held[MIN_CACHE_CAPACITY]).unwrap();
        drop(page);
    }

    #[test]
    fn truncate_to_shrinks_file_and_drops_cached_pages() {
        let (dir, cache) = cache(MIN_CACHE_CAPACITY);
        let init = vec![0u8; PAGE_SIZE];
        for _ in 0..5 {
            cache.new_page(&init);
        }
        cache.truncate_to(2);
        let len = std::fs::metadata(dir.path().join("test.db")).unwrap().len();
        assert_eq!(len, 2 * PAGE_SIZE as u64);
        assert_eq!(cache.page_count(), 2);
    }
}
