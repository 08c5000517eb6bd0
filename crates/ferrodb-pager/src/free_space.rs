//! Free-space index (§4.1): a 41-bucket index mapping "guaranteed free
//! bytes" to candidate pages, so insertion can find a page with enough
//! room without scanning the whole file.

use std::collections::HashMap;

use parking_lot::Mutex;

use ferrodb_types::{PageNumber, PAGE_SIZE};

/// Number of buckets. Bucket `i` (for `i < 40`) guarantees at least
/// `i * THRESHOLD` free bytes; bucket 40 is the catch-all for pages with
/// more free space than bucket 39 guarantees.
const NUM_BUCKETS: usize = 41;

/// `PAGE_SIZE / 40`, truncated. Each bucket step is this many bytes.
const THRESHOLD: usize = PAGE_SIZE / 40;

fn bucket_for(free_bytes: usize) -> usize {
    (free_bytes / THRESHOLD).min(NUM_BUCKETS - 1)
}

struct Bucket {
    pages: Vec<PageNumber>,
}

/// Tracks, per page, an approximate lower bound on its free space, bucketed
/// into 41 tiers so a page with enough room can be found in O(1) rather
/// than by scanning the file.
pub struct FreeSpaceIndex {
    buckets: Mutex<[Bucket; NUM_BUCKETS]>,
    /// Which bucket (if any) each page currently sits in, so `add` can
    /// remove a stale entry before re-inserting.
    location: Mutex<HashMap<PageNumber, usize>>,
}

impl FreeSpaceIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(std::array::from_fn(|_| Bucket { pages: Vec::new() })),
            location: Mutex::new(HashMap::new()),
        }
    }

    /// Record (or update) a page's free-byte count.
    pub fn add(&self, pgno: PageNumber, free_bytes: usize) {
        let new_idx = bucket_for(free_bytes);
        let mut buckets = self.buckets.lock();
        let mut location = self.location.lock();
        if let Some(old_idx) = location.insert(pgno, new_idx) {
            if old_idx == new_idx {
                return;
            }
            buckets[old_idx].pages.retain(|p| *p != pgno);
        }
        buckets[new_idx].pages.push(pgno);
    }

    /// Remove a page from the index entirely (e.g. it was deleted or its
    /// state is about to be revised by the caller via a fresh `add`).
    pub fn remove(&self, pgno: PageNumber) {
        let mut location = self.location.lock();
        if let Some(idx) = location.remove(&pgno) {
            self.buckets.lock()[idx].pages.retain(|p| *p != pgno);
        }
    }

    /// Find and remove a page guaranteed to have at least `need` free
    /// bytes. The caller must `add` the page back in with its updated
    /// free-byte count after using it.
    ///
    /// Starts at bucket `need / THRESHOLD + 1`: a page in bucket `idx`
    /// has at least `idx * THRESHOLD` free bytes, so starting one bucket
    /// past the floor division guarantees the candidate holds `need`.
    /// Scans upward through the catch-all bucket, whose members carry no
    /// upper bound on free space.
    pub fn select(&self, need: usize) -> Option<PageNumber> {
        let start = (need / THRESHOLD + 1).min(NUM_BUCKETS - 1);
        let mut buckets = self.buckets.lock();
        for idx in start..NUM_BUCKETS {
            if let Some(pgno) = buckets[idx].pages.pop() {
                drop(buckets);
                self.location.lock().remove(&pgno);
                return Some(pgno);
            }
        }
        None
    }
}

impl Default for FreeSpaceIndex {
    fn default() -> Self {
        Self::new()
    }
}
