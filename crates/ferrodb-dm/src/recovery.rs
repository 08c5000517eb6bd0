//! Crash recovery (§4.4): scan, redo, undo. Runs once at startup against
//! an unclean shutdown, after the Logger has already truncated any bad
//! tail.

use std::collections::HashMap;

use ferrodb_error::Result;
use ferrodb_pager::PageCache;
use ferrodb_tm::TransactionManager;
use ferrodb_types::Xid;
use ferrodb_wal::Logger;

use crate::wal_record::WalRecord;

/// Value written into a slot's valid byte by `DataItem`; kept in sync with
/// `data_item::VALID`'s polarity rather than imported, since recovery
/// operates on raw page bytes, not through a live `DataItem`.
const INVALID: u8 = 1;

/// Run the full scan/redo/undo recovery pass.
pub fn run(pager: &PageCache, wal: &Logger, tm: &TransactionManager) -> Result<()> {
    let max_pgno = scan_max_pgno(wal)?;
    pager.truncate_to(max_pgno);

    redo(pager, wal, tm)?;
    undo(pager, wal, tm)?;

    Ok(())
}

fn scan_max_pgno(wal: &Logger) -> Result<u32> {
    let mut max_pgno = 1u32;
    wal.rewind();
    while let Some(bytes) = wal.next()? {
        let record = WalRecord::decode(&bytes)?;
        max_pgno = max_pgno.max(record.pgno().get());
    }
    Ok(max_pgno)
}

fn redo(pager: &PageCache, wal: &Logger, tm: &TransactionManager) -> Result<()> {
    wal.rewind();
    while let Some(bytes) = wal.next()? {
        let record = WalRecord::decode(&bytes)?;
        if tm.is_active(record.xid()) {
            continue; // still in flight at crash time; undone below instead.
        }
        apply_redo(pager, &record)?;
    }
    Ok(())
}

fn apply_redo(pager: &PageCache, record: &WalRecord) -> Result<()> {
    match record {
        WalRecord::Insert {
            pgno, offset, raw, ..
        } => {
            let page = pager.get_page(*pgno)?;
            page.splice_raw(*offset as usize, raw);
            pager.release(*pgno);
        }
        WalRecord::Update { uid, new, .. } => {
            let pgno = uid.pgno();
            let page = pager.get_page(pgno)?;
            page.overwrite_raw(uid.offset() as usize, new);
            pager.release(pgno);
        }
    }
    Ok(())
}

fn undo(pager: &PageCache, wal: &Logger, tm: &TransactionManager) -> Result<()> {
    let mut per_xid: HashMap<Xid, Vec<WalRecord>> = HashMap::new();
    wal.rewind();
    while let Some(bytes) = wal.next()? {
        let record = WalRecord::decode(&bytes)?;
        if tm.is_active(record.xid()) {
            per_xid.entry(record.xid()).or_default().push(record);
        }
    }

    for (xid, mut records) in per_xid {
        records.reverse();
        for record in &records {
            apply_undo(pager, record)?;
        }
        tm.abort(xid)?;
    }
    Ok(())
}

fn apply_undo(pager: &PageCache, record: &WalRecord) -> Result<()> {
    match record {
        WalRecord::Insert { pgno, offset, .. } => {
            let page = pager.get_page(*pgno)?;
            page.overwrite_raw(*offset as usize, &[INVALID]);
            pager.release(*pgno);
        }
        WalRecord::Update { uid, old, .. } => {
            let pgno = uid.pgno();
            let page = pager.get_page(pgno)?;
            page.overwrite_raw(uid.offset() as usize, old);
            pager.release(pgno);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrodb_types::PAGE_SIZE;
    use tempfile::tempdir;

    fn fresh(dir: &std::path::Path) -> (PageCache, Logger, TransactionManager) {
        let pager = PageCache::open(&dir.join("t.db"), 10).unwrap();
        let wal = Logger::create(&dir.join("t.log")).unwrap();
        let tm = TransactionManager::create(&dir.join("t.xid")).unwrap();
        pager.new_page(&vec![0u8; PAGE_SIZE]); // page 1, the marker page.
        (pager, wal, tm)
    }

    #[test]
    fn redo_applies_committed_inserts_and_leaves_active_ones_for_undo() {
        let dir = tempdir().unwrap();
        let (pager, wal, tm) = fresh(&dir);

        let committed = tm.begin().unwrap();
        let active = tm.begin().unwrap();
        tm.commit(committed).unwrap();

        let pgno = pager.new_page(&vec![0u8; PAGE_SIZE]);
        let raw = crate::data_item::encode_header(b"hello");
        let committed_record = WalRecord::Insert {
            xid: committed,
            pgno,
            offset: 0,
            raw: raw.clone(),
        };
        wal.append(&committed_record.encode()).unwrap();

        let active_record = WalRecord::Insert {
            xid: active,
            pgno,
            offset: raw.len() as u16,
            raw: crate::data_item::encode_header(b"world"),
        };
        wal.append(&active_record.encode()).unwrap();

        run(&pager, &wal, &tm).unwrap();

        let page = pager.get_page(pgno).unwrap();
        page.with_bytes(|b| {
            assert_eq!(&b[0..3 + 5], &raw[..]);
            // The active insert's slot was flipped invalid by undo.
            assert_eq!(b[raw.len()], 1);
        });
        pager.release(pgno);

        assert!(tm.is_aborted(active));
        assert!(tm.is_committed(committed));
    }
}
