//! Append-only, checksummed write-ahead log (§4.2, §6).
//!
//! On-disk layout: `[file_checksum:i32 LE][record]*` where each record is
//! `[len:u32 LE][chk:i32 LE][payload:len]`. `append` is write-ahead of the
//! page mutation it describes; `open` truncates a trailing partially
//! written record ("bad tail") before handing the log to the recovery pass.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;

use ferrodb_error::{FerroError, Result};

use crate::checksum::{accumulate_file_checksum, record_checksum};

const PREFIX_LEN: u64 = 4;
const RECORD_HEADER_LEN: u64 = 8;

struct LoggerState {
    file: File,
    /// Running whole-file checksum, kept in sync with the on-disk prefix.
    file_checksum: i32,
    /// Current length of the well-formed portion of the file.
    len: u64,
    /// Iterator cursor used by `rewind`/`next`.
    cursor: u64,
}

/// The write-ahead log.
pub struct Logger {
    state: Mutex<LoggerState>,
}

impl Logger {
    /// Create a brand-new, empty log file at `path`.
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
        file.write_all(&0i32.to_le_bytes())?;
        file.sync_data()?;
        Ok(Self {
            state: Mutex::new(LoggerState {
                file,
                file_checksum: 0,
                len: PREFIX_LEN,
                cursor: PREFIX_LEN,
            }),
        })
    }

    /// Open an existing log file, verifying the file-checksum prefix and
    /// truncating any trailing bad tail.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FerroError::FileNotExists(path.to_path_buf()));
        }
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < PREFIX_LEN {
            return Err(FerroError::BadLogFile(
                "log file shorter than its checksum prefix".to_owned(),
            ));
        }

        let mut prefix_bytes = [0u8; 4];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut prefix_bytes)?;
        let declared = i32::from_le_bytes(prefix_bytes);

        let mut running = 0i32;
        let mut offset = PREFIX_LEN;
        // A trailing record whose length runs past `file_len` is a "bad
        // tail" — the writer was interrupted mid-append, not corruption —
        // and gets truncated below. A *complete* record whose checksum
        // doesn't match its own header, by contrast, is never a bad tail:
        // it's corruption within the verified portion of the file, and is
        // fatal regardless of what follows it.
        let mut corrupt_record = false;
        loop {
            if offset + RECORD_HEADER_LEN > file_len {
                break; // partial header: bad tail.
            }
            let mut header = [0u8; 8];
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut header)?;
            let rec_len = u32::from_le_bytes(header[0..4].try_into().unwrap()) as u64;
            let rec_chk = i32::from_le_bytes(header[4..8].try_into().unwrap());

            if offset + RECORD_HEADER_LEN + rec_len > file_len {
                break; // partial payload: bad tail.
            }
            let mut payload = vec![0u8; rec_len as usize];
            file.read_exact(&mut payload)?;
            if record_checksum(&payload) != rec_chk {
                corrupt_record = true;
                break;
            }

            running = accumulate_file_checksum(running, rec_chk);
            offset += RECORD_HEADER_LEN + rec_len;
        }

        if corrupt_record {
            return Err(FerroError::BadLogFile(format!(
                "corrupt record at offset {offset}: payload does not match its own checksum"
            )));
        }

        if offset == file_len {
            // The whole file parsed as well-formed records; its checksum
            // prefix must match what they fold to.
            if running != declared {
                return Err(FerroError::BadLogFile(format!(
                    "file checksum mismatch: declared={declared} computed={running}"
                )));
            }
        } else {
            // Length-based bad tail: truncate it and rewrite the prefix to
            // the checksum folded over only the surviving records, so the
            // file stays internally consistent regardless of what the
            // interrupted append had (or hadn't) written to the prefix.
            tracing::warn!(
                good_len = offset,
                file_len,
                "truncating bad tail from log file"
            );
            file.set_len(offset)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&running.to_le_bytes())?;
            file.sync_all()?;
        }

        Ok(Self {
            state: Mutex::new(LoggerState {
                file,
                file_checksum: running,
                len: offset,
                cursor: PREFIX_LEN,
            }),
        })
    }

    /// Append a record's payload, write-ahead of whatever mutation it
    /// describes. Forces the write to disk before returning.
    pub fn append(&self, bytes: &[u8]) -> Result<()> {
        let chk = record_checksum(bytes);
        let mut state = self.state.lock();
        let offset = state.len;

        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(&(bytes.len() as u32).to_le_bytes())?;
        state.file.write_all(&chk.to_le_bytes())?;
        state.file.write_all(bytes)?;

        let new_checksum = accumulate_file_checksum(state.file_checksum, chk);
        state.file.seek(SeekFrom::Start(0))?;
        state.file.write_all(&new_checksum.to_le_bytes())?;
        state.file.sync_data()?;

        state.file_checksum = new_checksum;
        state.len = offset + RECORD_HEADER_LEN + bytes.len() as u64;
        Ok(())
    }

    /// Reset the forward-iteration cursor to the first record.
    pub fn rewind(&self) {
        self.state.lock().cursor = PREFIX_LEN;
    }

    /// Return the next record's payload, or `None` at end of file (or on a
    /// per-record checksum failure, which is treated as EOF).
    pub fn next(&self) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock();
        let cursor = state.cursor;
        if cursor + RECORD_HEADER_LEN > state.len {
            return Ok(None);
        }

        let mut header = [0u8; 8];
        state.file.seek(SeekFrom::Start(cursor))?;
        state.file.read_exact(&mut header)?;
        let rec_len = u32::from_le_bytes(header[0..4].try_into().unwrap()) as u64;
        let rec_chk = i32::from_le_bytes(header[4..8].try_into().unwrap());

        if cursor + RECORD_HEADER_LEN + rec_len > state.len {
            return Ok(None);
        }
        let mut payload = vec![0u8; rec_len as usize];
        state.file.read_exact(&mut payload)?;
        if record_checksum(&payload) != rec_chk {
            return Ok(None);
        }

        state.cursor = cursor + RECORD_HEADER_LEN + rec_len;
        Ok(Some(payload))
    }

    /// Current whole-file checksum, for tests and diagnostics.
    #[must_use]
    pub fn file_checksum(&self) -> i32 {
        self.state.lock().file_checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_logger() -> (tempfile::TempDir, Logger) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");
        let logger = Logger::create(&path).unwrap();
        (dir, logger)
    }

    #[test]
    fn append_then_iterate_round_trips() {
        let (_dir, logger) = new_logger();
        logger.append(b"first").unwrap();
        logger.append(b"second").unwrap();

        logger.rewind();
        assert_eq!(logger.next().unwrap().as_deref(), Some(&b"first"[..]));
        assert_eq!(logger.next().unwrap().as_deref(), Some(&b"second"[..]));
        assert_eq!(logger.next().unwrap(), None);
    }

    #[test]
    fn reopen_verifies_checksum_and_replays() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");
        {
            let logger = Logger::create(&path).unwrap();
            logger.append(b"alpha").unwrap();
            logger.append(b"beta").unwrap();
        }

        let logger = Logger::open(&path).unwrap();
        logger.rewind();
        assert_eq!(logger.next().unwrap().as_deref(), Some(&b"alpha"[..]));
        assert_eq!(logger.next().unwrap().as_deref(), Some(&b"beta"[..]));
        assert_eq!(logger.next().unwrap(), None);
    }

    #[test]
    fn bad_tail_is_truncated_and_checksum_still_verifies() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");
        {
            let logger = Logger::create(&path).unwrap();
            logger.append(b"kept").unwrap();
            logger.append(b"keep-me").unwrap();
        }

        // Truncate the last 4 bytes of the file: a crash partway through
        // writing the second record's payload. The first record is
        // unaffected; the second is an incomplete bad tail and must be
        // dropped in full, not partially recovered.
        let file_len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(file_len - 4).unwrap();

        let logger = Logger::open(&path).unwrap();
        logger.rewind();
        assert_eq!(logger.next().unwrap().as_deref(), Some(&b"kept"[..]));
        assert_eq!(logger.next().unwrap(), None);

        // A further append should still produce a verifiable file.
        logger.append(b"after-recovery").unwrap();
        drop(logger);
        let reopened = Logger::open(&path).unwrap();
        reopened.rewind();
        assert_eq!(reopened.next().unwrap().as_deref(), Some(&b"kept"[..]));
        assert_eq!(
            reopened.next().unwrap().as_deref(),
            Some(&b"after-recovery"[..])
        );
    }

    #[test]
    fn corrupt_record_within_verified_range_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");
        {
            let logger = Logger::create(&path).unwrap();
            logger.append(b"hello").unwrap();
        }
        // Flip a payload byte without updating either checksum: this must
        // NOT look like a bad tail (the record is still fully present),
        // so the whole-file checksum a reader recomputes over all
        // "well-formed" records will no longer match the stored prefix and
        // the open must fail instead of silently truncating good data.
        let mut bytes = std::fs::read(&path).unwrap();
        let payload_start = bytes.len() - 5;
        bytes[payload_start] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let err = Logger::open(&path).unwrap_err();
        assert!(matches!(err, FerroError::BadLogFile(_)));
    }

    #[test]
    fn empty_log_has_zero_checksum() {
        let (_dir, logger) = new_logger();
        assert_eq!(logger.file_checksum(), 0);
    }
}
