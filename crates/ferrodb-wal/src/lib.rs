//! The write-ahead log ("Logger"): an append-only, checksummed record
//! stream that the Data Manager writes ahead of every page mutation.

mod checksum;
mod logger;

pub use checksum::{accumulate_file_checksum, fold, record_checksum, SEED};
pub use logger::Logger;
