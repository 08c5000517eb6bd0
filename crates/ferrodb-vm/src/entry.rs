//! `Entry` (§3): the MVCC envelope written into a `DataItem`'s payload —
//! `[xmin:8][xmax:8][record bytes]`.

use ferrodb_error::{FerroError, Result};
use ferrodb_types::Xid;

const ENVELOPE_LEN: usize = 16;

/// A decoded MVCC record. `xmax` of `Xid::SUPER` (value 0) means
/// "not yet deleted" — XID 0 can never be a real deleter since it's the
/// always-committed super XID.
#[derive(Debug, Clone)]
pub struct Entry {
    pub xmin: Xid,
    pub xmax: Xid,
    pub record: Vec<u8>,
}

impl Entry {
    /// Build a fresh entry for a brand-new insert: no deleter yet.
    #[must_use]
    pub fn new_inserted(xmin: Xid, record: Vec<u8>) -> Self {
        Self {
            xmin,
            xmax: Xid::SUPER,
            record,
        }
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        !self.xmax.is_super()
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ENVELOPE_LEN + self.record.len());
        out.extend_from_slice(&self.xmin.get().to_le_bytes());
        out.extend_from_slice(&self.xmax.get().to_le_bytes());
        out.extend_from_slice(&self.record);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ENVELOPE_LEN {
            return Err(FerroError::internal("entry payload shorter than its envelope"));
        }
        let xmin = Xid::new(u64::from_le_bytes(bytes[0..8].try_into().unwrap()));
        let xmax = Xid::new(u64::from_le_bytes(bytes[8..16].try_into().unwrap()));
        Ok(Self {
            xmin,
            xmax,
            record: bytes[ENVELOPE_LEN..].to_vec(),
        })
    }
}
