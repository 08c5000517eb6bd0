//! WAL record payloads (§3, §6): `[type:1][xid:8][...]`, written ahead of
//! every page mutation the Data Manager makes.

use ferrodb_error::{FerroError, Result};
use ferrodb_types::{PageNumber, Uid, Xid};

const TYPE_INSERT: u8 = 0;
const TYPE_UPDATE: u8 = 1;

/// A decoded WAL record body (the Logger's per-record payload, without its
/// own length/checksum framing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// `raw` is the full `[valid][size][bytes]` slot encoding written at
    /// `offset` in `pgno`.
    Insert {
        xid: Xid,
        pgno: PageNumber,
        offset: u16,
        raw: Vec<u8>,
    },
    /// `old`/`new` are the slot's complete payload before and after the
    /// mutation; always equal length.
    Update {
        xid: Xid,
        uid: Uid,
        old: Vec<u8>,
        new: Vec<u8>,
    },
}

impl WalRecord {
    #[must_use]
    pub const fn xid(&self) -> Xid {
        match self {
            Self::Insert { xid, .. } | Self::Update { xid, .. } => *xid,
        }
    }

    /// The page this record mutates.
    #[must_use]
    pub fn pgno(&self) -> PageNumber {
        match self {
            Self::Insert { pgno, .. } => *pgno,
            Self::Update { uid, .. } => uid.pgno(),
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Insert {
                xid,
                pgno,
                offset,
                raw,
            } => {
                let mut out = Vec::with_capacity(1 + 8 + 4 + 2 + raw.len());
                out.push(TYPE_INSERT);
                out.extend_from_slice(&xid.get().to_le_bytes());
                out.extend_from_slice(&pgno.get().to_le_bytes());
                out.extend_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(raw);
                out
            }
            Self::Update { xid, uid, old, new } => {
                debug_assert_eq!(old.len(), new.len());
                let mut out = Vec::with_capacity(1 + 8 + 8 + old.len() + new.len());
                out.push(TYPE_UPDATE);
                out.extend_from_slice(&xid.get().to_le_bytes());
                out.extend_from_slice(&uid.raw().to_le_bytes());
                out.extend_from_slice(old);
                out.extend_from_slice(new);
                out
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(FerroError::BadLogFile("empty WAL record".to_owned()));
        }
        let (type_byte, rest) = (bytes[0], &bytes[1..]);
        if rest.len() < 8 {
            return Err(FerroError::BadLogFile("WAL record missing XID".to_owned()));
        }
        let (xid_bytes, rest) = rest.split_at(8);
        let xid = Xid::new(u64::from_le_bytes(xid_bytes.try_into().unwrap()));

        match type_byte {
            TYPE_INSERT => {
                if rest.len() < 6 {
                    return Err(FerroError::BadLogFile(
                        "insert WAL record missing pgno/offset".to_owned(),
                    ));
                }
                let (pgno_bytes, rest) = rest.split_at(4);
                let (offset_bytes, raw) = rest.split_at(2);
                let pgno = PageNumber::new(u32::from_le_bytes(pgno_bytes.try_into().unwrap()))
                    .ok_or_else(|| {
                        FerroError::BadLogFile("insert WAL record has page number 0".to_owned())
                    })?;
                let offset = u16::from_le_bytes(offset_bytes.try_into().unwrap());
                Ok(Self::Insert {
                    xid,
                    pgno,
                    offset,
                    raw: raw.to_vec(),
                })
            }
            TYPE_UPDATE => {
                if rest.len() < 8 || (rest.len() - 8) % 2 != 0 {
                    return Err(FerroError::BadLogFile(
                        "update WAL record has malformed uid/old/new lengths".to_owned(),
                    ));
                }
                let (uid_bytes, rest) = rest.split_at(8);
                let uid = Uid::from_raw(u64::from_le_bytes(uid_bytes.try_into().unwrap()));
                let half = rest.len() / 2;
                Ok(Self::Update {
                    xid,
                    uid,
                    old: rest[..half].to_vec(),
                    new: rest[half..].to_vec(),
                })
            }
            other => Err(FerroError::BadLogFile(format!(
                "unknown WAL record type byte {other}"
            ))),
        }
    }
}
