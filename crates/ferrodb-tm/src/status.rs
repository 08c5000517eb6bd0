//! Per-XID status byte stored in the XID file.

/// Status of a transaction as recorded in the XID file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XidStatus {
    Active,
    Committed,
    Aborted,
}

impl XidStatus {
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Committed => 1,
            Self::Aborted => 2,
        }
    }

    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Active),
            1 => Some(Self::Committed),
            2 => Some(Self::Aborted),
            _ => None,
        }
    }
}
