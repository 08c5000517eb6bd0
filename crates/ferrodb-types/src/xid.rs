use std::fmt;

/// Transaction identifier.
///
/// XID 0 is the reserved "super" transaction: always committed, never
/// written to the XID file, used as the creator of bootstrap records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Xid(u64);

impl Xid {
    pub const SUPER: Self = Self(0);

    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_super(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xid:{}", self.0)
    }
}

impl From<u64> for Xid {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}
