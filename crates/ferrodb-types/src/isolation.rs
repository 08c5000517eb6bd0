use serde::{Deserialize, Serialize};

use ferrodb_error::{FerroError, Result};

/// Isolation level requested at `begin()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum IsolationLevel {
    /// Level 0: see every version committed by the time each individual
    /// read executes.
    ReadCommitted = 0,
    /// Level 1: see only versions committed before the transaction began,
    /// pinned by a snapshot of concurrently-active XIDs.
    RepeatableRead = 1,
}

impl IsolationLevel {
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(Self::ReadCommitted),
            1 => Ok(Self::RepeatableRead),
            other => Err(FerroError::internal(format!(
                "unknown isolation level byte {other}"
            ))),
        }
    }

    #[must_use]
    pub const fn is_repeatable_read(self) -> bool {
        matches!(self, Self::RepeatableRead)
    }
}
