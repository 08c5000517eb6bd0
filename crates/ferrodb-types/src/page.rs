use std::num::NonZeroU32;

/// Fixed on-disk page size. The spec mandates a single, non-tunable page
/// size rather than the teacher's configurable `PageSize`; page-size tuning
/// is not part of this format.
pub const PAGE_SIZE: usize = 8192;

/// Bytes reserved at the front of every ordinary page for the free-space
/// offset (FSO) cursor.
pub const PAGE_HEADER_SIZE: usize = 2;

/// Largest payload an ordinary page can hold.
pub const MAX_PAGE_PAYLOAD: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// 1-based page number. Page 1 is reserved for the clean-shutdown marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageNumber(NonZeroU32);

impl PageNumber {
    pub const ONE: Self = Self(NonZeroU32::new(1).expect("1 is non-zero"));

    #[must_use]
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self(
            NonZeroU32::new(self.get() + 1)
                .expect("page counter does not wrap in any realistic run"),
        )
    }
}
