// Denomination and serial-number addressing shared by every storage and
// protocol component (spec §3).

use serde::{Deserialize, Serialize};

/// Signed denomination selector, -8..=6 (fifteen values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Denomination(i8);

/// Offset applied to map a signed denomination onto a dense array index.
pub const OFFSET: i8 = 8;

/// Number of distinct denominations.
pub const COUNT: usize = 15;

/// Records per page (protocol constant `R`).
pub const RECORDS_PER_PAGE: u32 = 1024;

/// Pages per denomination (protocol constant `P`).
pub const PAGES_PER_DENOMINATION: u32 = 1024;

/// 16-byte authentication number.
pub type An = [u8; 16];

impl Denomination {
    /// Construct from a signed value in -8..=6; `None` if out of range.
    pub fn new(value: i8) -> Option<Self> {
        if (-8..=6).contains(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Construct from the dense 0..COUNT index used by internal arrays.
    pub fn from_index(index: usize) -> Option<Self> {
        if index < COUNT {
            Some(Self(index as i8 - OFFSET))
        } else {
            None
        }
    }

    pub fn value(self) -> i8 {
        self.0
    }

    pub fn index(self) -> usize {
        (self.0 + OFFSET) as usize
    }

    /// One denomination step down (toward smaller value), used by `join`.
    pub fn step_down(self) -> Option<Self> {
        Self::new(self.0 - 1)
    }

    /// One denomination step up (toward larger value), used by `break`.
    pub fn step_up(self) -> Option<Self> {
        Self::new(self.0 + 1)
    }

    /// All fifteen denominations in ascending order.
    pub fn all() -> impl Iterator<Item = Denomination> {
        (0..COUNT).map(|i| Denomination::from_index(i).unwrap())
    }
}

impl std::fmt::Display for Denomination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serial number: `page_no * RECORDS_PER_PAGE + slot_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sn(pub u32);

impl Sn {
    pub fn new(sn: u32) -> Self {
        Self(sn)
    }

    pub fn page_no(self) -> u32 {
        self.0 / RECORDS_PER_PAGE
    }

    pub fn slot_index(self) -> u32 {
        self.0 % RECORDS_PER_PAGE
    }

    pub fn from_page_slot(page_no: u32, slot_index: u32) -> Self {
        Self(page_no * RECORDS_PER_PAGE + slot_index)
    }

    pub fn is_in_range(self) -> bool {
        self.page_no() < PAGES_PER_DENOMINATION
    }
}
