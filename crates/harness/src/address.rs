use core::fmt;
use core::num::NonZeroU8;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identity handed to a router process; also the pub/sub partition key.
///
/// The firmware keeps addresses in a single byte and reserves zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(NonZeroU8);

impl Address {
    #[must_use]
    pub const fn new(value: u8) -> Option<Self> {
        match NonZeroU8::new(value) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    #[must_use]
    pub const fn get(self) -> u8 {
        self.0.get()
    }

    /// Two-digit upper-case hex, as it appears inside a frame.
    #[must_use]
    pub fn hex(self) -> String {
        format!("{:02X}", self.get())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = core::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Hands out addresses `1, 2, 3, ...` and never reuses one.
#[derive(Debug, Default)]
pub struct AddressAllocator {
    last: u8,
}

impl AddressAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    pub fn next(&mut self) -> Option<Address> {
        let next = self.last.checked_add(1)?;
        self.last = next;
        Address::new(next)
    }
}
