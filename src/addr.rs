//! Addresses inside the address space of a tracee.
//!
//! [`Addr`] is a plain value type. It never gets dereferenced in the debugger itself, the only
//! place where it turns into a pointer is the ptrace seam in [`crate::memory`].

use std::fmt::Display;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

use crate::Word;

pub type RawPointer = *mut std::ffi::c_void;

#[derive(Hash, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Addr(usize);

impl Addr {
    pub const NULL: Addr = Addr(0);

    pub fn usize(&self) -> usize {
        self.0
    }
    pub fn u64(&self) -> u64 {
        self.0 as u64
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Distance from `base` up to `self`, [`None`] if `self` lies below `base`
    pub fn distance_from(&self, base: Addr) -> Option<usize> {
        self.0.checked_sub(base.0)
    }

    /// Rounds down to a multiple of `align`
    pub fn align_down(&self, align: usize) -> Addr {
        Addr(self.0 - self.0 % align)
    }
}

impl Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", { self.0 })
    }
}

impl std::fmt::UpperHex for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::UpperHex::fmt(&self.0, f)
    }
}

impl Add<usize> for Addr {
    type Output = Self;
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<usize> for Addr {
    fn add_assign(&mut self, rhs: usize) {
        self.0 = self.0.wrapping_add(rhs)
    }
}

impl Sub<usize> for Addr {
    type Output = Self;
    fn sub(self, rhs: usize) -> Self::Output {
        Self(self.0.wrapping_sub(rhs))
    }
}

impl SubAssign<usize> for Addr {
    fn sub_assign(&mut self, rhs: usize) {
        self.0 = self.0.wrapping_sub(rhs)
    }
}

impl From<Addr> for RawPointer {
    fn from(value: Addr) -> Self {
        value.0 as RawPointer
    }
}

impl From<usize> for Addr {
    fn from(value: usize) -> Self {
        Addr(value)
    }
}

impl From<Word> for Addr {
    fn from(value: Word) -> Self {
        Addr(value as usize)
    }
}

impl From<u64> for Addr {
    fn from(value: u64) -> Self {
        Addr(value as usize)
    }
}

impl From<Addr> for u64 {
    fn from(value: Addr) -> Self {
        value.0 as u64
    }
}

impl std::fmt::Debug for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_addr_arithmetic() {
        let a = Addr::from(100usize);
        assert_eq!((a + 50).usize(), 150);
        assert_eq!((a - 50).usize(), 50);
        assert_eq!(a.distance_from(Addr::from(40usize)), Some(60));
        assert_eq!(Addr::from(40usize).distance_from(a), None);
    }

    #[test]
    fn test_addr_alignment() {
        assert_eq!(Addr::from(0x1007usize).align_down(8), Addr::from(0x1000usize));
        assert_eq!(Addr::from(0x1008usize).align_down(8), Addr::from(0x1008usize));
    }

    #[test]
    fn test_addr_conversions() {
        let a = Addr::from(0x1234usize);
        assert_eq!(a.u64(), 0x1234u64);
        assert_eq!(format!("{}", a), "0x0000000000001234");
        assert_eq!(format!("{:X}", a), "1234");
    }
}
