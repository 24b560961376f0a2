//! Page numbers.
//!
//! A `PageId` is a virtual address shifted right by `PAGE_SHIFT`. It is an
//! absolute page number, not an index into some heap.

use crate::config::{PAGE_SHIFT, PAGE_SIZE};
use core::fmt;
use core::ops::{Add, Sub};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PageId(usize);

impl PageId {
    #[inline]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// The page containing `addr`.
    #[inline]
    pub fn from_addr(addr: *const u8) -> Self {
        Self((addr as usize) >> PAGE_SHIFT)
    }

    /// The first byte of this page.
    #[inline]
    pub fn to_addr(self) -> *mut u8 {
        (self.0 << PAGE_SHIFT) as *mut u8
    }

    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }

    /// The page `n` pages after this one.
    #[inline]
    pub const fn offset(self, n: usize) -> Self {
        Self(self.0 + n)
    }

    /// The page right before this one, if any.
    #[inline]
    pub const fn prev(self) -> Option<Self> {
        match self.0.checked_sub(1) {
            Some(p) => Some(Self(p)),
            None => None,
        }
    }
}

impl Add<usize> for PageId {
    type Output = PageId;

    #[inline]
    fn add(self, n: usize) -> PageId {
        self.offset(n)
    }
}

/// Number of pages between two page ids.
impl Sub for PageId {
    type Output = usize;

    #[inline]
    fn sub(self, rhs: PageId) -> usize {
        self.0 - rhs.0
    }
}

impl fmt::Debug for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageId({:#x})", self.0)
    }
}

/// Number of whole pages needed to hold `bytes`.
#[inline]
pub const fn pages_for(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_round_trip() {
        let page = PageId::new(0x1234);
        assert_eq!(PageId::from_addr(page.to_addr()), page);
        // Any byte inside the page maps back to it.
        let inside = unsafe { page.to_addr().add(PAGE_SIZE - 1) };
        assert_eq!(PageId::from_addr(inside), page);
        let next = unsafe { page.to_addr().add(PAGE_SIZE) };
        assert_eq!(PageId::from_addr(next), page + 1);
    }

    #[test]
    fn test_arithmetic() {
        let a = PageId::new(100);
        assert_eq!((a + 28) - a, 28);
        assert_eq!(a.prev(), Some(PageId::new(99)));
        assert_eq!(PageId::new(0).prev(), None);
    }

    #[test]
    fn test_pages_for() {
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(PAGE_SIZE), 1);
        assert_eq!(pages_for(PAGE_SIZE + 1), 2);
        assert_eq!(pages_for(300 * 1024), (300 * 1024usize).div_ceil(PAGE_SIZE));
    }
}
