//! Intrusive free lists of equally-sized blocks.
//!
//! A free block's first word holds the pointer to the next free block, so a
//! list never allocates link nodes. Handing a block out transfers the whole
//! block to the caller; taking it back hands the first word to the list for
//! as long as the block stays free. Blocks are therefore at least one word.

use core::ptr;

/// An intrusive free list node stored inside freed memory.
#[repr(C)]
pub struct FreeObject {
    pub next: *mut FreeObject,
}

/// A LIFO chain of free blocks with an adaptive batch ceiling.
///
/// The ceiling starts at 1 and is raised by the thread cache each time a
/// fetch from the central cache uses up the whole allowance (slow start).
pub struct FreeList {
    head: *mut FreeObject,
    len: usize,
    batch_ceiling: usize,
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeList {
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            len: 0,
            batch_ceiling: 1,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn batch_ceiling(&self) -> usize {
        self.batch_ceiling
    }

    #[inline]
    pub fn set_batch_ceiling(&mut self, ceiling: usize) {
        self.batch_ceiling = ceiling;
    }

    /// Push one free block.
    ///
    /// # Safety
    ///
    /// `obj` must be a valid, writable block of at least one word that no
    /// one else uses until it is popped again.
    #[inline]
    pub unsafe fn push(&mut self, obj: *mut FreeObject) {
        debug_assert!(!obj.is_null());
        unsafe { (*obj).next = self.head };
        self.head = obj;
        self.len += 1;
    }

    /// Push a chain `first ..= last` of `n` linked blocks.
    ///
    /// # Safety
    ///
    /// `first` must reach `last` in exactly `n - 1` hops, and every block in
    /// the chain must satisfy the contract of [`push`](Self::push).
    #[inline]
    pub unsafe fn push_range(&mut self, first: *mut FreeObject, last: *mut FreeObject, n: usize) {
        debug_assert!(!first.is_null() && !last.is_null() && n > 0);
        unsafe { (*last).next = self.head };
        self.head = first;
        self.len += n;
    }

    /// Pop one free block. The list must not be empty.
    #[inline]
    pub fn pop(&mut self) -> *mut FreeObject {
        debug_assert!(!self.head.is_null(), "pop from an empty free list");
        let obj = self.head;
        self.head = unsafe { (*obj).next };
        self.len -= 1;
        obj
    }

    /// Detach the first `n` blocks as a null-terminated chain and return
    /// `(first, last)`. Requires `0 < n <= len()`.
    pub fn pop_range(&mut self, n: usize) -> (*mut FreeObject, *mut FreeObject) {
        debug_assert!(n > 0 && n <= self.len, "pop_range({n}) on a list of {}", self.len);
        let first = self.head;
        let mut last = first;
        for _ in 1..n {
            last = unsafe { (*last).next };
        }
        unsafe {
            self.head = (*last).next;
            (*last).next = ptr::null_mut();
        }
        self.len -= n;
        (first, last)
    }

    /// Detach every block. Returns the chain head (null when empty) and its
    /// length. The batch ceiling is kept.
    pub fn take_all(&mut self) -> (*mut FreeObject, usize) {
        let head = self.head;
        let len = self.len;
        self.head = ptr::null_mut();
        self.len = 0;
        (head, len)
    }
}

/// Count the blocks of a null-terminated chain.
///
/// # Safety
///
/// Every block reachable from `head` must be a valid `FreeObject`.
pub unsafe fn chain_len(mut head: *mut FreeObject) -> usize {
    let mut n = 0;
    while !head.is_null() {
        n += 1;
        head = unsafe { (*head).next };
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn blocks(n: usize) -> Vec<FreeObject> {
        (0..n).map(|_| FreeObject { next: ptr::null_mut() }).collect()
    }

    #[test]
    fn test_push_pop_lifo() {
        let mut storage = blocks(3);
        let mut list = FreeList::new();
        assert!(list.is_empty());
        assert_eq!(list.batch_ceiling(), 1);

        let ptrs: Vec<*mut FreeObject> = storage.iter_mut().map(|b| b as *mut _).collect();
        for &p in &ptrs {
            unsafe { list.push(p) };
        }
        assert_eq!(list.len(), 3);
        assert_eq!(list.pop(), ptrs[2]);
        assert_eq!(list.pop(), ptrs[1]);
        assert_eq!(list.pop(), ptrs[0]);
        assert!(list.is_empty());
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_pop_range_terminates_chain() {
        let mut storage = blocks(10);
        let mut list = FreeList::new();
        for b in storage.iter_mut() {
            unsafe { list.push(b) };
        }

        let (first, last) = list.pop_range(4);
        assert_eq!(list.len(), 6);
        unsafe {
            assert!((*last).next.is_null());
            assert_eq!(chain_len(first), 4);
        }

        // Remainder is still a well-formed chain of 6.
        let (head, len) = list.take_all();
        assert_eq!(len, 6);
        assert_eq!(unsafe { chain_len(head) }, 6);
        assert!(list.is_empty());
    }

    #[test]
    fn test_push_range_links_in_front() {
        let mut storage = blocks(5);
        let mut list = FreeList::new();
        let ptrs: Vec<*mut FreeObject> = storage.iter_mut().map(|b| b as *mut _).collect();

        unsafe {
            list.push(ptrs[0]);
            // Chain 1 -> 2 -> 3 -> 4
            for pair in ptrs[1..].windows(2) {
                let (block, next) = (pair[0], pair[1]);
                (*block).next = next;
            }
            list.push_range(ptrs[1], ptrs[4], 4);
        }
        assert_eq!(list.len(), 5);
        for &expected in &[ptrs[1], ptrs[2], ptrs[3], ptrs[4], ptrs[0]] {
            assert_eq!(list.pop(), expected);
        }
    }

    #[test]
    fn test_pop_range_whole_list() {
        let mut storage = blocks(3);
        let mut list = FreeList::new();
        for b in storage.iter_mut() {
            unsafe { list.push(b) };
        }
        let (first, _last) = list.pop_range(3);
        assert!(list.is_empty());
        assert_eq!(unsafe { chain_len(first) }, 3);
    }

    #[test]
    fn test_batch_ceiling_survives_drain() {
        let mut storage = blocks(1);
        let mut list = FreeList::new();
        list.set_batch_ceiling(7);
        unsafe { list.push(&mut storage[0]) };
        let _ = list.take_all();
        assert_eq!(list.batch_ceiling(), 7);
    }
}
