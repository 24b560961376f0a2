//! 3-level radix tree mapping page ids to the span that owns them.
//!
//! User-space addresses fit in 48 bits, leaving `48 - PAGE_SHIFT` bits of
//! page id (35 with 8 KiB pages, split 12/12/11).
//!
//! The root is statically allocated. Mid and leaf nodes are lazily allocated
//! from the OS and never freed. Reads are lock-free; writes happen only under
//! the page cache lock.

use crate::config::{PAGE_SHIFT, PAGE_SIZE};
use crate::page_id::{PageId, pages_for};
use crate::platform;
use crate::span::Span;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

const ADDRESS_BITS: usize = 48;
const ID_BITS: usize = ADDRESS_BITS - PAGE_SHIFT;

const LEAF_BITS: usize = ID_BITS / 3;
const MID_BITS: usize = (ID_BITS - LEAF_BITS) / 2;
const ROOT_BITS: usize = ID_BITS - LEAF_BITS - MID_BITS;

const ROOT_LEN: usize = 1 << ROOT_BITS;
const MID_LEN: usize = 1 << MID_BITS;
const LEAF_LEN: usize = 1 << LEAF_BITS;

const MID_SHIFT: usize = LEAF_BITS;
const ROOT_SHIFT: usize = LEAF_BITS + MID_BITS;

const MID_MASK: usize = MID_LEN - 1;
const LEAF_MASK: usize = LEAF_LEN - 1;

#[repr(C)]
struct MidNode {
    children: [AtomicPtr<LeafNode>; MID_LEN],
}

#[repr(C)]
struct LeafNode {
    spans: [AtomicPtr<Span>; LEAF_LEN],
}

pub struct PageMap {
    root: [AtomicPtr<MidNode>; ROOT_LEN],
}

// Slots are atomics; the pointed-to nodes are never freed.
unsafe impl Send for PageMap {}
unsafe impl Sync for PageMap {}

/// A const array of null `AtomicPtr`s.
macro_rules! null_atomic_array {
    ($len:expr, $T:ty) => {{
        // SAFETY: a null AtomicPtr has the same bit pattern as a zero usize.
        unsafe { core::mem::transmute::<[usize; $len], [AtomicPtr<$T>; $len]>([0usize; $len]) }
    }};
}

#[inline]
fn split(page: PageId) -> (usize, usize, usize) {
    let id = page.get();
    (id >> ROOT_SHIFT, (id >> MID_SHIFT) & MID_MASK, id & LEAF_MASK)
}

impl PageMap {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            root: null_atomic_array!(ROOT_LEN, MidNode),
        }
    }

    /// The span registered for `page`, or null. Lock-free.
    #[inline]
    pub fn get(&self, page: PageId) -> *mut Span {
        let (root_idx, mid_idx, leaf_idx) = split(page);
        if root_idx >= ROOT_LEN {
            return ptr::null_mut();
        }

        let mid = self.root[root_idx].load(Ordering::Acquire);
        if mid.is_null() {
            return ptr::null_mut();
        }

        let leaf = unsafe { (*mid).children[mid_idx].load(Ordering::Acquire) };
        if leaf.is_null() {
            return ptr::null_mut();
        }

        unsafe { (*leaf).spans[leaf_idx].load(Ordering::Acquire) }
    }

    /// The span owning the block at `ptr`. Lock-free.
    ///
    /// Panics on a miss: `ptr` was never handed out by this allocator.
    #[inline]
    pub fn span_of(&self, ptr: *const u8) -> *mut Span {
        let span = self.get(PageId::from_addr(ptr));
        assert!(!span.is_null(), "{ptr:p} does not belong to any span");
        span
    }

    /// Point `page` at `span` (or clear it with null).
    ///
    /// Panics if the OS refuses memory for an interior node: the map cannot
    /// be left half-updated.
    ///
    /// # Safety
    /// Must be called with the page cache lock held.
    pub unsafe fn set(&self, page: PageId, span: *mut Span) {
        let (root_idx, mid_idx, leaf_idx) = split(page);
        assert!(root_idx < ROOT_LEN, "{page:?} outside the page map");

        let mut mid = self.root[root_idx].load(Ordering::Acquire);
        if mid.is_null() {
            mid = unsafe { alloc_node::<MidNode>() };
            // Release: readers must see the zeroed node before its address.
            self.root[root_idx].store(mid, Ordering::Release);
        }

        let mut leaf = unsafe { (*mid).children[mid_idx].load(Ordering::Acquire) };
        if leaf.is_null() {
            leaf = unsafe { alloc_node::<LeafNode>() };
            unsafe { (*mid).children[mid_idx].store(leaf, Ordering::Release) };
        }

        unsafe { (*leaf).spans[leaf_idx].store(span, Ordering::Release) };
    }

    /// Point every page of `span` at it. Needed for spans whose interior
    /// addresses can be freed (carved and page-direct spans).
    ///
    /// # Safety
    /// Must be called with the page cache lock held; `span` must be valid.
    pub unsafe fn register_span(&self, span: *mut Span) {
        let (start, count) = unsafe { ((*span).start, (*span).num_pages) };
        for i in 0..count {
            unsafe { self.set(start + i, span) };
        }
    }

    /// Point only the first and last page of `span` at it. Enough for free
    /// spans: coalescing only ever looks up a neighbour's boundary page.
    ///
    /// # Safety
    /// Must be called with the page cache lock held; `span` must be valid.
    pub unsafe fn register_span_endpoints(&self, span: *mut Span) {
        let (start, last) = unsafe { ((*span).start, (*span).last_page()) };
        unsafe {
            self.set(start, span);
            self.set(last, span);
        }
    }

}

/// Zeroed node straight from the OS. Zero is a valid all-null node.
unsafe fn alloc_node<T>() -> *mut T {
    let size = pages_for(core::mem::size_of::<T>()) * PAGE_SIZE;
    let node = unsafe { platform::page_alloc(size) };
    assert!(!node.is_null(), "out of memory growing the page map");
    node.cast()
}
