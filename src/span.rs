//! Spans: metadata for contiguous runs of pages, and the lists that hold them.

use crate::config::PAGE_SIZE;
use crate::error::AllocError;
use crate::free_list::FreeObject;
use crate::object_pool::ObjectPool;
use crate::page_id::PageId;
use crate::sync::SpinMutex;
use core::ptr;

/// Metadata for a contiguous run of pages.
///
/// A span is owned by exactly one tier at a time: free in a page-cache
/// bucket (`in_use == false`), carved into blocks in a central-cache bucket,
/// or handed out whole for a page-direct allocation (both `in_use == true`).
///
/// Span records come from a dedicated object pool, never from the
/// allocator they describe.
#[repr(C)]
pub struct Span {
    /// First page of the run.
    pub start: PageId,
    /// Number of pages in the run.
    pub num_pages: usize,
    /// Previous span in the containing list.
    pub prev: *mut Span,
    /// Next span in the containing list.
    pub next: *mut Span,
    /// Blocks cut from this span that are not lent out.
    pub free_list: *mut FreeObject,
    /// Blocks currently lent out to thread caches.
    pub use_count: usize,
    /// False while the span sits free in the page cache.
    pub in_use: bool,
    /// Block size for carved spans, the requested byte size for page-direct
    /// allocations, 0 while free.
    pub obj_size: usize,
}

impl Default for Span {
    fn default() -> Self {
        Self::new()
    }
}

impl Span {
    pub const fn new() -> Self {
        Self {
            start: PageId::new(0),
            num_pages: 0,
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
            free_list: ptr::null_mut(),
            use_count: 0,
            in_use: false,
            obj_size: 0,
        }
    }

    /// The base address of the memory this span covers.
    #[inline]
    pub fn start_addr(&self) -> *mut u8 {
        self.start.to_addr()
    }

    /// Total bytes covered by this span.
    #[inline]
    pub fn byte_size(&self) -> usize {
        self.num_pages * PAGE_SIZE
    }

    /// The last page of this span.
    #[inline]
    pub fn last_page(&self) -> PageId {
        self.start + (self.num_pages - 1)
    }

    /// One past the last page of this span.
    #[inline]
    pub fn end_page(&self) -> PageId {
        self.start + self.num_pages
    }
}

/// An intrusive doubly-linked list of spans: O(1) push at the front, O(1)
/// removal of any member, O(1) pop from the front.
///
/// Linear, not circular: the head points at the first span, the last span's
/// `next` is null, and the first span's `prev` is null. An empty list is a
/// null head, so no node is allocated and the list can be built in a `const`.
pub struct SpanList {
    head: *mut Span,
    len: usize,
}

// SAFETY: a list is only reached through its owner's lock, and the spans it
// links live in the span pool, which outlives every thread.
unsafe impl Send for SpanList {}

impl Default for SpanList {
    fn default() -> Self {
        Self::new()
    }
}

impl SpanList {
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            len: 0,
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

    /// First span, or null when empty.
    #[inline]
    pub fn front(&self) -> *mut Span {
        self.head
    }

    /// Prepend a span.
    ///
    /// # Safety
    ///
    /// `span` must be valid and not linked into any list.
    pub unsafe fn push_front(&mut self, span: *mut Span) {
        unsafe {
            debug_assert!((*span).prev.is_null() && (*span).next.is_null());
            (*span).next = self.head;
            (*span).prev = ptr::null_mut();
            if !self.head.is_null() {
                (*self.head).prev = span;
            }
        }
        self.head = span;
        self.len += 1;
    }

    /// Unlink a span.
    ///
    /// # Safety
    ///
    /// `span` must currently be a member of this list.
    pub unsafe fn remove(&mut self, span: *mut Span) {
        unsafe {
            let prev = (*span).prev;
            let next = (*span).next;
            if prev.is_null() {
                debug_assert_eq!(self.head, span, "span is not in this list");
                self.head = next;
            } else {
                (*prev).next = next;
            }
            if !next.is_null() {
                (*next).prev = prev;
            }
            (*span).prev = ptr::null_mut();
            (*span).next = ptr::null_mut();
        }
        self.len -= 1;
    }

    /// Unlink and return the first span, or null when empty.
    ///
    /// # Safety
    ///
    /// The list's links must be intact (maintained by `push_front`/`remove`).
    pub unsafe fn pop_front(&mut self) -> *mut Span {
        let span = self.head;
        if !span.is_null() {
            unsafe { self.remove(span) };
        }
        span
    }

    /// Walk the members front to back.
    ///
    /// # Safety
    ///
    /// The list must not be modified while the iterator is alive, except
    /// for removing the span most recently yielded after reading its `next`.
    pub unsafe fn iter(&self) -> SpanIter {
        SpanIter { current: self.head }
    }
}

pub struct SpanIter {
    current: *mut Span,
}

impl Iterator for SpanIter {
    type Item = *mut Span;

    fn next(&mut self) -> Option<*mut Span> {
        if self.current.is_null() {
            return None;
        }
        let span = self.current;
        self.current = unsafe { (*span).next };
        Some(span)
    }
}

/// Pool for every `Span` record in the process.
static SPAN_POOL: SpinMutex<ObjectPool<Span>> = SpinMutex::new(ObjectPool::new());

/// Allocate a blank span record.
pub fn alloc_span() -> Result<*mut Span, AllocError> {
    SPAN_POOL
        .lock()
        .new_object(Span::new())
        .map(|span| span.as_ptr())
}

/// Return a span record to the pool.
///
/// # Safety
///
/// `span` must come from [`alloc_span`], be unlinked from every list, and
/// never be dereferenced again.
pub unsafe fn dealloc_span(span: *mut Span) {
    if let Some(span) = ptr::NonNull::new(span) {
        unsafe { SPAN_POOL.lock().delete(span) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn test_alloc_span_is_blank() {
        let span = alloc_span().unwrap();
        unsafe {
            assert_eq!((*span).start, PageId::new(0));
            assert_eq!((*span).num_pages, 0);
            assert!(!(*span).in_use);
            assert!((*span).free_list.is_null());
            assert!((*span).prev.is_null());
            assert!((*span).next.is_null());

            (*span).start = PageId::new(42);
            (*span).num_pages = 10;
            assert_eq!((*span).last_page(), PageId::new(51));
            assert_eq!((*span).end_page(), PageId::new(52));
            assert_eq!((*span).byte_size(), 10 * PAGE_SIZE);

            dealloc_span(span);
        }

        // A recycled record comes back blank.
        let again = alloc_span().unwrap();
        unsafe {
            assert_eq!((*again).num_pages, 0);
            dealloc_span(again);
        }
    }

    #[test]
    fn test_span_list_push_remove_pop() {
        let mut list = SpanList::new();
        assert!(list.is_empty());

        let spans: Vec<*mut Span> = (0..3).map(|_| alloc_span().unwrap()).collect();
        unsafe {
            for (i, &s) in spans.iter().enumerate() {
                (*s).start = PageId::new(i + 1);
                list.push_front(s);
                assert_eq!(list.front(), s);
            }
            assert_eq!(list.len(), 3);

            // Front to back: 3, 2, 1.
            let order: Vec<*mut Span> = list.iter().collect();
            assert_eq!(order, [spans[2], spans[1], spans[0]]);

            // Remove the middle one.
            list.remove(spans[1]);
            assert_eq!(list.len(), 2);
            assert_eq!((*spans[2]).next, spans[0]);
            assert_eq!((*spans[0]).prev, spans[2]);
            assert!((*spans[1]).next.is_null());

            assert_eq!(list.pop_front(), spans[2]);
            assert_eq!(list.pop_front(), spans[0]);
            assert!(list.pop_front().is_null());
            assert!(list.is_empty());
            assert_eq!(list.len(), 0);

            for s in spans {
                dealloc_span(s);
            }
        }
    }

    #[test]
    fn test_remove_tail() {
        let mut list = SpanList::new();
        let a = alloc_span().unwrap();
        let b = alloc_span().unwrap();
        unsafe {
            list.push_front(a);
            list.push_front(b);
            list.remove(a);
            assert_eq!(list.front(), b);
            assert!((*b).next.is_null());
            list.remove(b);
            assert!(list.is_empty());
            dealloc_span(a);
            dealloc_span(b);
        }
    }
}
