//! Page cache (back end): owns every span not checked out to a higher tier.
//!
//! - Serves spans of `k` pages from bucket `k`, splitting a larger free span
//!   when bucket `k` is empty
//! - Grows by `MAX_PAGES`-page chunks from the OS
//! - Coalesces returned spans with free neighbours, up to `MAX_PAGES` pages
//! - Keeps the page map current for every span it hands out or takes back
//!
//! One instance lives behind a `SpinMutex`; every method assumes that lock.
//! Nothing here logs: a logger may allocate, and an allocation can need
//! this lock. `new_span` records what it did in [`SpanEvents`] for the
//! caller to log once the lock is released.

use crate::config::{MAX_PAGES, NPAGES, PAGE_SIZE};
use crate::error::AllocError;
use crate::page_id::PageId;
use crate::pagemap::PageMap;
use crate::platform;
use crate::span::{self, Span, SpanList};
use core::ptr;

/// Slow-path work done by the latest `new_span`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpanEvents {
    /// First page of a chunk fetched from the OS.
    pub grew: Option<PageId>,
    /// `(n, k)`: an `n`-page span was split to serve `k` pages.
    pub split: Option<(usize, usize)>,
}

impl SpanEvents {
    const NONE: Self = Self { grew: None, split: None };

    /// Emit the recorded events. Call with no allocator lock held.
    pub fn log(self) {
        #[cfg(feature = "debug")]
        {
            if let Some(base) = self.grew {
                diag!(debug, "grew by {} pages at {:p}", MAX_PAGES, base.to_addr());
            }
            if let Some((n, k)) = self.split {
                diag!(trace, "split {} pages into {} + {}", n, k, n - k);
            }
        }
    }
}

pub struct PageCache {
    /// `buckets[k]` holds free spans of exactly `k` pages. Bucket 0 is unused.
    buckets: [SpanList; NPAGES],
    pagemap: &'static PageMap,
    /// Pages obtained from the OS so far.
    system_pages: usize,
    events: SpanEvents,
}

impl PageCache {
    pub const fn new(pagemap: &'static PageMap) -> Self {
        Self {
            buckets: [const { SpanList::new() }; NPAGES],
            pagemap,
            system_pages: 0,
            events: SpanEvents::NONE,
        }
    }

    /// Check out a span of exactly `k` pages. The span comes back in use,
    /// with every page registered in the page map.
    ///
    /// Panics unless `0 < k < NPAGES`.
    pub fn new_span(&mut self, k: usize) -> Result<*mut Span, AllocError> {
        assert!(k > 0 && k < NPAGES, "span of {k} pages outside 1..{NPAGES}");
        self.events = SpanEvents::NONE;

        loop {
            if !self.buckets[k].is_empty() {
                let span = unsafe { self.buckets[k].pop_front() };
                unsafe { self.check_out(span) };
                return Ok(span);
            }

            if let Some(n) = (k + 1..NPAGES).find(|&n| !self.buckets[n].is_empty()) {
                return self.split(n, k);
            }

            self.grow()?;
        }
    }

    /// Cut `k` pages off the front of a span from bucket `n`; the rest goes
    /// back into bucket `n - k`.
    fn split(&mut self, n: usize, k: usize) -> Result<*mut Span, AllocError> {
        // Take the record first so a failure leaves the buckets untouched.
        let carved = span::alloc_span()?;

        unsafe {
            let rest = self.buckets[n].pop_front();
            (*carved).start = (*rest).start;
            (*carved).num_pages = k;

            (*rest).start = (*rest).start + k;
            (*rest).num_pages = n - k;
            self.buckets[n - k].push_front(rest);
            self.pagemap.register_span_endpoints(rest);

            self.check_out(carved);
        }

        stat_inc!(span_splits);
        self.events.split = Some((n, k));
        Ok(carved)
    }

    /// Fetch one `MAX_PAGES`-page chunk from the OS into the top bucket.
    #[cold]
    fn grow(&mut self) -> Result<(), AllocError> {
        let bytes = MAX_PAGES * PAGE_SIZE;
        let base = unsafe { platform::page_alloc(bytes) };
        if base.is_null() {
            return Err(AllocError::OutOfMemory { pages: MAX_PAGES });
        }

        let span = match span::alloc_span() {
            Ok(span) => span,
            Err(err) => {
                unsafe { platform::page_dealloc(base, bytes) };
                return Err(err);
            }
        };

        unsafe {
            (*span).start = PageId::from_addr(base);
            (*span).num_pages = MAX_PAGES;
            self.buckets[MAX_PAGES].push_front(span);
            self.pagemap.register_span_endpoints(span);
        }
        self.system_pages += MAX_PAGES;
        self.events.grew = Some(PageId::from_addr(base));
        Ok(())
    }

    unsafe fn check_out(&mut self, span: *mut Span) {
        unsafe {
            (*span).in_use = true;
            self.pagemap.register_span(span);
        }
    }

    /// What the latest `new_span` did, for logging after unlocking.
    pub fn take_events(&mut self) -> SpanEvents {
        core::mem::replace(&mut self.events, SpanEvents::NONE)
    }

    /// The span owning the block at `ptr`. Panics on a miss.
    #[inline]
    pub fn map_object_to_span(&self, ptr: *const u8) -> *mut Span {
        self.pagemap.span_of(ptr)
    }

    /// Take a span back, merging it with free neighbours on either side.
    ///
    /// # Safety
    ///
    /// `span` must have come from `new_span` on this cache, with nothing
    /// inside it still lent out, and must not be linked into any list.
    pub unsafe fn release_span_to_page_cache(&mut self, span: *mut Span) {
        unsafe {
            debug_assert!((*span).in_use, "releasing a span that is already free");
            (*span).free_list = ptr::null_mut();
            (*span).use_count = 0;
            (*span).obj_size = 0;

            while let Some(left) = self.free_neighbor_before(span) {
                self.buckets[(*left).num_pages].remove(left);
                (*span).start = (*left).start;
                (*span).num_pages += (*left).num_pages;
                span::dealloc_span(left);
                stat_inc!(span_coalesces);
            }

            while let Some(right) = self.free_neighbor_after(span) {
                self.buckets[(*right).num_pages].remove(right);
                (*span).num_pages += (*right).num_pages;
                span::dealloc_span(right);
                stat_inc!(span_coalesces);
            }

            (*span).in_use = false;
            self.buckets[(*span).num_pages].push_front(span);
            self.pagemap.register_span_endpoints(span);
        }
    }

    /// The free span ending right before `span`, if merging it stays within
    /// `MAX_PAGES`.
    unsafe fn free_neighbor_before(&self, span: *mut Span) -> Option<*mut Span> {
        let (start, pages) = unsafe { ((*span).start, (*span).num_pages) };
        let left = self.pagemap.get(start.prev()?);
        if left.is_null() {
            return None;
        }
        // A stale entry can point at a recycled record; the adjacency check
        // rejects it.
        let mergeable = unsafe {
            !(*left).in_use
                && (*left).end_page() == start
                && (*left).num_pages + pages <= MAX_PAGES
        };
        mergeable.then_some(left)
    }

    /// The free span starting right after `span`, if merging it stays within
    /// `MAX_PAGES`.
    unsafe fn free_neighbor_after(&self, span: *mut Span) -> Option<*mut Span> {
        let (end, pages) = unsafe { ((*span).end_page(), (*span).num_pages) };
        let right = self.pagemap.get(end);
        if right.is_null() {
            return None;
        }
        let mergeable = unsafe {
            !(*right).in_use && (*right).start == end && (*right).num_pages + pages <= MAX_PAGES
        };
        mergeable.then_some(right)
    }

    /// Pages obtained from the OS so far. Never shrinks.
    pub fn system_pages(&self) -> usize {
        self.system_pages
    }

    /// Pages sitting free in the buckets.
    pub fn free_pages(&self) -> usize {
        self.buckets
            .iter()
            .enumerate()
            .map(|(k, bucket)| k * bucket.len())
            .sum()
    }

    /// Number of free spans across all buckets.
    pub fn free_span_count(&self) -> usize {
        self.buckets.iter().map(SpanList::len).sum()
    }

    /// Number of free spans of exactly `k` pages.
    pub fn bucket_len(&self, k: usize) -> usize {
        self.buckets[k].len()
    }
}
