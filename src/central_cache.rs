//! Central cache (middle tier): per-size-class buckets of carved spans.
//!
//! Each bucket has its own lock. Thread caches fetch and return whole
//! batches of blocks here. A bucket lock is always released before the
//! page cache lock is taken, so no thread ever holds both.

use crate::error::AllocError;
use crate::free_list::FreeObject;
use crate::page_cache::PageCache;
use crate::pagemap::PageMap;
use crate::size_class::{self, NUM_SIZE_CLASSES};
use crate::span::{Span, SpanList};
use crate::sync::{SpinMutex, SpinMutexGuard};
use core::ptr;

/// A linked batch of blocks `first ..= last`, `len` long.
pub type Batch = (*mut FreeObject, *mut FreeObject, usize);

pub struct CentralCache {
    /// Spans carved for each size class, whether or not they still have free
    /// blocks.
    buckets: [SpinMutex<SpanList>; NUM_SIZE_CLASSES],
    page_cache: &'static SpinMutex<PageCache>,
    /// Must be the map `page_cache` maintains.
    pagemap: &'static PageMap,
}

impl CentralCache {
    pub const fn new(page_cache: &'static SpinMutex<PageCache>, pagemap: &'static PageMap) -> Self {
        Self {
            buckets: [const { SpinMutex::new(SpanList::new()) }; NUM_SIZE_CLASSES],
            page_cache,
            pagemap,
        }
    }

    pub fn page_cache(&self) -> &'static SpinMutex<PageCache> {
        self.page_cache
    }

    pub fn pagemap(&self) -> &'static PageMap {
        self.pagemap
    }

    /// Hand out up to `batch` blocks of the rounded size `size`, all from a
    /// single span. Returns fewer than `batch` only when that span runs dry.
    pub fn fetch_range_obj(&self, batch: usize, size: usize) -> Result<Batch, AllocError> {
        debug_assert!(batch > 0);
        debug_assert_eq!(size, size_class::round_up(size));
        let index = size_class::index(size);

        let list = self.buckets[index].lock();
        let (_list, span) = self.get_one_span(list, index, size)?;

        let batch = unsafe {
            let first = (*span).free_list;
            let mut last = first;
            let mut n = 1;
            while n < batch && !(*last).next.is_null() {
                last = (*last).next;
                n += 1;
            }
            (*span).free_list = (*last).next;
            (*last).next = ptr::null_mut();
            (*span).use_count += n;
            (first, last, n)
        };

        stat_inc!(central_fetches);
        stat_add!(central_fetch_objects, batch.2);
        Ok(batch)
    }

    /// A span of bucket `index` with at least one free block, carving a
    /// fresh one from the page cache if none has any.
    ///
    /// The bucket lock is dropped while the page cache is involved; the
    /// guard handed back is a fresh one.
    fn get_one_span<'a>(
        &'a self,
        list: SpinMutexGuard<'a, SpanList>,
        index: usize,
        size: usize,
    ) -> Result<(SpinMutexGuard<'a, SpanList>, *mut Span), AllocError> {
        let found = unsafe { list.iter() }.find(|&span| unsafe { !(*span).free_list.is_null() });
        if let Some(span) = found {
            return Ok((list, span));
        }
        drop(list);

        let mut page_cache = self.page_cache.lock();
        let span = page_cache.new_span(size_class::num_move_page(size));
        let events = page_cache.take_events();
        drop(page_cache);
        events.log();
        let span = span?;
        // Not linked anywhere yet, so no lock is needed to carve it.
        unsafe { carve(span, size) };

        let mut list = self.buckets[index].lock();
        unsafe { list.push_front(span) };
        Ok((list, span))
    }

    /// Give a chain of blocks of the rounded size `size` back to the spans
    /// they were cut from. Spans left with nothing lent out go back to the
    /// page cache.
    ///
    /// # Safety
    ///
    /// `head` must be a null-terminated chain of blocks of `size` bytes, each
    /// handed out by `fetch_range_obj` on this cache and not freed since.
    pub unsafe fn release_list_to_spans(&self, mut head: *mut FreeObject, size: usize) {
        let index = size_class::index(size);
        let mut list = self.buckets[index].lock();

        while !head.is_null() {
            let obj = head;
            unsafe {
                head = (*obj).next;

                let span = self.pagemap.span_of(obj.cast());
                debug_assert_eq!((*span).obj_size, size, "block freed into the wrong size class");
                (*obj).next = (*span).free_list;
                (*span).free_list = obj;
                (*span).use_count -= 1;

                if (*span).use_count == 0 {
                    list.remove(span);
                    (*span).free_list = ptr::null_mut();
                    (*span).obj_size = 0;
                    drop(list);

                    self.page_cache.lock().release_span_to_page_cache(span);
                    stat_inc!(spans_released);
                    diag!(trace, "returned a span of size class {} to the page cache", index);

                    list = self.buckets[index].lock();
                }
            }
        }
    }

    /// Number of spans currently held for size class `index`.
    pub fn span_count(&self, index: usize) -> usize {
        self.buckets[index].lock().len()
    }
}

/// Cut `span` into `size`-byte blocks, linked in address order.
unsafe fn carve(span: *mut Span, size: usize) {
    unsafe {
        let base = (*span).start_addr();
        let count = (*span).byte_size() / size;
        debug_assert!(count > 0);

        let mut tail = base.cast::<FreeObject>();
        for i in 1..count {
            let next = base.add(i * size).cast::<FreeObject>();
            (*tail).next = next;
            tail = next;
        }
        (*tail).next = ptr::null_mut();

        (*span).free_list = base.cast();
        (*span).use_count = 0;
        (*span).obj_size = size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_PAGES;
    use crate::free_list::chain_len;
    use alloc::boxed::Box;
    use alloc::vec::Vec;
    use std::sync::Arc;

    fn make_central() -> CentralCache {
        let pm: &'static PageMap = Box::leak(Box::new(PageMap::new()));
        let pc = Box::leak(Box::new(SpinMutex::new(PageCache::new(pm))));
        CentralCache::new(pc, pm)
    }

    #[test]
    fn test_fetch_carves_a_span() {
        let central = make_central();
        let size = 64;
        let index = size_class::index(size);

        let (first, last, n) = central.fetch_range_obj(10, size).unwrap();
        assert_eq!(n, 10);
        unsafe {
            assert_eq!(chain_len(first), 10);
            assert!((*last).next.is_null());

            let span = central.pagemap().span_of(first.cast());
            assert!((*span).in_use);
            assert_eq!((*span).obj_size, size);
            assert_eq!((*span).use_count, 10);
            assert_eq!((*span).num_pages, size_class::num_move_page(size));
        }
        assert_eq!(central.span_count(index), 1);

        unsafe { central.release_list_to_spans(first, size) };
    }

    #[test]
    fn test_blocks_are_distinct_and_inside_the_span() {
        let central = make_central();
        let size = 48;
        let (first, _, n) = central.fetch_range_obj(100, size).unwrap();

        let mut addrs = Vec::new();
        let mut node = first;
        while !node.is_null() {
            addrs.push(node as usize);
            node = unsafe { (*node).next };
        }
        assert_eq!(addrs.len(), n);

        let span = central.pagemap().span_of(first.cast());
        let (lo, hi) = unsafe {
            let lo = (*span).start_addr() as usize;
            (lo, lo + (*span).byte_size())
        };
        addrs.sort_unstable();
        for w in addrs.windows(2) {
            assert!(w[1] - w[0] >= size);
        }
        assert!(addrs.iter().all(|&a| a >= lo && a + size <= hi));

        unsafe { central.release_list_to_spans(first, size) };
    }

    #[test]
    fn test_short_batch_when_span_runs_dry() {
        let central = make_central();
        let size = 128 * 1024;
        let per_span = size_class::objects_per_span(size);

        let (first, _, n) = central.fetch_range_obj(per_span + 5, size).unwrap();
        assert_eq!(n, per_span);

        // The next fetch needs a second span.
        let (second, _, m) = central.fetch_range_obj(1, size).unwrap();
        assert_eq!(m, 1);
        assert_eq!(central.span_count(size_class::index(size)), 2);

        unsafe {
            central.release_list_to_spans(first, size);
            central.release_list_to_spans(second, size);
        }
        assert_eq!(central.span_count(size_class::index(size)), 0);
    }

    #[test]
    fn test_empty_span_goes_back_to_page_cache() {
        let central = make_central();
        let size = 16;
        let index = size_class::index(size);

        let (a, _, na) = central.fetch_range_obj(5, size).unwrap();
        let (b, _, nb) = central.fetch_range_obj(5, size).unwrap();
        assert_eq!(na + nb, 10);
        assert_eq!(central.span_count(index), 1);

        unsafe { central.release_list_to_spans(a, size) };
        // Still 5 blocks out.
        assert_eq!(central.span_count(index), 1);

        unsafe { central.release_list_to_spans(b, size) };
        assert_eq!(central.span_count(index), 0);

        let pc = central.page_cache().lock();
        assert_eq!(pc.free_pages(), pc.system_pages());
        assert_eq!(pc.bucket_len(MAX_PAGES), 1);
    }

    #[test]
    fn test_interleaved_release_keeps_counts() {
        let central = make_central();
        let size = 256;
        let mut blocks = Vec::new();
        for _ in 0..8 {
            let (mut node, _, _) = central.fetch_range_obj(7, size).unwrap();
            while !node.is_null() {
                blocks.push(node);
                node = unsafe { (*node).next };
            }
        }

        // Return every other block one at a time, then the rest.
        for pass in 0..2 {
            for (i, &b) in blocks.iter().enumerate() {
                if i % 2 == pass {
                    unsafe {
                        (*b).next = ptr::null_mut();
                        central.release_list_to_spans(b, size);
                    }
                }
            }
        }

        assert_eq!(central.span_count(size_class::index(size)), 0);
        let pc = central.page_cache().lock();
        assert_eq!(pc.free_pages(), pc.system_pages());
    }

    /// Every span holding a block of `live` lends out exactly that many, and
    /// the bucket holds no other span.
    fn assert_use_counts(central: &CentralCache, index: usize, live: &[*mut FreeObject]) {
        let mut owners: Vec<(*mut Span, usize)> = Vec::new();
        for &block in live {
            let span = central.pagemap().span_of(block.cast());
            match owners.iter_mut().find(|(s, _)| *s == span) {
                Some((_, n)) => *n += 1,
                None => owners.push((span, 1)),
            }
        }
        for &(span, n) in &owners {
            assert_eq!(unsafe { (*span).use_count }, n);
        }
        assert_eq!(central.span_count(index), owners.len());
    }

    #[test]
    fn test_use_count_tracks_blocks_lent_out() {
        let central = make_central();
        // Few blocks per span, so batches run spans dry and a chain
        // returned below straddles several spans.
        let size = 32 * 1024;
        let index = size_class::index(size);
        assert!(size_class::objects_per_span(size) < 20);

        let mut live = Vec::new();
        for batch in [3, 3, 3, 1, 5, 3, 2] {
            let (mut node, _, n) = central.fetch_range_obj(batch, size).unwrap();
            assert!(n >= 1 && n <= batch);
            while !node.is_null() {
                live.push(node);
                node = unsafe { (*node).next };
            }
            assert_use_counts(&central, index, &live);
        }
        assert!(central.span_count(index) > 1);

        // Give blocks back in chains of 1, 2 and 3 drawn from both ends.
        let mut round = 0;
        while !live.is_empty() {
            let take = (round % 3 + 1).min(live.len());
            let chain: Vec<_> = (0..take)
                .map(|i| if i % 2 == 0 { live.remove(0) } else { live.pop().unwrap() })
                .collect();
            for pair in chain.windows(2) {
                let (block, next) = (pair[0], pair[1]);
                unsafe { (*block).next = next };
            }
            let tail = chain[chain.len() - 1];
            unsafe {
                (*tail).next = ptr::null_mut();
                central.release_list_to_spans(chain[0], size);
            }
            assert_use_counts(&central, index, &live);
            round += 1;
        }

        let pc = central.page_cache().lock();
        assert_eq!(pc.free_pages(), pc.system_pages());
    }

    #[test]
    fn test_concurrent_fetch_release() {
        let pm: &'static PageMap = Box::leak(Box::new(PageMap::new()));
        let pc = Box::leak(Box::new(SpinMutex::new(PageCache::new(pm))));
        let central = Arc::new(CentralCache::new(pc, pm));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let central = Arc::clone(&central);
                std::thread::spawn(move || {
                    let size = size_class::round_up(8 + t * 24);
                    for _ in 0..200 {
                        let (first, _, n) = central.fetch_range_obj(8, size).unwrap();
                        unsafe {
                            // Scribble past the link word; the blocks are ours.
                            let mut node = first;
                            while !node.is_null() {
                                let bytes = node.cast::<u8>();
                                for i in core::mem::size_of::<FreeObject>()..size {
                                    *bytes.add(i) = t as u8;
                                }
                                node = (*node).next;
                            }
                            assert_eq!(chain_len(first), n);
                            central.release_list_to_spans(first, size);
                        }
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let pc = central.page_cache().lock();
        assert!(pc.system_pages() > 0);
        assert_eq!(pc.free_pages(), pc.system_pages());
    }
}
