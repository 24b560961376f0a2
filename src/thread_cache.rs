//! Thread cache (front end): per-thread free lists, no synchronization.
//!
//! A thread cache is owned by exactly one thread. An empty list refills
//! with one batch from the central cache; a list that reaches its batch
//! ceiling hands one ceiling's worth back. The ceiling grows by
//! `SLOW_START_STEP` each time a refill uses it up (slow start), until it
//! passes the size class's `num_move_size`.

use crate::central_cache::CentralCache;
use crate::config::{MAX_BYTES, SLOW_START_STEP};
use crate::error::AllocError;
use crate::free_list::FreeList;
use crate::size_class::{self, NUM_SIZE_CLASSES};
use core::ptr::NonNull;

pub struct ThreadCache {
    lists: [FreeList; NUM_SIZE_CLASSES],
}

impl Default for ThreadCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadCache {
    pub const fn new() -> Self {
        Self {
            lists: [const { FreeList::new() }; NUM_SIZE_CLASSES],
        }
    }

    /// Allocate one block for a request of `size` bytes, `1..=MAX_BYTES`.
    #[inline]
    pub fn allocate(&mut self, size: usize, central: &CentralCache) -> Result<NonNull<u8>, AllocError> {
        debug_assert!(size > 0 && size <= MAX_BYTES);
        let index = size_class::index(size);
        let list = &mut self.lists[index];
        if !list.is_empty() {
            stat_inc!(thread_cache_hits);
            // SAFETY: blocks on the list are never null.
            return Ok(unsafe { NonNull::new_unchecked(list.pop().cast()) });
        }
        stat_inc!(thread_cache_misses);
        self.fetch_from_central(index, size_class::round_up(size), central)
    }

    /// Refill list `index` with one batch and return its first block.
    #[cold]
    fn fetch_from_central(
        &mut self,
        index: usize,
        size: usize,
        central: &CentralCache,
    ) -> Result<NonNull<u8>, AllocError> {
        let list = &mut self.lists[index];
        let ceiling = list.batch_ceiling();
        let batch = ceiling.min(size_class::num_move_size(size));
        if batch == ceiling {
            list.set_batch_ceiling(ceiling + SLOW_START_STEP);
        }

        let (first, last, n) = central.fetch_range_obj(batch, size)?;
        debug_assert!(n >= 1 && n <= batch);
        if n > 1 {
            unsafe { list.push_range((*first).next, last, n - 1) };
        }
        // SAFETY: `fetch_range_obj` never hands out an empty batch.
        Ok(unsafe { NonNull::new_unchecked(first.cast()) })
    }

    /// Take back a block of size class `size` (its rounded size).
    ///
    /// # Safety
    ///
    /// `ptr` must be a block of `size` bytes handed out by `allocate` on a
    /// thread cache backed by `central`, and not freed since.
    #[inline]
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize, central: &CentralCache) {
        let index = size_class::index(size);
        let list = &mut self.lists[index];
        unsafe { list.push(ptr.as_ptr().cast()) };

        let ceiling = list.batch_ceiling();
        if list.len() >= ceiling {
            let (first, _last) = list.pop_range(ceiling);
            unsafe { central.release_list_to_spans(first, size_class::class_to_size(index)) };
        }
    }

    /// Hand every cached block back to `central`. Batch ceilings are kept.
    pub fn flush(&mut self, central: &CentralCache) {
        for (index, list) in self.lists.iter_mut().enumerate() {
            let (head, len) = list.take_all();
            if len > 0 {
                unsafe { central.release_list_to_spans(head, size_class::class_to_size(index)) };
            }
        }
    }

    /// Current slow-start ceiling of size class `index`.
    pub fn batch_ceiling(&self, index: usize) -> usize {
        self.lists[index].batch_ceiling()
    }

    /// Blocks cached for size class `index`.
    pub fn cached_len(&self, index: usize) -> usize {
        self.lists[index].len()
    }

    /// Blocks cached across all size classes.
    pub fn total_cached(&self) -> usize {
        self.lists.iter().map(FreeList::len).sum()
    }
}
