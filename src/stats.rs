//! Allocation statistics counters.
//!
//! All counters use `Relaxed` ordering. They are observational only; the
//! allocator's own locks provide the ordering it relies on.
//!
//! ```ignore
//! let snap = tcalloc::stats::snapshot();
//! println!("central fetches: {}", snap.central_fetches);
//! ```
//!
//! Individual loads in a [`Snapshot`] are atomic but not consistent with
//! each other.

use core::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct Stats {
    // Front door
    pub alloc_count: AtomicU64,
    pub free_count: AtomicU64,
    pub alloc_bytes: AtomicU64,

    // Thread cache
    /// Allocations served from a thread cache free list.
    pub thread_cache_hits: AtomicU64,
    /// Allocations that had to fetch from the central cache.
    pub thread_cache_misses: AtomicU64,

    // Central cache
    /// Calls to `fetch_range_obj`.
    pub central_fetches: AtomicU64,
    /// Objects handed out by `fetch_range_obj`.
    pub central_fetch_objects: AtomicU64,
    /// Spans whose use count dropped to zero and went back to the page cache.
    pub spans_released: AtomicU64,

    // Page cache / OS
    /// Allocations above the size-classed range.
    pub page_direct_allocs: AtomicU64,
    pub os_alloc_count: AtomicU64,
    pub os_alloc_bytes: AtomicU64,
    pub span_splits: AtomicU64,
    pub span_coalesces: AtomicU64,
}

impl Stats {
    const fn new() -> Self {
        Self {
            alloc_count: AtomicU64::new(0),
            free_count: AtomicU64::new(0),
            alloc_bytes: AtomicU64::new(0),
            thread_cache_hits: AtomicU64::new(0),
            thread_cache_misses: AtomicU64::new(0),
            central_fetches: AtomicU64::new(0),
            central_fetch_objects: AtomicU64::new(0),
            spans_released: AtomicU64::new(0),
            page_direct_allocs: AtomicU64::new(0),
            os_alloc_count: AtomicU64::new(0),
            os_alloc_bytes: AtomicU64::new(0),
            span_splits: AtomicU64::new(0),
            span_coalesces: AtomicU64::new(0),
        }
    }
}

pub(crate) static STATS: Stats = Stats::new();

/// Plain-value copy of the global counters. See [`snapshot()`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Successful calls to `allocate`.
    pub alloc_count: u64,
    /// Calls to `free`.
    pub free_count: u64,
    /// Sum of requested sizes passed to `allocate`.
    pub alloc_bytes: u64,
    pub thread_cache_hits: u64,
    pub thread_cache_misses: u64,
    pub central_fetches: u64,
    pub central_fetch_objects: u64,
    pub spans_released: u64,
    pub page_direct_allocs: u64,
    /// Chunks requested from the OS (page cache, page map and pools).
    pub os_alloc_count: u64,
    pub os_alloc_bytes: u64,
    pub span_splits: u64,
    pub span_coalesces: u64,
}

pub fn snapshot() -> Snapshot {
    let s = &STATS;
    Snapshot {
        alloc_count: s.alloc_count.load(Ordering::Relaxed),
        free_count: s.free_count.load(Ordering::Relaxed),
        alloc_bytes: s.alloc_bytes.load(Ordering::Relaxed),
        thread_cache_hits: s.thread_cache_hits.load(Ordering::Relaxed),
        thread_cache_misses: s.thread_cache_misses.load(Ordering::Relaxed),
        central_fetches: s.central_fetches.load(Ordering::Relaxed),
        central_fetch_objects: s.central_fetch_objects.load(Ordering::Relaxed),
        spans_released: s.spans_released.load(Ordering::Relaxed),
        page_direct_allocs: s.page_direct_allocs.load(Ordering::Relaxed),
        os_alloc_count: s.os_alloc_count.load(Ordering::Relaxed),
        os_alloc_bytes: s.os_alloc_bytes.load(Ordering::Relaxed),
        span_splits: s.span_splits.load(Ordering::Relaxed),
        span_coalesces: s.span_coalesces.load(Ordering::Relaxed),
    }
}
