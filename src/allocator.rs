//! Front door: ties the tiers together and implements `GlobalAlloc`.
//!
//! All shared state lives in module-level statics; `TcAlloc` is zero-sized.
//!
//! Routing:
//! - requests above `MAX_BYTES` take a whole span from the page cache
//! - `std` feature: everything else goes through the calling thread's cache
//! - without `std`: everything else goes straight to the central cache, one
//!   block at a time

use crate::central_cache::CentralCache;
use crate::config::{MAX_BYTES, NPAGES, PAGE_SIZE};
use crate::error::AllocError;
use crate::free_list::FreeObject;
use crate::page_cache::PageCache;
use crate::page_id::pages_for;
use crate::pagemap::PageMap;
use crate::size_class;
use crate::sync::SpinMutex;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};

pub(crate) static PAGE_MAP: PageMap = PageMap::new();
pub(crate) static PAGE_CACHE: SpinMutex<PageCache> = SpinMutex::new(PageCache::new(&PAGE_MAP));
pub(crate) static CENTRAL_CACHE: CentralCache = CentralCache::new(&PAGE_CACHE, &PAGE_MAP);

/// The process-wide page cache.
pub fn page_cache() -> &'static SpinMutex<PageCache> {
    &PAGE_CACHE
}

/// The process-wide central cache.
pub fn central_cache() -> &'static CentralCache {
    &CENTRAL_CACHE
}

#[cfg(feature = "std")]
mod tls {
    use super::CENTRAL_CACHE;
    use crate::object_pool::ObjectPool;
    use crate::sync::SpinMutex;
    use crate::thread_cache::ThreadCache;
    use core::cell::Cell;
    use core::ptr::NonNull;

    /// Every thread cache comes from here, never from the allocator itself.
    static POOL: SpinMutex<ObjectPool<ThreadCache>> = SpinMutex::new(ObjectPool::new());

    #[derive(Clone, Copy)]
    enum TlsState {
        Uninitialized,
        Active(NonNull<ThreadCache>),
        /// The cache is borrowed further up this thread's stack. Reached
        /// when a logger called from inside the allocator allocates.
        Busy,
        /// The thread is exiting and its cache is gone.
        Destroyed,
    }

    std::thread_local! {
        // No destructor, so this stays readable for the whole thread
        // teardown, including from other TLS destructors that free memory.
        static STATE: Cell<TlsState> = const { Cell::new(TlsState::Uninitialized) };
    }

    struct Guard;

    impl Drop for Guard {
        fn drop(&mut self) {
            if let TlsState::Active(tc) = STATE.get() {
                // Mark first: flushing must not hand out this cache again.
                STATE.set(TlsState::Destroyed);
                unsafe {
                    (*tc.as_ptr()).flush(&CENTRAL_CACHE);
                    POOL.lock().delete(tc);
                }
                diag!(debug, "thread cache flushed and released");
            }
        }
    }

    std::thread_local! {
        static GUARD: Guard = const { Guard };
    }

    #[cold]
    #[inline(never)]
    fn activate() -> Option<NonNull<ThreadCache>> {
        let tc = POOL.lock().new_object(ThreadCache::new()).ok()?;
        // Active before the guard registers: registration may allocate, and
        // that call must find the cache instead of building another one.
        STATE.set(TlsState::Active(tc));
        // Fails only while TLS is being torn down; the cache is then never
        // flushed and its blocks stay lent out.
        let _ = GUARD.try_with(|_| {});
        diag!(debug, "thread cache created");
        Some(tc)
    }

    /// Run `f` on the calling thread's cache, creating it on first use.
    /// `None` once the thread is tearing down, while the cache is already
    /// borrowed, or when the pool is exhausted.
    #[inline]
    pub(super) fn with_thread_cache<R>(f: impl FnOnce(&mut ThreadCache) -> R) -> Option<R> {
        let tc = match STATE.get() {
            TlsState::Active(tc) => tc,
            TlsState::Uninitialized => activate()?,
            TlsState::Busy | TlsState::Destroyed => return None,
        };
        STATE.set(TlsState::Busy);
        // SAFETY: the cache is reachable only from this thread, and `Busy`
        // turns away any nested call until `f` returns.
        let result = f(unsafe { &mut *tc.as_ptr() });
        STATE.set(TlsState::Active(tc));
        Some(result)
    }

    pub(super) fn flush() {
        if let TlsState::Active(_) = STATE.get() {
            with_thread_cache(|tc| tc.flush(&CENTRAL_CACHE));
        }
    }
}

/// Allocate at least `size` bytes. `allocate(0)` is served as one byte.
///
/// Requests above `MAX_BYTES` are page-aligned spans straight from the page
/// cache; requests needing `NPAGES` pages or more are refused.
pub fn allocate(size: usize) -> Result<NonNull<u8>, AllocError> {
    let size = size.max(1);
    let result = if size > MAX_BYTES {
        allocate_pages(size)
    } else {
        allocate_small(size)
    };
    let ptr = match result {
        Ok(ptr) => ptr,
        Err(err) => {
            diag!(warn, "{}", err);
            return Err(err);
        }
    };
    stat_inc!(alloc_count);
    stat_add!(alloc_bytes, size);
    Ok(ptr)
}

#[cold]
fn allocate_pages(size: usize) -> Result<NonNull<u8>, AllocError> {
    let pages = pages_for(size);
    if pages >= NPAGES {
        return Err(AllocError::TooLarge { size });
    }
    let mut page_cache = PAGE_CACHE.lock();
    let span = page_cache.new_span(pages);
    let events = page_cache.take_events();
    drop(page_cache);
    events.log();
    let span = span?;
    stat_inc!(page_direct_allocs);
    unsafe {
        // Checked out to us alone; no lock needed.
        (*span).obj_size = size;
        Ok(NonNull::new_unchecked((*span).start_addr()))
    }
}

#[inline]
fn allocate_small(size: usize) -> Result<NonNull<u8>, AllocError> {
    #[cfg(feature = "std")]
    if let Some(result) = tls::with_thread_cache(|tc| tc.allocate(size, &CENTRAL_CACHE)) {
        return result;
    }

    let (first, _, _) = CENTRAL_CACHE.fetch_range_obj(1, size_class::round_up(size))?;
    // SAFETY: a fetched batch is never empty.
    Ok(unsafe { NonNull::new_unchecked(first.cast()) })
}

/// Release memory returned by [`allocate`].
///
/// # Safety
///
/// `ptr` must come from [`allocate`] (or [`TcAlloc`]) and not have been
/// freed yet. Foreign pointers panic when their page is unknown, and are
/// undefined behavior otherwise.
pub unsafe fn free(ptr: NonNull<u8>) {
    let span = PAGE_MAP.span_of(ptr.as_ptr());
    let size = unsafe { (*span).obj_size };
    stat_inc!(free_count);

    if size > MAX_BYTES {
        unsafe { PAGE_CACHE.lock().release_span_to_page_cache(span) };
    } else {
        unsafe { free_small(ptr, size) };
    }
}

#[inline]
unsafe fn free_small(ptr: NonNull<u8>, size: usize) {
    #[cfg(feature = "std")]
    if tls::with_thread_cache(|tc| unsafe { tc.deallocate(ptr, size, &CENTRAL_CACHE) }).is_some() {
        return;
    }

    let obj = ptr.as_ptr().cast::<FreeObject>();
    unsafe {
        (*obj).next = ptr::null_mut();
        CENTRAL_CACHE.release_list_to_spans(obj, size);
    }
}

/// Bytes actually usable at `ptr`: the block size for size-classed
/// allocations, the whole span for page-direct ones.
///
/// Panics if `ptr` lies on a page this allocator never handed out.
pub fn usable_size(ptr: NonNull<u8>) -> usize {
    let span = PAGE_MAP.span_of(ptr.as_ptr());
    unsafe {
        let size = (*span).obj_size;
        if size > MAX_BYTES { (*span).byte_size() } else { size }
    }
}

/// Hand the calling thread's cached blocks back to the central cache.
///
/// Threads do this on exit anyway; long-lived threads can call it after a
/// burst of frees. No-op without the `std` feature.
pub fn flush_thread_cache() {
    #[cfg(feature = "std")]
    tls::flush();
}

/// Size to request for `layout`, or `None` if the alignment cannot be met.
///
/// Rounding the size up to a multiple of the alignment lands in a size
/// class whose blocks are all aligned: spans start on a page and every
/// class size at or above `align` is a multiple of it. Page-direct spans
/// are page-aligned.
#[inline]
fn layout_size(layout: Layout) -> Option<usize> {
    if layout.align() > PAGE_SIZE {
        return None;
    }
    Some(layout.size().next_multiple_of(layout.align()))
}

/// Thread-caching allocator for Rust.
///
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: tcalloc::TcAlloc = tcalloc::TcAlloc;
/// ```
///
/// Alignments above `PAGE_SIZE` are not supported and return null.
pub struct TcAlloc;

unsafe impl GlobalAlloc for TcAlloc {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.size() == 0 {
            return ptr::without_provenance_mut(layout.align());
        }
        match layout_size(layout).map(allocate) {
            Some(Ok(ptr)) => ptr.as_ptr(),
            _ => ptr::null_mut(),
        }
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        if let Some(ptr) = NonNull::new(ptr) {
            unsafe { free(ptr) };
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.alloc(layout) };
        if !ptr.is_null() && layout.size() > 0 {
            unsafe { ptr::write_bytes(ptr, 0, layout.size()) };
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let Some(old) = NonNull::new(ptr).filter(|_| layout.size() > 0) else {
            let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
            return unsafe { self.alloc(new_layout) };
        };

        // The block may be larger than `layout` says: an earlier in-place
        // shrink keeps the original block.
        if new_size <= usable_size(old) {
            return ptr;
        }

        let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
        let new_ptr = unsafe { self.alloc(new_layout) };
        if !new_ptr.is_null() {
            unsafe {
                ptr::copy_nonoverlapping(ptr, new_ptr, layout.size().min(new_size));
                free(old);
            }
        }
        new_ptr
    }
}
