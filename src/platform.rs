//! Virtual memory from the operating system.
//!
//! `page_alloc` hands out zeroed, page-aligned memory (mmap on Unix,
//! VirtualAlloc on Windows). Under Miri the system allocator stands in so
//! the unsafe pointer logic above this layer can still be checked.

cfg_if::cfg_if! {
    if #[cfg(miri)] {
        mod miri;
        use miri as imp;
    } else if #[cfg(windows)] {
        mod windows;
        use windows as imp;
    } else if #[cfg(unix)] {
        mod unix;
        use unix as imp;
    }
}

/// Allocate `size` bytes of page-aligned, zeroed virtual memory.
/// Returns null on failure.
///
/// # Safety
/// The memory must only be released through `page_dealloc` with the same
/// `size`.
#[inline]
pub unsafe fn page_alloc(size: usize) -> *mut u8 {
    stat_inc!(os_alloc_count);
    stat_add!(os_alloc_bytes, size);
    unsafe { imp::page_alloc(size) }
}

/// Release memory obtained from `page_alloc`.
///
/// # Safety
/// `ptr` must have been returned by `page_alloc(size)` and not released yet.
#[inline]
pub unsafe fn page_dealloc(ptr: *mut u8, size: usize) {
    unsafe { imp::page_dealloc(ptr, size) }
}
