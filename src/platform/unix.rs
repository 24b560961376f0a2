//! mmap-backed pages.
//!
//! mmap only guarantees OS-page alignment, which can be smaller than our
//! `PAGE_SIZE`. We over-map by one page and trim both ends so the returned
//! region starts on a `PAGE_SIZE` boundary.

use crate::config::PAGE_SIZE;
use core::ptr;

unsafe fn map(len: usize) -> *mut u8 {
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        ptr::null_mut()
    } else {
        ptr.cast()
    }
}

pub unsafe fn page_alloc(size: usize) -> *mut u8 {
    let raw = unsafe { map(size + PAGE_SIZE) };
    if raw.is_null() {
        return raw;
    }
    let start = raw as usize;
    let aligned = (start + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
    let head = aligned - start;
    let tail = PAGE_SIZE - head;
    unsafe {
        if head > 0 {
            libc::munmap(raw.cast(), head);
        }
        if tail > 0 {
            libc::munmap((aligned + size) as *mut libc::c_void, tail);
        }
    }
    aligned as *mut u8
}

pub unsafe fn page_dealloc(ptr: *mut u8, size: usize) {
    unsafe { libc::munmap(ptr.cast(), size) };
}
