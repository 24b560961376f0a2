//! System-allocator stand-in for Miri, which cannot run mmap/VirtualAlloc.

extern crate alloc;

use crate::config::PAGE_SIZE;
use core::alloc::Layout;

pub unsafe fn page_alloc(size: usize) -> *mut u8 {
    match Layout::from_size_align(size, PAGE_SIZE) {
        Ok(layout) => unsafe { alloc::alloc::alloc_zeroed(layout) },
        Err(_) => core::ptr::null_mut(),
    }
}

pub unsafe fn page_dealloc(ptr: *mut u8, size: usize) {
    if let Ok(layout) = Layout::from_size_align(size, PAGE_SIZE) {
        unsafe { alloc::alloc::dealloc(ptr, layout) };
    }
}
