//! VirtualAlloc-backed pages. The 64 KiB allocation granularity already
//! exceeds any supported `PAGE_SIZE`, so no trimming is needed.

use core::ffi::c_void;

const MEM_COMMIT: u32 = 0x1000;
const MEM_RESERVE: u32 = 0x2000;
const MEM_RELEASE: u32 = 0x8000;
const PAGE_READWRITE: u32 = 0x04;

unsafe extern "system" {
    #[link_name = "VirtualAlloc"]
    fn virtual_alloc(address: *mut c_void, size: usize, kind: u32, protect: u32) -> *mut c_void;

    #[link_name = "VirtualFree"]
    fn virtual_free(address: *mut c_void, size: usize, kind: u32) -> i32;
}

pub unsafe fn page_alloc(size: usize) -> *mut u8 {
    let ptr = unsafe {
        virtual_alloc(
            core::ptr::null_mut(),
            size,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        )
    };
    ptr.cast()
}

pub unsafe fn page_dealloc(ptr: *mut u8, _size: usize) {
    // MEM_RELEASE frees the whole reservation and requires a size of 0.
    unsafe { virtual_free(ptr.cast(), 0, MEM_RELEASE) };
}
