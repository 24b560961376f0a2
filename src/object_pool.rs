//! Fixed-size object pool backed directly by OS pages.
//!
//! Allocator metadata (span records, per-thread caches) cannot come from the
//! allocator it describes. An `ObjectPool<T>` bump-allocates `T` slots out of
//! chunks obtained from [`platform::page_alloc`](crate::platform::page_alloc)
//! and recycles returned slots through a free chain threaded through their
//! first word. Chunks are never given back to the OS.

use crate::config::{BOOTSTRAP_CHUNK_SIZE, PAGE_SIZE};
use crate::error::AllocError;
use crate::free_list::FreeObject;
use crate::page_id::pages_for;
use crate::platform;
use core::marker::PhantomData;
use core::mem::{align_of, size_of};
use core::ptr::{self, NonNull};

pub struct ObjectPool<T> {
    /// Slots handed back through `delete`.
    free_slots: *mut FreeObject,
    /// Bump pointer within the current chunk.
    bump_ptr: *mut u8,
    /// End of the current chunk.
    bump_end: *mut u8,
    _marker: PhantomData<T>,
}

// SAFETY: the pool owns its chunks exclusively; callers serialize access
// (a `SpinMutex` or a single owning thread).
unsafe impl<T> Send for ObjectPool<T> {}

impl<T> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ObjectPool<T> {
    const SLOT_ALIGN: usize = if align_of::<T>() > align_of::<FreeObject>() {
        align_of::<T>()
    } else {
        align_of::<FreeObject>()
    };

    /// A slot must hold either a `T` or a free-chain link.
    const SLOT_SIZE: usize = {
        let size = if size_of::<T>() > size_of::<FreeObject>() {
            size_of::<T>()
        } else {
            size_of::<FreeObject>()
        };
        (size + Self::SLOT_ALIGN - 1) & !(Self::SLOT_ALIGN - 1)
    };

    /// Chunks hold at least one slot and are whole pages.
    const CHUNK_SIZE: usize = {
        let bytes = if Self::SLOT_SIZE > BOOTSTRAP_CHUNK_SIZE {
            Self::SLOT_SIZE
        } else {
            BOOTSTRAP_CHUNK_SIZE
        };
        pages_for(bytes) * PAGE_SIZE
    };

    pub const fn new() -> Self {
        assert!(Self::SLOT_ALIGN <= PAGE_SIZE);
        Self {
            free_slots: ptr::null_mut(),
            bump_ptr: ptr::null_mut(),
            bump_end: ptr::null_mut(),
            _marker: PhantomData,
        }
    }

    fn alloc_slot(&mut self) -> Result<*mut u8, AllocError> {
        if !self.free_slots.is_null() {
            let slot = self.free_slots;
            self.free_slots = unsafe { (*slot).next };
            return Ok(slot.cast());
        }

        if (self.bump_end as usize) - (self.bump_ptr as usize) < Self::SLOT_SIZE {
            let chunk = unsafe { platform::page_alloc(Self::CHUNK_SIZE) };
            if chunk.is_null() {
                return Err(AllocError::OutOfMemory {
                    pages: Self::CHUNK_SIZE / PAGE_SIZE,
                });
            }
            self.bump_ptr = chunk;
            self.bump_end = unsafe { chunk.add(Self::CHUNK_SIZE) };
        }

        let slot = self.bump_ptr;
        self.bump_ptr = unsafe { slot.add(Self::SLOT_SIZE) };
        Ok(slot)
    }

    /// Move `value` into a fresh slot.
    pub fn new_object(&mut self, value: T) -> Result<NonNull<T>, AllocError> {
        let slot = self.alloc_slot()?.cast::<T>();
        unsafe {
            slot.write(value);
            Ok(NonNull::new_unchecked(slot))
        }
    }

    /// Drop the object in place and recycle its slot.
    ///
    /// # Safety
    ///
    /// `obj` must come from `new_object` on this pool and not be used again.
    pub unsafe fn delete(&mut self, obj: NonNull<T>) {
        unsafe {
            ptr::drop_in_place(obj.as_ptr());
            let slot = obj.as_ptr().cast::<FreeObject>();
            (*slot).next = self.free_slots;
            self.free_slots = slot;
        }
    }
}
