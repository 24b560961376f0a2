#![no_std]

//! tcalloc: a thread-caching memory allocator.
//!
//! Three tiers, fastest first:
//! - Thread caches: one free list per size class, owned by a single thread,
//!   no locks (requires the `std` feature for thread-local storage)
//! - Central cache: per-size-class buckets of carved spans, one lock each
//! - Page cache: page-granular spans, one global lock, talks to the OS and
//!   splits/coalesces spans
//!
//! Requests above 256 KiB skip the first two tiers and take whole spans
//! from the page cache.
//!
//! # Usage
//!
//! ```ignore
//! let ptr = tcalloc::allocate(64)?;
//! unsafe { tcalloc::free(ptr) };
//!
//! #[global_allocator]
//! static GLOBAL: tcalloc::TcAlloc = tcalloc::TcAlloc;
//! ```

#[cfg(test)]
extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

#[macro_use]
mod macros;

pub mod allocator;
pub mod central_cache;
pub mod config;
pub mod error;
pub mod free_list;
pub mod object_pool;
pub mod page_cache;
pub mod page_id;
pub mod pagemap;
pub mod platform;
pub mod size_class;
pub mod span;
#[cfg(feature = "stats")]
pub mod stats;
pub mod sync;
pub mod thread_cache;

pub use allocator::{TcAlloc, allocate, free, usable_size};
pub use config::{PAGE_SHIFT, PAGE_SIZE};
pub use error::AllocError;
pub use page_id::PageId;
