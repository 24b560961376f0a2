//! Recoverable allocation failures.
//!
//! Only two conditions surface to callers. Everything else (an unknown
//! pointer handed to `free`, a page missing from the page map, a carved
//! span without free blocks) is an invariant violation and panics.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The operating system refused a fresh chunk of pages.
    #[error("out of memory: the OS refused {pages} pages")]
    OutOfMemory { pages: usize },
    /// The request needs a span larger than the page cache manages.
    #[error("allocation of {size} bytes exceeds the largest manageable span")]
    TooLarge { size: usize },
}
