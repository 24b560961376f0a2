//! Build-time configuration.
//!
//! Constants are generated by `build.rs` from `tcalloc.toml` (or the file
//! named by `TCALLOC_CONFIG`). Derived values live here.

include!(concat!(env!("OUT_DIR"), "/config_gen.rs"));

/// Number of page-cache buckets. Bucket `k` holds spans of exactly `k`
/// pages; bucket 0 is unused.
pub const NPAGES: usize = MAX_PAGES + 1;

/// Largest request served from size classes (256 KiB).
pub const MAX_BYTES: usize = 256 * 1024;
