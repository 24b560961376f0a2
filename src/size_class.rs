//! Size classes: rounding, bucket lookup and batch sizing.
//!
//! Sizes from 1 byte to 256 KiB are split into five tiers, each with its own
//! alignment, so that rounding wastes roughly 10% of the request at most:
//!
//! | bytes               | alignment | buckets      |
//! |---------------------|-----------|--------------|
//! | [1, 128]            | 8         | [0, 16)      |
//! | (128, 1024]         | 16        | [16, 72)     |
//! | (1 KiB, 8 KiB]      | 128       | [72, 128)    |
//! | (8 KiB, 64 KiB]     | 1024      | [128, 184)   |
//! | (64 KiB, 256 KiB]   | 8192      | [184, 208)   |
//!
//! Everything here is a pure function of the size.

use crate::config::{MAX_BATCH, MAX_BYTES, MIN_BATCH, PAGE_SIZE};
use crate::page_id::pages_for;

/// Number of size-class buckets.
pub const NUM_SIZE_CLASSES: usize = 208;

#[derive(Clone, Copy)]
struct Tier {
    /// Largest size in this tier (inclusive).
    limit: usize,
    /// log2 of the alignment.
    shift: usize,
    /// Largest size of the previous tier.
    base: usize,
    /// First bucket of this tier.
    first: usize,
}

const TIERS: [Tier; 5] = [
    Tier { limit: 128, shift: 3, base: 0, first: 0 },
    Tier { limit: 1024, shift: 4, base: 128, first: 16 },
    Tier { limit: 8 * 1024, shift: 7, base: 1024, first: 72 },
    Tier { limit: 64 * 1024, shift: 10, base: 8 * 1024, first: 128 },
    Tier { limit: 256 * 1024, shift: 13, base: 64 * 1024, first: 184 },
];

const _: () = assert!(TIERS[4].limit == MAX_BYTES);
const _: () = assert!(
    TIERS[4].first + ((TIERS[4].limit - TIERS[4].base) >> TIERS[4].shift) == NUM_SIZE_CLASSES
);

#[inline]
const fn tier_of(size: usize) -> usize {
    let mut i = 0;
    while i < TIERS.len() - 1 && size > TIERS[i].limit {
        i += 1;
    }
    i
}

#[inline]
const fn align_up(bytes: usize, shift: usize) -> usize {
    let align = 1 << shift;
    (bytes + align - 1) & !(align - 1)
}

/// Round `size` up to its size class.
///
/// `size` must not exceed [`MAX_BYTES`].
#[inline]
pub const fn round_up(size: usize) -> usize {
    assert!(size <= MAX_BYTES, "size above the size-classed range");
    align_up(size, TIERS[tier_of(size)].shift)
}

/// Bucket index of `size` (rounded or not; both give the same bucket).
///
/// `size` must be in `1..=MAX_BYTES`.
#[inline]
pub const fn index(size: usize) -> usize {
    assert!(size > 0 && size <= MAX_BYTES, "size outside the size-classed range");
    let Tier { shift, base, first, .. } = TIERS[tier_of(size)];
    ((size - base + (1 << shift) - 1) >> shift) - 1 + first
}

/// Block size of bucket `index`. Inverse of [`index`] on rounded sizes.
#[inline]
pub const fn class_to_size(index: usize) -> usize {
    assert!(index < NUM_SIZE_CLASSES);
    let mut i = TIERS.len() - 1;
    while index < TIERS[i].first {
        i -= 1;
    }
    let Tier { shift, base, first, .. } = TIERS[i];
    base + ((index - first + 1) << shift)
}

/// Upper bound on the number of objects moved between a thread cache and
/// the central cache in one batch.
///
/// Small objects move in large batches, large objects in small ones,
/// clamped to `[MIN_BATCH, MAX_BATCH]`.
#[inline]
pub const fn num_move_size(size: usize) -> usize {
    assert!(size > 0);
    let num = MAX_BYTES / size;
    if num < MIN_BATCH {
        MIN_BATCH
    } else if num > MAX_BATCH {
        MAX_BATCH
    } else {
        num
    }
}

/// Number of pages in a span carved for objects of `size` bytes: enough to
/// hold one full batch, at least one page.
#[inline]
pub const fn num_move_page(size: usize) -> usize {
    let bytes = num_move_size(size) * size;
    let pages = pages_for(bytes);
    if pages == 0 { 1 } else { pages }
}

/// Number of `size`-byte blocks one span of [`num_move_page`] pages yields.
#[inline]
pub const fn objects_per_span(size: usize) -> usize {
    num_move_page(size) * PAGE_SIZE / size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MAX_PAGES, NPAGES};

    #[test]
    fn test_round_up_tiers() {
        assert_eq!(round_up(1), 8);
        assert_eq!(round_up(7), 8);
        assert_eq!(round_up(8), 8);
        assert_eq!(round_up(9), 16);
        assert_eq!(round_up(128), 128);
        assert_eq!(round_up(129), 144);
        assert_eq!(round_up(1024), 1024);
        assert_eq!(round_up(1025), 1152);
        assert_eq!(round_up(8 * 1024 + 1), 9 * 1024);
        assert_eq!(round_up(64 * 1024 + 1), 72 * 1024);
        assert_eq!(round_up(MAX_BYTES), MAX_BYTES);
    }

    #[test]
    fn test_index_tier_boundaries() {
        assert_eq!(index(1), 0);
        assert_eq!(index(8), 0);
        assert_eq!(index(9), 1);
        assert_eq!(index(128), 15);
        assert_eq!(index(129), 16);
        assert_eq!(index(1024), 71);
        assert_eq!(index(1025), 72);
        assert_eq!(index(8 * 1024), 127);
        assert_eq!(index(8 * 1024 + 1), 128);
        assert_eq!(index(64 * 1024), 183);
        assert_eq!(index(64 * 1024 + 1), 184);
        assert_eq!(index(MAX_BYTES), NUM_SIZE_CLASSES - 1);
    }

    #[test]
    fn test_every_size_rounds_into_its_own_bucket() {
        let mut last = 0;
        for size in 1..=MAX_BYTES {
            let aligned = round_up(size);
            assert!(aligned >= size, "round_up({size}) = {aligned}");
            let idx = index(aligned);
            assert_eq!(idx, index(size), "size {size}");
            assert!(idx >= last, "index not monotonic at size {size}");
            assert!(idx < NUM_SIZE_CLASSES);
            assert_eq!(class_to_size(idx), aligned, "size {size}");
            last = idx;
        }
        assert_eq!(last, NUM_SIZE_CLASSES - 1);
    }

    #[test]
    fn test_class_sizes_strictly_increasing() {
        for idx in 1..NUM_SIZE_CLASSES {
            assert!(class_to_size(idx) > class_to_size(idx - 1), "bucket {idx}");
            assert_eq!(index(class_to_size(idx)), idx);
        }
    }

    #[test]
    fn test_internal_fragmentation_bounded() {
        // Worst case is the first size of each tier: 1/8 of the alignment
        // step against 8 steps of base.
        for size in 64..=MAX_BYTES {
            let waste = round_up(size) - size;
            assert!(waste * 100 <= size * 13, "size {size} wastes {waste}");
        }
    }

    #[test]
    fn test_num_move_size_clamped() {
        assert_eq!(num_move_size(8), MAX_BATCH.min(MAX_BYTES / 8));
        assert_eq!(num_move_size(MAX_BYTES), MIN_BATCH);
        assert_eq!(num_move_size(1024), (MAX_BYTES / 1024).clamp(MIN_BATCH, MAX_BATCH));
        let mut prev = usize::MAX;
        for idx in 0..NUM_SIZE_CLASSES {
            let n = num_move_size(class_to_size(idx));
            assert!((MIN_BATCH..=MAX_BATCH).contains(&n));
            assert!(n <= prev, "batch grows with size at bucket {idx}");
            prev = n;
        }
    }

    #[test]
    fn test_num_move_page_fits_buckets() {
        for idx in 0..NUM_SIZE_CLASSES {
            let size = class_to_size(idx);
            let pages = num_move_page(size);
            assert!(pages >= 1);
            assert!(pages <= MAX_PAGES && pages < NPAGES, "bucket {idx} needs {pages} pages");
            assert!(pages * PAGE_SIZE >= size * num_move_size(size));
            assert!(objects_per_span(size) >= num_move_size(size));
        }
    }
}
