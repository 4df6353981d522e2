use std::mem;
use std::num::NonZero;

use new_zealand::nz;

/// Alignment of every block, every large entry and every aligned allocation.
///
/// This is the platform pointer alignment.
pub const ALIGNMENT: usize = mem::align_of::<usize>();

/// Block capacity used when the builder is not given one.
pub const DEFAULT_CAPACITY: NonZero<usize> = nz!(4096);

/// A block that has overflowed more than this many times is skipped by future searches.
pub(crate) const FAILED_THRESHOLD: u32 = 4;
