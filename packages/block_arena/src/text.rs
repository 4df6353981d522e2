//! ASCII text helpers whose results live in a [`BlockArena`] or [`SyncBlockArena`].
//!
//! These are thin conveniences on top of `duplicate_bytes()` for code that builds
//! short-lived strings, such as log lines or protocol tokens, out of arena memory.

use std::str;

use crate::{BlockArena, Error, Result, SyncBlockArena};

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// An arena that the text helpers can allocate from.
///
/// This is a sealed trait implemented by [`BlockArena`] and [`SyncBlockArena`]. User code never
/// needs to implement it.
#[expect(private_bounds, reason = "intentional - sealed trait")]
pub trait TextArena: TextArenaPrivate {}

trait TextArenaPrivate {
    fn zeroed_bytes(&self, len: usize) -> Result<&mut [u8]>;

    fn copied_bytes(&self, source: &[u8]) -> Result<&mut [u8]>;
}

impl TextArena for BlockArena {}
impl TextArenaPrivate for BlockArena {
    fn zeroed_bytes(&self, len: usize) -> Result<&mut [u8]> {
        self.alloc_zeroed(len)
    }

    fn copied_bytes(&self, source: &[u8]) -> Result<&mut [u8]> {
        self.duplicate_bytes(source)
    }
}

impl TextArena for SyncBlockArena {}
impl TextArenaPrivate for SyncBlockArena {
    fn zeroed_bytes(&self, len: usize) -> Result<&mut [u8]> {
        self.alloc_zeroed(len)
    }

    fn copied_bytes(&self, source: &[u8]) -> Result<&mut [u8]> {
        self.duplicate_bytes(source)
    }
}

/// Encodes `bytes` as lowercase hexadecimal text allocated from `arena`.
///
/// # Errors
///
/// Returns [`Error::Exhausted`] if the arena cannot provide the memory.
///
/// # Examples
///
/// ```rust
/// use block_arena::{BlockArena, text};
/// use new_zealand::nz;
///
/// let arena = BlockArena::new(nz!(64));
/// assert_eq!(text::to_hex(&arena, &[0x00, 0xAB, 0x10]).unwrap(), "00ab10");
/// ```
pub fn to_hex<'a, A>(arena: &'a A, bytes: &[u8]) -> Result<&'a str>
where
    A: TextArena,
{
    let len = bytes.len().checked_mul(2).ok_or(Error::Exhausted)?;
    let target = arena.zeroed_bytes(len)?;

    for (pair, byte) in target.chunks_exact_mut(2).zip(bytes) {
        if let [high, low] = pair {
            *high = hex_digit(byte >> 4);
            *low = hex_digit(byte & 0x0F);
        }
    }

    // SAFETY: Only ASCII hex digits were written.
    Ok(unsafe { str::from_utf8_unchecked(target) })
}

/// Copies `text` into `arena` with ASCII letters converted to uppercase.
///
/// Non-ASCII characters are copied unchanged.
///
/// # Errors
///
/// Returns [`Error::Exhausted`] if the arena cannot provide the memory.
pub fn to_upper<'a, A>(arena: &'a A, text: &str) -> Result<&'a str>
where
    A: TextArena,
{
    let target = arena.copied_bytes(text.as_bytes())?;
    target.make_ascii_uppercase();

    // SAFETY: ASCII case mapping never touches bytes of multi-byte sequences.
    Ok(unsafe { str::from_utf8_unchecked(target) })
}

/// Copies `text` into `arena` with ASCII letters converted to lowercase.
///
/// Non-ASCII characters are copied unchanged.
///
/// # Errors
///
/// Returns [`Error::Exhausted`] if the arena cannot provide the memory.
pub fn to_lower<'a, A>(arena: &'a A, text: &str) -> Result<&'a str>
where
    A: TextArena,
{
    let target = arena.copied_bytes(text.as_bytes())?;
    target.make_ascii_lowercase();

    // SAFETY: ASCII case mapping never touches bytes of multi-byte sequences.
    Ok(unsafe { str::from_utf8_unchecked(target) })
}

#[inline]
fn hex_digit(nibble: u8) -> u8 {
    HEX_DIGITS
        .get(usize::from(nibble))
        .copied()
        .expect("nibble is always below 16")
}
