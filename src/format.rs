//! Wire format shared by the builder and the reader.
//!
//! A packed trie is a 2-byte header followed by the data section, a flat run of
//! nodes. Every node is laid out as
//!
//! ```text
//! [bitmap: bitmap_size][slot 0][slot 1]...[slot popcount-1]
//! ```
//!
//! where each slot is either a big-endian child pointer (`pointer_size` bytes,
//! an offset into the data section) or a big-endian value (`value_size`
//! bytes). Nodes at level 0 hold values, all others hold pointers.
//!
//! Bitmap byte 0 covers buckets 0..8, and bit 0 of each byte is its lowest
//! bucket, so the k-th set bit in ascending bucket order owns slot k.

use crate::error::{Error, Result};

// =============================================================================
// Constants
// =============================================================================

pub const FORMAT_VERSION: u8 = 0;
pub const HEADER_SIZE: usize = 2;
pub const MAX_POINTER_SIZE: usize = 4;

/// Keys are `u64`, so no trie is ever deeper than this many bits.
pub const KEY_BITS: u32 = u64::BITS;

// Header bit layout, bit 0 = least significant bit of the big-endian u16.
const VERSION_SHIFT: u16 = 0;
const VERSION_MASK: u16 = 0xF;
const LEVELS_SHIFT: u16 = 4;
const LEVELS_MASK: u16 = 0x1F;
const BITMAP_CODE_SHIFT: u16 = 9;
const BITMAP_CODE_MASK: u16 = 0x3;
const POINTER_CODE_SHIFT: u16 = 11;
const POINTER_CODE_MASK: u16 = 0x3;
const VALUE_CODE_SHIFT: u16 = 13;
const VALUE_CODE_MASK: u16 = 0x7;

/// Key bits consumed per level, indexed by `log2(bitmap_size)`.
const SHIFT_BY_BITMAP_CODE: [u32; 4] = [3, 4, 5, 6];

// =============================================================================
// Size codes
// =============================================================================

/// `log2(size)` for the legal power-of-two widths 1, 2, 4 and 8.
#[inline]
#[must_use]
pub fn size_code(size: usize) -> Option<u8> {
    match size {
        1 => Some(0),
        2 => Some(1),
        4 => Some(2),
        8 => Some(3),
        _ => None,
    }
}

#[inline]
#[must_use]
pub fn size_from_code(code: u8) -> Option<usize> {
    (code <= 3).then(|| 1usize << code)
}

#[inline]
#[must_use]
pub fn shift_for_bitmap_size(bitmap_size: usize) -> Option<u32> {
    size_code(bitmap_size).map(|code| SHIFT_BY_BITMAP_CODE[code as usize])
}

// =============================================================================
// Key chunking
// =============================================================================

/// `key >> bits`, yielding 0 once every bit has been shifted out.
#[inline]
#[must_use]
pub fn shr(key: u64, bits: u32) -> u64 {
    key.checked_shr(bits).unwrap_or(0)
}

/// Number of levels needed so that `max_key` has no bits above the root chunk.
#[must_use]
pub fn num_levels_for(max_key: u64, shift: u32) -> u8 {
    let mut levels = 1u32;
    while shr(max_key, levels * shift) != 0 {
        levels += 1;
    }
    levels as u8
}

/// Whether `key` can be represented by a trie `num_levels` deep.
#[inline]
#[must_use]
pub fn key_in_range(key: u64, num_levels: u8, shift: u32) -> bool {
    shr(key, u32::from(num_levels) * shift) == 0
}

/// Bucket index examined for `key` at `level`.
#[inline]
#[must_use]
pub fn bucket(key: u64, level: u8, shift: u32) -> usize {
    let mask = (1u64 << shift) - 1;
    (shr(key, u32::from(level) * shift) & mask) as usize
}

// =============================================================================
// Bitmap helpers
// =============================================================================

#[inline]
#[must_use]
pub fn bit_is_set(bitmap: &[u8], bucket: usize) -> bool {
    (bitmap[bucket / 8] >> (bucket % 8)) & 1 == 1
}

/// Number of set buckets strictly below `bucket`.
#[inline]
#[must_use]
pub fn rank(bitmap: &[u8], bucket: usize) -> usize {
    let whole = bucket / 8;
    let lower: u32 = bitmap[..whole].iter().map(|b| b.count_ones()).sum();
    let partial = bitmap[whole] & ((1u16 << (bucket % 8)) - 1) as u8;
    (lower + partial.count_ones()) as usize
}

/// Loads a bitmap of up to 8 bytes into a `u64` with bucket `i` at bit `i`.
#[inline]
#[must_use]
pub fn bitmap_to_u64(bitmap: &[u8]) -> u64 {
    debug_assert!(bitmap.len() <= 8);
    let mut word = [0u8; 8];
    word[..bitmap.len()].copy_from_slice(bitmap);
    u64::from_le_bytes(word)
}

// =============================================================================
// Fixed-width big-endian integers
// =============================================================================

#[inline]
#[must_use]
pub fn read_be(bytes: &[u8]) -> u64 {
    debug_assert!(bytes.len() <= 8);
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

#[inline]
pub fn write_be(out: &mut Vec<u8>, value: u64, width: usize) {
    debug_assert!((1..=8).contains(&width));
    debug_assert!(fits_in(value, width));
    out.extend_from_slice(&value.to_be_bytes()[8 - width..]);
}

/// Whether `value` is representable in `width` bytes.
#[inline]
#[must_use]
pub fn fits_in(value: u64, width: usize) -> bool {
    width >= 8 || value >> (width * 8) == 0
}

// =============================================================================
// Header
// =============================================================================

/// Decoded 16-bit trie header. Sizes are in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub num_levels: u8,
    pub bitmap_size: u8,
    pub pointer_size: u8,
    pub value_size: u8,
}

impl Header {
    /// Packs the header into its 2-byte wire form.
    ///
    /// # Errors
    ///
    /// Fields are public, so they are checked here: `Error::UnsupportedVersion`
    /// for a version other than [`FORMAT_VERSION`], `Error::InvalidBitmapSize`,
    /// `Error::InvalidPointerSize` or `Error::InvalidValueSize` for sizes the
    /// codes cannot express, and `Error::InvalidHeader` for a level count that
    /// is zero or deeper than a `u64` key.
    pub fn encode(&self) -> Result<[u8; HEADER_SIZE]> {
        if self.version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(self.version));
        }
        let bitmap_code = size_code(self.bitmap_size as usize)
            .ok_or(Error::InvalidBitmapSize(self.bitmap_size as usize))?;
        let value_code = size_code(self.value_size as usize)
            .ok_or(Error::InvalidValueSize(self.value_size as usize))?;
        if !(1..=MAX_POINTER_SIZE).contains(&(self.pointer_size as usize)) {
            return Err(Error::InvalidPointerSize(self.pointer_size as usize));
        }
        if self.num_levels == 0 {
            return Err(Error::InvalidHeader("trie has zero levels"));
        }
        if u32::from(self.num_levels - 1) * self.shift() >= KEY_BITS {
            return Err(Error::InvalidHeader("more levels than a u64 key has chunks"));
        }

        let word = u16::from(self.version) << VERSION_SHIFT
            | u16::from(self.num_levels) << LEVELS_SHIFT
            | u16::from(bitmap_code) << BITMAP_CODE_SHIFT
            | u16::from(self.pointer_size - 1) << POINTER_CODE_SHIFT
            | u16::from(value_code) << VALUE_CODE_SHIFT;
        Ok(word.to_be_bytes())
    }

    /// Decodes and validates the header at the start of `buf`.
    ///
    /// # Errors
    ///
    /// Returns `Error::BufferTooShort` for buffers under two bytes,
    /// `Error::UnsupportedVersion` for versions other than [`FORMAT_VERSION`],
    /// and `Error::InvalidHeader` for field combinations no builder produces.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let bytes: [u8; HEADER_SIZE] = buf
            .get(..HEADER_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(Error::BufferTooShort { len: buf.len() })?;
        let word = u16::from_be_bytes(bytes);

        let version = ((word >> VERSION_SHIFT) & VERSION_MASK) as u8;
        if version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let num_levels = ((word >> LEVELS_SHIFT) & LEVELS_MASK) as u8;
        let bitmap_code = ((word >> BITMAP_CODE_SHIFT) & BITMAP_CODE_MASK) as u8;
        let pointer_code = ((word >> POINTER_CODE_SHIFT) & POINTER_CODE_MASK) as u8;
        let value_code = ((word >> VALUE_CODE_SHIFT) & VALUE_CODE_MASK) as u8;

        let bitmap_size = size_from_code(bitmap_code)
            .ok_or(Error::InvalidHeader("bitmap size code out of range"))?;
        let value_size = size_from_code(value_code)
            .ok_or(Error::InvalidHeader("value size code out of range"))?;

        let header = Self {
            version,
            num_levels,
            bitmap_size: bitmap_size as u8,
            pointer_size: pointer_code + 1,
            value_size: value_size as u8,
        };

        if num_levels == 0 {
            return Err(Error::InvalidHeader("trie has zero levels"));
        }
        // The root chunk must still start inside a u64 key.
        if u32::from(num_levels - 1) * header.shift() >= KEY_BITS {
            return Err(Error::InvalidHeader("more levels than a u64 key has chunks"));
        }

        Ok(header)
    }

    #[inline]
    #[must_use]
    pub fn shift(&self) -> u32 {
        shift_for_bitmap_size(self.bitmap_size as usize).unwrap_or(SHIFT_BY_BITMAP_CODE[0])
    }

    #[inline]
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.bitmap_size as usize * 8
    }

    /// Width of one slot in a node at `level`: values at level 0, pointers above.
    #[inline]
    #[must_use]
    pub fn slot_width(&self, level: u8) -> usize {
        if level == 0 {
            self.value_size as usize
        } else {
            self.pointer_size as usize
        }
    }
}
