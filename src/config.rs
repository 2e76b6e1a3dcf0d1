//! Build-time layout configuration.

use crate::error::{Error, Result};
use crate::format::{shift_for_bitmap_size, size_code, MAX_POINTER_SIZE};

/// Node geometry for a packed trie.
///
/// Sizes are validated on construction, so a `TrieConfig` in hand is always
/// encodable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrieConfig {
    bitmap_size: usize,
    /// Key bits consumed per level, fixed by `bitmap_size`.
    shift: u32,
    value_size: usize,
    /// Forced pointer width; `None` picks the narrowest width that fits.
    pointer_size: Option<usize>,
}

impl TrieConfig {
    /// # Errors
    ///
    /// Returns `Error::InvalidBitmapSize` or `Error::InvalidValueSize` unless
    /// both sizes are 1, 2, 4 or 8 bytes.
    pub fn new(bitmap_size: usize, value_size: usize) -> Result<Self> {
        let Some(shift) = shift_for_bitmap_size(bitmap_size) else {
            return Err(Error::InvalidBitmapSize(bitmap_size));
        };
        if size_code(value_size).is_none() {
            return Err(Error::InvalidValueSize(value_size));
        }
        Ok(Self {
            bitmap_size,
            shift,
            value_size,
            pointer_size: None,
        })
    }

    /// Forces every pointer to be `pointer_size` bytes wide instead of the
    /// narrowest width that addresses the built trie.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPointerSize` unless `pointer_size` is 1 to 4.
    pub fn with_pointer_size(mut self, pointer_size: usize) -> Result<Self> {
        if !(1..=MAX_POINTER_SIZE).contains(&pointer_size) {
            return Err(Error::InvalidPointerSize(pointer_size));
        }
        self.pointer_size = Some(pointer_size);
        Ok(self)
    }

    #[inline]
    pub fn bitmap_size(&self) -> usize {
        self.bitmap_size
    }

    #[inline]
    pub fn value_size(&self) -> usize {
        self.value_size
    }

    #[inline]
    pub fn pointer_size(&self) -> Option<usize> {
        self.pointer_size
    }

    /// Key bits consumed per level.
    #[inline]
    pub fn shift(&self) -> u32 {
        self.shift
    }
}

impl Default for TrieConfig {
    /// 32-way nodes (4-byte bitmaps) holding 8-byte values.
    fn default() -> Self {
        Self {
            bitmap_size: 4,
            shift: 5,
            value_size: 8,
            pointer_size: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn accepts_legal_sizes() {
        for bitmap in [1, 2, 4, 8] {
            for value in [1, 2, 4, 8] {
                let c = TrieConfig::new(bitmap, value).unwrap();
                assert_eq!(c.bitmap_size(), bitmap);
                assert_eq!(c.value_size(), value);
                assert_eq!(c.pointer_size(), None);
            }
        }
        assert_eq!(TrieConfig::new(1, 1).unwrap().shift(), 3);
        assert_eq!(TrieConfig::new(2, 1).unwrap().shift(), 4);
        assert_eq!(TrieConfig::new(4, 1).unwrap().shift(), 5);
        assert_eq!(TrieConfig::new(8, 1).unwrap().shift(), 6);
    }

    #[test]
    fn rejects_illegal_sizes() {
        assert_eq!(TrieConfig::new(3, 8), Err(Error::InvalidBitmapSize(3)));
        assert_eq!(TrieConfig::new(0, 8), Err(Error::InvalidBitmapSize(0)));
        assert_eq!(TrieConfig::new(16, 8), Err(Error::InvalidBitmapSize(16)));
        assert_eq!(TrieConfig::new(4, 5), Err(Error::InvalidValueSize(5)));
        assert_eq!(
            TrieConfig::new(4, 16).unwrap_err().kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn pointer_size_override() {
        let c = TrieConfig::default().with_pointer_size(3).unwrap();
        assert_eq!(c.pointer_size(), Some(3));
        assert_eq!(
            TrieConfig::default().with_pointer_size(0),
            Err(Error::InvalidPointerSize(0))
        );
        assert_eq!(
            TrieConfig::default().with_pointer_size(5),
            Err(Error::InvalidPointerSize(5))
        );
    }

    #[test]
    fn default_is_32_way_u64() {
        let c = TrieConfig::default();
        assert_eq!(c.bitmap_size(), 4);
        assert_eq!(c.value_size(), 8);
        assert_eq!(c.shift(), 5);
        assert_eq!(c, TrieConfig::new(4, 8).unwrap());
    }
}
