//! Read-side queries over a serialized packed trie.
//!
//! A lookup walks at most `num_levels` nodes from the root. At each node it
//! checks the key's bucket bit and, if set, uses the rank of that bit to jump
//! straight to the matching pointer or value slot. Every read is bounds
//! checked against the data section, so truncated or corrupted buffers yield
//! an error rather than a wrong answer or a panic.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::format::{
    bit_is_set, bitmap_to_u64, bucket, key_in_range, rank, read_be, Header, HEADER_SIZE,
};

// =============================================================================
// Data section view
// =============================================================================

/// Borrowed data section plus the header that describes it.
#[derive(Clone, Copy)]
struct View<'a> {
    data: &'a [u8],
    header: Header,
}

impl<'a> View<'a> {
    #[inline]
    fn read(&self, offset: usize, need: usize) -> Result<&'a [u8]> {
        offset
            .checked_add(need)
            .and_then(|end| self.data.get(offset..end))
            .ok_or(Error::Truncated {
                offset,
                need,
                len: self.data.len(),
            })
    }

    #[inline]
    fn bitmap_at(&self, offset: usize) -> Result<&'a [u8]> {
        self.read(offset, self.header.bitmap_size as usize)
    }

    /// Reads slot `rank` of the node at `offset`, which lives at `level`.
    #[inline]
    fn slot(&self, offset: usize, rank: usize, level: u8) -> Result<u64> {
        let width = self.header.slot_width(level);
        let at = offset
            .saturating_add(self.header.bitmap_size as usize)
            .saturating_add(rank.saturating_mul(width));
        Ok(read_be(self.read(at, width)?))
    }

    fn lookup(&self, key: u64) -> Result<Option<u64>> {
        let shift = self.header.shift();
        if !key_in_range(key, self.header.num_levels, shift) {
            return Ok(None);
        }

        let mut offset = 0usize;
        let mut level = self.header.num_levels - 1;
        loop {
            let b = bucket(key, level, shift);
            let bitmap = self.bitmap_at(offset)?;
            if !bit_is_set(bitmap, b) {
                return Ok(None);
            }

            let slot = self.slot(offset, rank(bitmap, b), level)?;
            if level == 0 {
                return Ok(Some(slot));
            }

            tracing::trace!(key, level, bucket = b, child = slot, "descend");
            offset = usize::try_from(slot)
                .map_err(|_| Error::Malformed("pointer exceeds address space"))?;
            level -= 1;
        }
    }
}

// =============================================================================
// TrieReader
// =============================================================================

/// Query handle over a serialized packed trie.
///
/// `B` is any byte container: a borrowed `&[u8]`, a `Vec<u8>`, an `Arc<[u8]>`
/// and so on. The buffer is never modified, so one buffer may back any number
/// of readers on any number of threads.
#[derive(Clone, Debug)]
pub struct TrieReader<B> {
    buf: B,
    header: Header,
}

impl<B: AsRef<[u8]>> TrieReader<B> {
    /// Parses the header and checks that the root node's bitmap is present.
    ///
    /// # Errors
    ///
    /// Returns a decoding error (`Error::BufferTooShort`,
    /// `Error::UnsupportedVersion`, `Error::InvalidHeader` or
    /// `Error::Truncated`) if `buf` cannot hold a trie.
    pub fn new(buf: B) -> Result<Self> {
        let header = Header::decode(buf.as_ref())?;
        let reader = Self { buf, header };
        reader.view().bitmap_at(0)?;

        tracing::debug!(
            num_levels = reader.header.num_levels,
            bitmap_size = reader.header.bitmap_size,
            pointer_size = reader.header.pointer_size,
            value_size = reader.header.value_size,
            bytes = reader.buf.as_ref().len(),
            "opened packed trie"
        );
        Ok(reader)
    }

    #[inline]
    fn view(&self) -> View<'_> {
        View {
            data: &self.buf.as_ref()[HEADER_SIZE..],
            header: self.header,
        }
    }

    #[inline]
    pub fn header(&self) -> Header {
        self.header
    }

    /// The whole serialized trie, header included.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }

    pub fn into_inner(self) -> B {
        self.buf
    }

    /// Returns the value bound to `key`, or `None` if the key is absent.
    ///
    /// Keys with bits above the trie's deepest chunk are absent without
    /// touching the data section.
    ///
    /// # Errors
    ///
    /// Returns `Error::Truncated` if the descent would read past the buffer.
    pub fn lookup(&self, key: u64) -> Result<Option<u64>> {
        self.view().lookup(key)
    }

    /// Whether `key` is bound to a value.
    ///
    /// # Errors
    ///
    /// See [`TrieReader::lookup`].
    pub fn exists(&self, key: u64) -> Result<bool> {
        Ok(self.lookup(key)?.is_some())
    }

    /// Iterates every `(key, value)` pair in ascending key order.
    ///
    /// The iterator yields at most one error and then ends.
    pub fn iter(&self) -> Iter<'_> {
        Iter::new(self.view())
    }

    /// Walks every node, returning the number of entries.
    ///
    /// Unlike a lookup, which only touches one path, this checks that every
    /// node is in bounds, that no node is reached twice, and that the nodes
    /// account for the whole data section.
    ///
    /// # Errors
    ///
    /// Returns `Error::Truncated` or `Error::Malformed` for the first problem
    /// found.
    pub fn verify(&self) -> Result<usize> {
        let mut iter = self.iter();
        let mut count = 0usize;
        for entry in iter.by_ref() {
            entry?;
            count += 1;
        }
        if iter.node_bytes != iter.view.data.len() {
            return Err(Error::Malformed("data section has bytes outside any node"));
        }
        Ok(count)
    }
}

impl<'a, B: AsRef<[u8]>> IntoIterator for &'a TrieReader<B> {
    type Item = Result<(u64, u64)>;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// =============================================================================
// Iteration
// =============================================================================

#[derive(Clone, Copy)]
struct Frame {
    offset: usize,
    level: u8,
    /// Key bits fixed by the ancestors of this node.
    prefix: u64,
    /// Buckets not yet visited.
    remaining: u64,
    /// Slot index of the next bucket in `remaining`.
    rank: usize,
}

/// Depth-first, ascending-key iterator over a packed trie.
pub struct Iter<'a> {
    view: View<'a>,
    stack: Vec<Frame>,
    /// Bytes of every node entered so far. In a well-formed trie each node is
    /// entered once, so this never exceeds the data section.
    node_bytes: usize,
    /// Start offset to end offset of every node entered so far.
    extents: BTreeMap<usize, usize>,
    pending: Option<Error>,
}

impl<'a> Iter<'a> {
    fn new(view: View<'a>) -> Self {
        let mut iter = Self {
            view,
            stack: Vec::with_capacity(view.header.num_levels as usize),
            node_bytes: 0,
            extents: BTreeMap::new(),
            pending: None,
        };
        if let Err(e) = iter.enter(0, view.header.num_levels - 1, 0) {
            iter.pending = Some(e);
        }
        iter
    }

    fn enter(&mut self, offset: usize, level: u8, prefix: u64) -> Result<()> {
        let bitmap = bitmap_to_u64(self.view.bitmap_at(offset)?);
        let size = self.view.header.bitmap_size as usize
            + bitmap.count_ones() as usize * self.view.header.slot_width(level);
        let end = offset.saturating_add(size);
        let before = self.extents.range(..=offset).next_back();
        let after = self.extents.range(offset..).next();
        if before.is_some_and(|(_, &e)| e > offset) || after.is_some_and(|(&s, _)| s < end) {
            return Err(Error::Malformed("nodes overlap or are reached more than once"));
        }
        self.extents.insert(offset, end);

        self.node_bytes = self.node_bytes.saturating_add(size);
        if self.node_bytes > self.view.data.len() {
            return Err(Error::Malformed("nodes overlap or are reached more than once"));
        }
        self.stack.push(Frame {
            offset,
            level,
            prefix,
            remaining: bitmap,
            rank: 0,
        });
        Ok(())
    }

    fn fail(&mut self, err: Error) -> Option<Result<(u64, u64)>> {
        self.stack.clear();
        Some(Err(err))
    }
}

impl Iterator for Iter<'_> {
    type Item = Result<(u64, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending.take() {
            return self.fail(err);
        }

        let shift = self.view.header.shift();
        loop {
            let frame = self.stack.last_mut()?;
            if frame.remaining == 0 {
                self.stack.pop();
                continue;
            }

            let b = frame.remaining.trailing_zeros();
            frame.remaining &= frame.remaining - 1;
            let rank = frame.rank;
            frame.rank += 1;
            let Frame { offset, level, .. } = *frame;
            let bits = u32::from(level) * shift;
            let chunk = u64::from(b) << bits;
            // Only the root can hold buckets wider than the bits left in a key.
            if chunk >> bits != u64::from(b) {
                return self.fail(Error::Malformed("bucket lies above the key width"));
            }
            let key = frame.prefix | chunk;

            let slot = match self.view.slot(offset, rank, level) {
                Ok(slot) => slot,
                Err(e) => return self.fail(e),
            };
            if level == 0 {
                return Some(Ok((key, slot)));
            }
            let child = match usize::try_from(slot) {
                Ok(child) => child,
                Err(_) => return self.fail(Error::Malformed("pointer exceeds address space")),
            };
            if let Err(e) = self.enter(child, level - 1, key) {
                return self.fail(e);
            }
        }
    }
}
