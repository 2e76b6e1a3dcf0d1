//! Construction of packed tries.
//!
//! Building runs in three passes:
//!
//! 1. A level sweep from the root down, in ascending key order, that grows an
//!    arena of nodes. Nodes are only ever appended, so arena order is the
//!    breadth-first creation order that the serialized layout uses.
//! 2. Pointer width selection over the finished arena.
//! 3. Serialization of every node at its prefix-sum offset.

use std::collections::BTreeMap;

use crate::config::TrieConfig;
use crate::error::{Error, Result};
use crate::format::{
    bucket, fits_in, num_levels_for, write_be, Header, FORMAT_VERSION, HEADER_SIZE,
    MAX_POINTER_SIZE,
};

// =============================================================================
// Node arena
// =============================================================================

#[derive(Debug)]
enum Slots {
    /// Arena indices of child nodes, in ascending bucket order.
    Children(Vec<usize>),
    Values(Vec<u64>),
}

#[derive(Debug)]
struct ArenaNode {
    /// Bucket `i` present iff bit `i` is set.
    bitmap: u64,
    slots: Slots,
}

impl ArenaNode {
    fn new(terminal: bool) -> Self {
        Self {
            bitmap: 0,
            slots: if terminal {
                Slots::Values(Vec::new())
            } else {
                Slots::Children(Vec::new())
            },
        }
    }

    #[inline]
    fn len(&self) -> usize {
        match &self.slots {
            Slots::Children(c) => c.len(),
            Slots::Values(v) => v.len(),
        }
    }

    #[inline]
    fn last_child(&self) -> Option<usize> {
        match &self.slots {
            Slots::Children(c) => c.last().copied(),
            Slots::Values(_) => None,
        }
    }

    fn push_child(&mut self, bit: u64, child: usize) {
        debug_assert_eq!(self.bitmap & bit, 0);
        self.bitmap |= bit;
        match &mut self.slots {
            Slots::Children(c) => c.push(child),
            Slots::Values(_) => unreachable!("child pushed into terminal node"),
        }
    }

    fn push_value(&mut self, bit: u64, value: u64) {
        debug_assert_eq!(self.bitmap & bit, 0, "duplicate key reached level 0");
        self.bitmap |= bit;
        match &mut self.slots {
            Slots::Values(v) => v.push(value),
            Slots::Children(_) => unreachable!("value pushed into non-terminal node"),
        }
    }

    #[inline]
    fn byte_size(&self, bitmap_size: usize, pointer_size: usize, value_size: usize) -> u64 {
        debug_assert_eq!(self.bitmap.count_ones() as usize, self.len());
        let width = match self.slots {
            Slots::Children(_) => pointer_size,
            Slots::Values(_) => value_size,
        };
        (bitmap_size + self.len() * width) as u64
    }
}

/// Grows the arena level by level. `entries` must iterate in ascending key
/// order: a repeated bucket is resolved to the parent's most recent child,
/// which is only correct when keys sharing a prefix arrive consecutively.
fn sweep(entries: &BTreeMap<u64, u64>, num_levels: u8, shift: u32) -> Vec<ArenaNode> {
    let mut arena = vec![ArenaNode::new(num_levels == 1)];
    // Node each entry currently sits in, root to begin with.
    let mut cursors = vec![0usize; entries.len()];

    for level in (0..num_levels).rev() {
        for ((&key, &value), cursor) in entries.iter().zip(cursors.iter_mut()) {
            let bit = 1u64 << bucket(key, level, shift);

            if level == 0 {
                arena[*cursor].push_value(bit, value);
                continue;
            }

            let existing = {
                let node = &arena[*cursor];
                if node.bitmap & bit != 0 {
                    node.last_child()
                } else {
                    None
                }
            };
            let child = match existing {
                Some(child) => child,
                None => {
                    let child = arena.len();
                    arena.push(ArenaNode::new(level == 1));
                    arena[*cursor].push_child(bit, child);
                    child
                }
            };
            *cursor = child;
        }
    }

    arena
}

// =============================================================================
// Layout
// =============================================================================

/// Picks the pointer width for a structure whose total node size at width `w`
/// is `total_bytes(w)`: the forced width if given, else the narrowest width
/// whose address space covers every node offset.
fn select_pointer_size(
    forced: Option<usize>,
    total_bytes: impl Fn(usize) -> u64,
) -> Result<usize> {
    let candidates = match forced {
        Some(w) => w..=w,
        None => 1..=MAX_POINTER_SIZE,
    };

    let mut widest = (0u64, 0usize);
    for w in candidates {
        let bytes = total_bytes(w);
        if bytes <= 1u64 << (8 * w) {
            return Ok(w);
        }
        widest = (bytes, w);
    }
    Err(Error::Capacity {
        bytes: widest.0,
        pointer_size: widest.1,
    })
}

fn serialize(arena: &[ArenaNode], header: Header) -> Result<Vec<u8>> {
    let bitmap_size = header.bitmap_size as usize;
    let pointer_size = header.pointer_size as usize;
    let value_size = header.value_size as usize;

    let mut offsets = Vec::with_capacity(arena.len());
    let mut total = 0u64;
    for node in arena {
        offsets.push(total);
        total += node.byte_size(bitmap_size, pointer_size, value_size);
    }

    let mut out = Vec::with_capacity(HEADER_SIZE + total as usize);
    out.extend_from_slice(&header.encode()?);
    for node in arena {
        out.extend_from_slice(&node.bitmap.to_le_bytes()[..bitmap_size]);
        match &node.slots {
            Slots::Children(children) => {
                for &child in children {
                    write_be(&mut out, offsets[child], pointer_size);
                }
            }
            Slots::Values(values) => {
                for &value in values {
                    write_be(&mut out, value, value_size);
                }
            }
        }
    }
    debug_assert_eq!(out.len() as u64, HEADER_SIZE as u64 + total);
    Ok(out)
}

// =============================================================================
// TrieBuilder
// =============================================================================

/// Collects key/value pairs and serializes them into a packed trie.
///
/// Entries are kept sorted by key, so insertion order never affects the
/// output: building the same mapping twice yields identical bytes.
///
/// ```rust
/// use packed_hamt::{TrieBuilder, TrieConfig, TrieReader};
///
/// let mut builder = TrieBuilder::new(TrieConfig::new(1, 1)?);
/// builder.insert(8, 0x02)?;
/// builder.insert(0, 0x01)?;
/// let bytes = builder.build()?;
///
/// let reader = TrieReader::new(bytes.as_slice())?;
/// assert_eq!(reader.lookup(8)?, Some(0x02));
/// assert_eq!(reader.lookup(5)?, None);
/// # Ok::<(), packed_hamt::Error>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct TrieBuilder {
    config: TrieConfig,
    entries: BTreeMap<u64, u64>,
}

impl TrieBuilder {
    pub fn new(config: TrieConfig) -> Self {
        Self {
            config,
            entries: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &TrieConfig {
        &self.config
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Binds `key` to `value`, returning the value previously bound to `key`.
    ///
    /// # Errors
    ///
    /// Returns `Error::ValueTooWide` if `value` does not fit in the configured
    /// value size. The builder is left unchanged.
    pub fn insert(&mut self, key: u64, value: u64) -> Result<Option<u64>> {
        let value_size = self.config.value_size();
        if !fits_in(value, value_size) {
            return Err(Error::ValueTooWide {
                key,
                value,
                value_size,
            });
        }
        Ok(self.entries.insert(key, value))
    }

    /// Inserts every pair from `entries`, stopping at the first value that
    /// does not fit. Pairs before the failing one stay inserted.
    ///
    /// # Errors
    ///
    /// See [`TrieBuilder::insert`].
    pub fn try_extend<I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (u64, u64)>,
    {
        for (key, value) in entries {
            self.insert(key, value)?;
        }
        Ok(())
    }

    /// Serializes the collected entries.
    ///
    /// An empty builder produces a single-level trie whose root has no
    /// buckets set.
    ///
    /// # Errors
    ///
    /// Returns `Error::Capacity` if no permitted pointer width can address
    /// every node.
    pub fn build(&self) -> Result<Vec<u8>> {
        let shift = self.config.shift();
        let max_key = self.entries.keys().next_back().copied().unwrap_or(0);
        let num_levels = num_levels_for(max_key, shift);

        let arena = sweep(&self.entries, num_levels, shift);

        let bitmap_size = self.config.bitmap_size();
        let value_size = self.config.value_size();
        let pointer_size = select_pointer_size(self.config.pointer_size(), |w| {
            arena
                .iter()
                .map(|n| n.byte_size(bitmap_size, w, value_size))
                .sum()
        })?;

        let header = Header {
            version: FORMAT_VERSION,
            num_levels,
            bitmap_size: bitmap_size as u8,
            pointer_size: pointer_size as u8,
            value_size: value_size as u8,
        };
        let out = serialize(&arena, header)?;

        tracing::debug!(
            entries = self.entries.len(),
            num_levels,
            nodes = arena.len(),
            pointer_size,
            bytes = out.len(),
            "built packed trie"
        );
        Ok(out)
    }
}

/// Builds a packed trie from `entries` in one call. Later duplicates of a key
/// replace earlier ones.
///
/// # Errors
///
/// Returns `Error::ValueTooWide` or `Error::Capacity`, as
/// [`TrieBuilder::insert`] and [`TrieBuilder::build`] do.
pub fn build<I>(config: TrieConfig, entries: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (u64, u64)>,
{
    let mut builder = TrieBuilder::new(config);
    builder.try_extend(entries)?;
    builder.build()
}
