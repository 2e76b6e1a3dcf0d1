//! # packed-hamt
//!
//! A static, bitmap-indexed radix trie from `u64` keys to fixed-width integer
//! values, serialized into one compact, self-describing byte buffer.
//!
//! Each node is a presence bitmap followed by a dense array of child pointers
//! or values. A query never decodes the structure: it descends from the root,
//! using the popcount rank of the key's bucket bit to locate the next slot.
//!
//! The structure is build-once. [`TrieBuilder`] collects entries and emits the
//! buffer; [`TrieReader`] answers queries against any byte container holding
//! it. Persisting or transmitting the buffer is left to the caller.
//!
//! ## Example
//!
//! ```rust
//! use packed_hamt::{TrieBuilder, TrieConfig, TrieReader};
//!
//! // 16-way nodes, 2-byte values.
//! let mut builder = TrieBuilder::new(TrieConfig::new(2, 2)?);
//! builder.insert(1_000, 7)?;
//! builder.insert(42, 0xBEEF)?;
//! let bytes = builder.build()?;
//!
//! let reader = TrieReader::new(bytes)?;
//! assert_eq!(reader.lookup(42)?, Some(0xBEEF));
//! assert_eq!(reader.lookup(43)?, None);
//! assert!(reader.exists(1_000)?);
//! # Ok::<(), packed_hamt::Error>(())
//! ```

#![deny(unsafe_code)]

pub mod builder;
pub mod config;
pub mod error;
pub mod format;
pub mod reader;

pub use builder::{build, TrieBuilder};
pub use config::TrieConfig;
pub use error::{Error, ErrorKind, Result};
pub use format::Header;
pub use reader::{Iter, TrieReader};


#[cfg(test)]
mod proptests;
