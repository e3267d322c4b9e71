//! Hierarchy chunk decoding.
//!
//! A hierarchy chunk describes the existence, point count and payload
//! location of a block of nodes. Every format decodes into a
//! [`DecodedHierarchy`]; nodes whose own subtree lives in a further chunk are
//! reported as [`HierarchyEntry::Page`].

use std::collections::HashMap;

use crate::error::{DecodeError, DecodeResult};
use crate::key::NodeKey;

pub mod ept;
pub mod potree;
pub mod potree2;

/// Half-open byte range `[start, end)` inside a remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Create a range from an offset and a length. The end saturates at
    /// `u64::MAX`; use [`checked`](Self::checked) for values read off the
    /// wire.
    #[must_use]
    pub fn new(offset: u64, length: u64) -> Self {
        Self {
            start: offset,
            end: offset.saturating_add(length),
        }
    }

    /// Create a range from a decoded offset and length.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidFormat`] if the end does not fit in a
    /// `u64`.
    pub fn checked(offset: u64, length: u64) -> DecodeResult<Self> {
        let end = offset.checked_add(length).ok_or_else(|| DecodeError::InvalidFormat {
            context: "byte range",
            detail: format!("offset {offset} plus length {length} overflows"),
        })?;
        Ok(Self { start: offset, end })
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Value of an HTTP `Range` header for this range (inclusive end).
    #[must_use]
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }
}

/// One decoded hierarchy record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyEntry {
    /// A node whose count and payload location are known.
    Node {
        /// Number of points or features.
        count: u64,
        /// Byte range of the payload for clustered layouts; `None` when the
        /// payload lives in a per-node file addressed by key.
        payload: Option<ByteRange>,
    },
    /// A node whose own hierarchy must be loaded before it can be used.
    Page {
        /// Byte range of the chunk for clustered layouts; `None` when the
        /// chunk lives in a per-node file addressed by key.
        page: Option<ByteRange>,
        /// Whether the node declares any children at all.
        has_children: bool,
    },
}

/// Decoded content of one hierarchy chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedHierarchy {
    entries: HashMap<NodeKey, HierarchyEntry>,
}

impl DecodedHierarchy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: NodeKey, entry: HierarchyEntry) {
        self.entries.insert(key, entry);
    }

    #[must_use]
    pub fn get(&self, key: &NodeKey) -> Option<&HierarchyEntry> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &NodeKey) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeKey, &HierarchyEntry)> {
        self.entries.iter()
    }
}

impl FromIterator<(NodeKey, HierarchyEntry)> for DecodedHierarchy {
    fn from_iter<I: IntoIterator<Item = (NodeKey, HierarchyEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
