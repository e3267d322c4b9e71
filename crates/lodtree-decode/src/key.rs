//! Node keys and the child doubling rule.

use std::fmt;

use crate::error::{DecodeError, DecodeResult};

/// Branching factor of a spatial tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arity {
    /// Quadtree (terrain tiles): 4 children, `z` is always 0.
    Quad,
    /// Octree (point clouds): 8 children.
    Oct,
}

impl Arity {
    /// Number of children a node of this tree can have.
    #[must_use]
    pub fn child_count(self) -> u8 {
        match self {
            Self::Quad => 4,
            Self::Oct => 8,
        }
    }
}

/// Position of a node in a spatial tree.
///
/// Children follow a fixed doubling rule: each coordinate of a child is
/// `2 * parent + offset`. Octant `o` maps to the offsets
/// `(o & 1, (o >> 1) & 1, (o >> 2) & 1)`, so octants enumerate
/// (-,-,-), (+,-,-), (-,+,-), (+,+,-), (-,-,+), (+,-,+), (-,+,+), (+,+,+).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub depth: u32,
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl NodeKey {
    /// The root of every tree.
    pub const ROOT: Self = Self {
        depth: 0,
        x: 0,
        y: 0,
        z: 0,
    };

    /// Create a key from its depth and per-axis indices.
    #[must_use]
    pub const fn new(depth: u32, x: u32, y: u32, z: u32) -> Self {
        Self { depth, x, y, z }
    }

    /// Key of the child in the given octant (quadrants use 0..4).
    ///
    /// Indices double per level, so this is only meaningful down to depth
    /// 32; past that the arithmetic overflows. Use
    /// [`checked_child`](Self::checked_child) for keys read off the wire.
    #[must_use]
    pub fn child(self, octant: u8) -> Self {
        debug_assert!(octant < 8, "octant {octant} out of range");
        Self {
            depth: self.depth + 1,
            x: self.x * 2 + u32::from(octant & 1),
            y: self.y * 2 + u32::from((octant >> 1) & 1),
            z: self.z * 2 + u32::from((octant >> 2) & 1),
        }
    }

    /// Like [`child`](Self::child), but `None` if the child's depth or any
    /// index does not fit in a `u32`.
    #[must_use]
    pub fn checked_child(self, octant: u8) -> Option<Self> {
        debug_assert!(octant < 8, "octant {octant} out of range");
        let double = |v: u32, bit: u8| v.checked_mul(2)?.checked_add(u32::from(bit & 1));
        Some(Self {
            depth: self.depth.checked_add(1)?,
            x: double(self.x, octant)?,
            y: double(self.y, octant >> 1)?,
            z: double(self.z, octant >> 2)?,
        })
    }

    /// Key of the parent, or `None` for the root.
    #[must_use]
    pub fn parent(self) -> Option<Self> {
        if self.depth == 0 {
            return None;
        }
        Some(Self {
            depth: self.depth - 1,
            x: self.x / 2,
            y: self.y / 2,
            z: self.z / 2,
        })
    }

    /// Octant of this node inside its parent.
    #[must_use]
    pub fn octant(self) -> u8 {
        #[allow(clippy::cast_possible_truncation)]
        let octant = ((self.x & 1) | ((self.y & 1) << 1) | ((self.z & 1) << 2)) as u8;
        octant
    }

    /// Whether `self` lies in the subtree rooted at `ancestor` (inclusive).
    #[must_use]
    pub fn is_descendant_of(self, ancestor: Self) -> bool {
        if self.depth < ancestor.depth {
            return false;
        }
        let shift = self.depth - ancestor.depth;
        self.x >> shift == ancestor.x && self.y >> shift == ancestor.y && self.z >> shift == ancestor.z
    }

    /// Parse an Entwine key of the form `D-X-Y-Z`.
    pub fn parse_ept(key: &str) -> DecodeResult<Self> {
        let invalid = || DecodeError::InvalidKey {
            key: key.to_string(),
        };
        let mut parts = key.split('-').map(str::parse::<u32>);
        let mut next = || -> DecodeResult<u32> {
            parts.next().ok_or_else(invalid)?.map_err(|_| invalid())
        };
        let parsed = Self::new(next()?, next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(parsed)
    }

    /// Potree node name: one digit per level below the root, using the
    /// Potree octant numbering (`x` is bit 2, `y` bit 1, `z` bit 0).
    #[must_use]
    pub fn potree_name(self) -> String {
        (1..=self.depth)
            .map(|level| {
                let shift = self.depth - level;
                let digit = (((self.x >> shift) & 1) << 2)
                    | (((self.y >> shift) & 1) << 1)
                    | ((self.z >> shift) & 1);
                #[allow(clippy::cast_possible_truncation)]
                char::from(b'0' + digit as u8)
            })
            .collect()
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}-{}", self.depth, self.x, self.y, self.z)
    }
}

/// Map a Potree child-mask bit to the canonical octant.
///
/// Potree numbers children with `x` in bit 2 and `z` in bit 0, the reverse
/// of the canonical order.
#[must_use]
pub(crate) fn potree_bit_to_octant(bit: u8) -> u8 {
    ((bit >> 2) & 1) | (bit & 2) | ((bit & 1) << 2)
}
