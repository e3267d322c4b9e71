//! Bounding volumes of tree nodes.

use glam::{DMat3, DVec3};

use crate::key::Arity;

/// Axis-aligned box in the dataset's natural coordinate space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    /// Create a box from its corners.
    #[must_use]
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    #[must_use]
    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    /// Box of the child in the given octant.
    ///
    /// Quadtrees split `x` and `y` only and keep the full vertical extent.
    #[must_use]
    pub fn child(&self, octant: u8, arity: Arity) -> Self {
        let half = self.size() * 0.5;
        let mut min = self.min;
        if octant & 1 != 0 {
            min.x += half.x;
        }
        if octant & 2 != 0 {
            min.y += half.y;
        }
        let (min_z, size_z) = match arity {
            Arity::Oct if octant & 4 != 0 => (min.z + half.z, half.z),
            Arity::Oct => (min.z, half.z),
            Arity::Quad => (min.z, self.size().z),
        };
        min.z = min_z;
        let max = DVec3::new(min.x + half.x, min.y + half.y, min.z + size_z);
        Self { min, max }
    }

    /// Whether `other` lies entirely inside this box.
    #[must_use]
    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.cmple(other.min).all() && self.max.cmpge(other.max).all()
    }

    #[must_use]
    pub fn corners(&self) -> [DVec3; 8] {
        std::array::from_fn(|i| {
            DVec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            )
        })
    }
}

/// Box aligned to a local frame rather than to the world axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedBox {
    /// Center in world space.
    pub center: DVec3,
    /// Half sizes along each local axis.
    pub extents: DVec3,
    /// Columns are the local axes in world space.
    pub orientation: DMat3,
}

impl OrientedBox {
    /// World box enclosing `natural` once every corner is mapped through
    /// `to_world`.
    #[must_use]
    pub fn enclosing(natural: &Aabb, to_world: impl Fn(DVec3) -> DVec3) -> Self {
        let corners = natural.corners().map(to_world);
        let (min, max) = corners[1..]
            .iter()
            .fold((corners[0], corners[0]), |(min, max), &c| {
                (min.min(c), max.max(c))
            });
        Self {
            center: (min + max) * 0.5,
            extents: (max - min) * 0.5,
            orientation: DMat3::IDENTITY,
        }
    }

    /// Test if a world-space point lies inside the box.
    #[must_use]
    pub fn contains_point(&self, point: DVec3) -> bool {
        let local = self.orientation.transpose() * (point - self.center);
        local.abs().cmple(self.extents + DVec3::splat(1e-9)).all()
    }
}

/// Complete bounding volume of a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeBounds {
    /// Box in the dataset's natural coordinates; drives subdivision.
    pub natural: Aabb,
    /// Box in the output (world) coordinates; used for culling and distance.
    pub world: OrientedBox,
    /// Vertical range, refined as elevation or point data arrives.
    pub min_z: f64,
    pub max_z: f64,
}

impl NodeBounds {
    #[must_use]
    pub fn new(natural: Aabb, to_world: impl Fn(DVec3) -> DVec3) -> Self {
        Self {
            world: OrientedBox::enclosing(&natural, to_world),
            min_z: natural.min.z,
            max_z: natural.max.z,
            natural,
        }
    }

    /// Bounds of the child in the given octant.
    #[must_use]
    pub fn child(&self, octant: u8, arity: Arity, to_world: impl Fn(DVec3) -> DVec3) -> Self {
        Self::new(self.natural.child(octant, arity), to_world)
    }

    /// Natural-space containment, the invariant every parent keeps over its
    /// children.
    #[must_use]
    pub fn contains(&self, other: &NodeBounds) -> bool {
        self.natural.contains(&other.natural)
            && self.min_z <= other.min_z
            && self.max_z >= other.max_z
    }

    /// Widen the vertical range. Returns `true` if anything changed.
    pub fn expand_vertical(&mut self, min_z: f64, max_z: f64) -> bool {
        let changed = min_z < self.min_z || max_z > self.max_z;
        self.min_z = self.min_z.min(min_z);
        self.max_z = self.max_z.max(max_z);
        changed
    }
}
