//! Coordinate reference system hook.

use glam::DVec3;

/// Maps a dataset's natural coordinates into the output (world) space.
///
/// Child subdivision always happens in natural coordinates; only the world
/// bounds used for culling and distance go through the transform.
pub trait CrsTransform: Send + Sync {
    fn to_world(&self, natural: DVec3) -> DVec3;
}

/// The dataset is already in world coordinates.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl CrsTransform for Identity {
    fn to_world(&self, natural: DVec3) -> DVec3 {
        natural
    }
}

/// Uniform translation, useful to move a dataset next to the origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Translate(pub DVec3);

impl CrsTransform for Translate {
    fn to_world(&self, natural: DVec3) -> DVec3 {
        natural + self.0
    }
}
