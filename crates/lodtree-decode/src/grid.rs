//! Regular grid geometry for terrain tiles.
//!
//! A tile of `resolution × resolution` quads has `(resolution + 1)²`
//! vertices. Index and UV buffers depend only on the resolution. Positions
//! and normals depend on the tile's latitude band and angular width but not
//! on its longitude, so every tile of a band can share them and be placed by
//! a rotation about the polar axis.

use glam::{DVec3, Vec2, Vec3};

/// Position-independent buffers of a grid.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexUvBuffers {
    /// Triangle list, counter-clockwise seen from outside.
    pub indices: Vec<u32>,
    pub uvs: Vec<Vec2>,
}

/// Shape-dependent buffers of a grid.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionNormalBuffers {
    /// World position the `positions` are relative to.
    pub origin: DVec3,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
}

/// Angular footprint of a tile on a sphere, in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandShape {
    pub south: f64,
    pub north: f64,
    /// Longitude span; the tile starts at longitude 0.
    pub width: f64,
    pub radius: f64,
}

/// Build the index and UV buffers of a grid.
#[must_use]
pub fn grid_index_uv(resolution: u32) -> IndexUvBuffers {
    let resolution = resolution.max(1);
    let row = resolution + 1;
    let mut uvs = Vec::with_capacity((row * row) as usize);
    for j in 0..row {
        for i in 0..row {
            #[allow(clippy::cast_precision_loss)]
            uvs.push(Vec2::new(i as f32 / resolution as f32, j as f32 / resolution as f32));
        }
    }

    let mut indices = Vec::with_capacity((resolution * resolution * 6) as usize);
    for j in 0..resolution {
        for i in 0..resolution {
            let a = j * row + i;
            let b = a + 1;
            let c = a + row;
            let d = c + 1;
            indices.extend_from_slice(&[a, b, d, a, d, c]);
        }
    }

    IndexUvBuffers { indices, uvs }
}

/// Build positions and normals of a grid laid on a sphere.
#[must_use]
pub fn band_position_normal(shape: &BandShape, resolution: u32) -> PositionNormalBuffers {
    let resolution = resolution.max(1);
    let row = resolution + 1;
    let on_sphere = |lon: f64, lat: f64| {
        DVec3::new(lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin())
    };

    let origin = on_sphere(shape.width * 0.5, (shape.south + shape.north) * 0.5) * shape.radius;
    let mut positions = Vec::with_capacity((row * row) as usize);
    let mut normals = Vec::with_capacity((row * row) as usize);
    for j in 0..row {
        let lat = shape.south + (shape.north - shape.south) * f64::from(j) / f64::from(resolution);
        for i in 0..row {
            let lon = shape.width * f64::from(i) / f64::from(resolution);
            let normal = on_sphere(lon, lat);
            positions.push((normal * shape.radius - origin).as_vec3());
            normals.push(normal.as_vec3());
        }
    }

    PositionNormalBuffers {
        origin,
        positions,
        normals,
    }
}
