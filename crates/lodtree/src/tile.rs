//! Terrain tile geometry built through the shared cache.
//!
//! A tile's grid splits into two parts. Index and UV buffers depend only on
//! the resolution and are built once and kept forever. Positions and
//! normals depend on the tile's latitude band, so tiles of the same band
//! share them through a [`SharedGeometryCache`] and are placed by rotating
//! about the polar axis by [`TileMesh::longitude`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lodtree_decode::NodeBounds;
use lodtree_decode::grid::{
    BandShape, IndexUvBuffers, PositionNormalBuffers, band_position_normal, grid_index_uv,
};
use parking_lot::Mutex;

use crate::error::Result;
use crate::geometry_cache::{CachedGeometry, Disposable, Release, SharedGeometryCache};

/// Produces grid buffers.
pub trait GeometryBuilder: Send + Sync + 'static {
    /// Identifier of the builder, part of every cache signature.
    fn build_id(&self) -> &str;

    fn build_index_uv(&self, resolution: u32) -> IndexUvBuffers;

    fn build_position_normal(&self, shape: &BandShape, resolution: u32) -> PositionNormalBuffers;
}

/// Grids laid on a sphere.
#[derive(Debug, Clone, Copy, Default)]
pub struct SphereBandBuilder;

impl GeometryBuilder for SphereBandBuilder {
    fn build_id(&self) -> &str {
        "sphere"
    }

    fn build_index_uv(&self, resolution: u32) -> IndexUvBuffers {
        grid_index_uv(resolution)
    }

    fn build_position_normal(&self, shape: &BandShape, resolution: u32) -> PositionNormalBuffers {
        band_position_normal(shape, resolution)
    }
}

/// Shared position and normal buffers of one latitude band.
#[derive(Debug)]
pub struct BandGeometry {
    buffers: PositionNormalBuffers,
    disposed: AtomicBool,
}

impl BandGeometry {
    #[must_use]
    pub fn new(buffers: PositionNormalBuffers) -> Self {
        Self {
            buffers,
            disposed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn buffers(&self) -> &PositionNormalBuffers {
        &self.buffers
    }

    /// Whether the renderer must drop its copy of these buffers.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Disposable for BandGeometry {
    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

/// Geometry installed on one tile.
#[derive(Debug, Clone)]
pub struct TileMesh {
    pub index_uv: Arc<IndexUvBuffers>,
    pub band: CachedGeometry<BandGeometry>,
    /// Rotation about the polar axis that places the band, in radians.
    pub longitude: f64,
}

/// Builds and shares tile geometry.
///
/// Tile bounds are read in natural coordinates as (longitude, latitude,
/// height) in radians.
pub struct TileGeometryBuilder<B = SphereBandBuilder> {
    builder: Arc<B>,
    radius: f64,
    index_uv: Mutex<HashMap<(String, u32), Arc<IndexUvBuffers>>>,
    cache: Arc<SharedGeometryCache<BandGeometry>>,
}

impl<B: GeometryBuilder> TileGeometryBuilder<B> {
    #[must_use]
    pub fn new(builder: B, radius: f64, cache: Arc<SharedGeometryCache<BandGeometry>>) -> Self {
        Self {
            builder: Arc::new(builder),
            radius,
            index_uv: Mutex::new(HashMap::new()),
            cache,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<SharedGeometryCache<BandGeometry>> {
        &self.cache
    }

    /// Shape of a tile, starting at longitude 0.
    #[must_use]
    pub fn band_shape(&self, bounds: &NodeBounds) -> BandShape {
        let natural = &bounds.natural;
        BandShape {
            south: natural.min.y,
            north: natural.max.y,
            width: natural.size().x,
            radius: self.radius,
        }
    }

    /// Cache signature of the position and normal buffers of a shape.
    #[must_use]
    pub fn signature(&self, shape: &BandShape, resolution: u32) -> String {
        format!(
            "{}_{}_{resolution}",
            self.builder.build_id(),
            quantized_band(shape)
        )
    }

    /// Index and UV buffers for `resolution`, built on first use.
    pub fn index_uv(&self, resolution: u32) -> Arc<IndexUvBuffers> {
        let key = (self.builder.build_id().to_string(), resolution);
        let mut index_uv = self.index_uv.lock();
        Arc::clone(
            index_uv
                .entry(key)
                .or_insert_with(|| Arc::new(self.builder.build_index_uv(resolution))),
        )
    }

    /// Build (or share) the mesh of a tile and take a reference on its band
    /// geometry. Pair with [`release`](Self::release).
    ///
    /// # Errors
    ///
    /// Returns an error if the shared build failed or its entry was disposed
    /// before the reference could be taken.
    pub async fn build(&self, bounds: &NodeBounds, resolution: u32) -> Result<TileMesh> {
        let shape = self.band_shape(bounds);
        let signature = self.signature(&shape, resolution);
        let builder = Arc::clone(&self.builder);
        let band = self
            .cache
            .get_or_build(&signature, move || async move {
                Ok(BandGeometry::new(
                    builder.build_position_normal(&shape, resolution),
                ))
            })
            .await?;
        self.cache.increase_ref_count(band.entry())?;

        Ok(TileMesh {
            index_uv: self.index_uv(resolution),
            band,
            longitude: bounds.natural.min.x,
        })
    }

    /// Drop the tile's reference on its band geometry.
    pub fn release(&self, mesh: &TileMesh) -> Release {
        self.cache.release(mesh.band.entry())
    }
}

/// Band edges and width in whole microradians, so float noise in tile
/// bounds does not split the cache.
fn quantized_band(shape: &BandShape) -> String {
    #[allow(clippy::cast_possible_truncation)]
    let q = |radians: f64| (radians * 1e6).round() as i64;
    format!("{}:{}:{}", q(shape.south), q(shape.north), q(shape.width))
}
