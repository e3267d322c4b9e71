//! Potree 1 datasets: `cloud.js` with one `.hrc` and one `.bin` per node.

use glam::DVec3;
use lodtree_decode::{
    Aabb, ByteRange, ColorEncoding, DecodedHierarchy, NodeBounds, NodeKey, PointBuffer,
    PointLayout, decode_points, hierarchy,
};
use serde::Deserialize;
use serde_json::Value;

use super::{
    Chunk, ChunkRequest, HierarchyFormat, RootDescriptor, expect_bytes, join_url, parse_metadata,
};
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloudJs {
    octree_dir: String,
    hierarchy_step_size: u32,
    bounding_box: LegacyBox,
    point_attributes: Value,
    spacing: f64,
    scale: f64,
}

#[derive(Debug, Deserialize)]
struct LegacyBox {
    lx: f64,
    ly: f64,
    lz: f64,
    ux: f64,
    uy: f64,
    uz: f64,
}

/// Byte size of a Potree 1 point attribute.
fn attribute_size(name: &str) -> Option<usize> {
    Some(match name {
        "POSITION_CARTESIAN" | "NORMAL" | "NORMAL_FLOATS" => 12,
        "COLOR_PACKED" => 4,
        "INTENSITY" | "NORMAL_SPHEREMAPPED" | "NORMAL_OCT16" | "SOURCE_ID" => 2,
        "CLASSIFICATION" | "RETURN_NUMBER" | "NUMBER_OF_RETURNS" => 1,
        "GPS_TIME" => 8,
        _ => return None,
    })
}

/// Paged binary hierarchy with per-node files.
#[derive(Debug, Clone)]
pub struct Potree {
    octree_url: String,
    step: u32,
    layout: PointLayout,
}

impl Potree {
    /// Parse `cloud.js`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedSource`] if a required field is missing, the
    /// step size is zero, or the points are stored as LAS/LAZ or with an
    /// unknown attribute.
    pub fn from_metadata(base_url: &str, metadata: &Value) -> Result<(Self, RootDescriptor)> {
        let cloud: CloudJs = parse_metadata("potree cloud.js", metadata)?;
        if cloud.hierarchy_step_size == 0 {
            return Err(Error::malformed("potree hierarchyStepSize must be positive"));
        }

        let Some(attributes) = cloud.point_attributes.as_array() else {
            return Err(Error::malformed(format!(
                "potree point attributes {} are not supported",
                cloud.point_attributes
            )));
        };

        // Positions are unsigned offsets from the node's own box minimum; the
        // offset is filled in per node.
        let mut layout = PointLayout::positions_only(DVec3::splat(cloud.scale), DVec3::ZERO);
        let mut offset = 0;
        let mut has_position = false;
        for attribute in attributes {
            let Some(name) = attribute.as_str() else {
                return Err(Error::malformed("potree point attribute is not a string"));
            };
            let Some(size) = attribute_size(name) else {
                return Err(Error::malformed(format!(
                    "potree point attribute {name} is not supported"
                )));
            };
            match name {
                "POSITION_CARTESIAN" => {
                    layout.position_offset = offset;
                    has_position = true;
                }
                "COLOR_PACKED" => layout.color = Some(ColorEncoding::Rgba8 { offset }),
                "INTENSITY" => layout.intensity = Some(offset),
                "CLASSIFICATION" => layout.classification = Some(offset),
                _ => {}
            }
            offset += size;
        }
        if !has_position {
            return Err(Error::malformed("potree point attributes lack a position"));
        }
        layout.stride = offset;

        let b = &cloud.bounding_box;
        let root = RootDescriptor {
            natural: Aabb::new(DVec3::new(b.lx, b.ly, b.lz), DVec3::new(b.ux, b.uy, b.uz)),
            spacing: cloud.spacing,
            page: None,
        };
        Ok((
            Self {
                octree_url: join_url(base_url, &cloud.octree_dir),
                step: cloud.hierarchy_step_size,
                layout,
            },
            root,
        ))
    }

    #[must_use]
    pub fn step(&self) -> u32 {
        self.step
    }

    fn node_url(&self, key: NodeKey, extension: &str) -> String {
        let name = key.potree_name();
        let path = hierarchy::potree::hierarchy_path(&name, self.step);
        join_url(&self.octree_url, &format!("r/{path}r{name}.{extension}"))
    }
}

impl HierarchyFormat for Potree {
    fn name(&self) -> &'static str {
        "potree"
    }

    fn hierarchy_request(&self, key: NodeKey, _page: Option<ByteRange>) -> ChunkRequest {
        ChunkRequest::bytes(self.node_url(key, "hrc"), None)
    }

    fn decode_hierarchy(&self, key: NodeKey, chunk: Chunk) -> Result<DecodedHierarchy> {
        let bytes = expect_bytes(self.name(), chunk)?;
        Ok(hierarchy::potree::decode_chunk(&bytes, key, self.step)?)
    }

    fn payload_request(&self, key: NodeKey, _payload: Option<ByteRange>) -> Result<ChunkRequest> {
        Ok(ChunkRequest::bytes(self.node_url(key, "bin"), None))
    }

    fn decode_payload(&self, _key: NodeKey, bounds: &NodeBounds, bytes: &[u8]) -> Result<PointBuffer> {
        let layout = PointLayout {
            offset: bounds.natural.min,
            ..self.layout.clone()
        };
        Ok(decode_points(bytes, &layout, bounds.natural.center())?)
    }
}
