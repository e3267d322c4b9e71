//! Potree 2 datasets: `metadata.json`, `hierarchy.bin` and `octree.bin`.

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
struct Metadata {
    hierarchy: HierarchyInfo,
    bounding_box: BoundingBox,
    scale: [f64; 3],
    offset: [f64; 3],
    spacing: f64,
    #[serde(default)]
    encoding: Option<String>,
    attributes: Vec<Attribute>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HierarchyInfo {
    first_chunk_size: u64,
}

#[derive(Debug, Deserialize)]
struct BoundingBox {
    min: [f64; 3],
    max: [f64; 3],
}

#[derive(Debug, Deserialize)]
struct Attribute {
    name: String,
    size: usize,
}

/// Clustered octree with a side hierarchy file.
#[derive(Debug, Clone)]
pub struct Potree2 {
    base_url: String,
    layout: PointLayout,
}

impl Potree2 {
    /// Parse `metadata.json`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedSource`] if a required field is missing, the
    /// attributes lack a position, or the payload encoding is not `DEFAULT`.
    pub fn from_metadata(base_url: &str, metadata: &Value) -> Result<(Self, RootDescriptor)> {
        let metadata: Metadata = parse_metadata("potree2 metadata", metadata)?;

        let encoding = metadata.encoding.as_deref().unwrap_or("DEFAULT");
        if !encoding.eq_ignore_ascii_case("DEFAULT") {
            return Err(Error::malformed(format!(
                "potree2 encoding {encoding} is not supported"
            )));
        }

        let mut layout = PointLayout::positions_only(
            DVec3::from_array(metadata.scale),
            DVec3::from_array(metadata.offset),
        );
        let mut offset = 0;
        let mut has_position = false;
        for attribute in &metadata.attributes {
            match attribute.name.to_ascii_lowercase().as_str() {
                "position" => {
                    layout.position_offset = offset;
                    has_position = true;
                }
                "rgb" => layout.color = Some(ColorEncoding::Rgb16 { offset }),
                "rgba" => layout.color = Some(ColorEncoding::Rgba8 { offset }),
                "intensity" => layout.intensity = Some(offset),
                "classification" => layout.classification = Some(offset),
                _ => {}
            }
            offset += attribute.size;
        }
        if !has_position {
            return Err(Error::malformed("potree2 attributes lack a position"));
        }
        layout.stride = offset;

        let root = RootDescriptor {
            natural: Aabb::new(
                DVec3::from_array(metadata.bounding_box.min),
                DVec3::from_array(metadata.bounding_box.max),
            ),
            spacing: metadata.spacing,
            page: Some(ByteRange::new(0, metadata.hierarchy.first_chunk_size)),
        };
        Ok((
            Self {
                base_url: base_url.to_string(),
                layout,
            },
            root,
        ))
    }

    #[must_use]
    pub fn layout(&self) -> &PointLayout {
        &self.layout
    }
}

impl HierarchyFormat for Potree2 {
    fn name(&self) -> &'static str {
        "potree2"
    }

    fn hierarchy_request(&self, _key: NodeKey, page: Option<ByteRange>) -> ChunkRequest {
        ChunkRequest::bytes(join_url(&self.base_url, "hierarchy.bin"), page)
    }

    fn decode_hierarchy(&self, key: NodeKey, chunk: Chunk) -> Result<DecodedHierarchy> {
        let bytes = expect_bytes(self.name(), chunk)?;
        Ok(hierarchy::potree2::decode_chunk(&bytes, key)?)
    }

    fn payload_request(&self, key: NodeKey, payload: Option<ByteRange>) -> Result<ChunkRequest> {
        let Some(range) = payload else {
            return Err(Error::IllFormedData {
                key,
                detail: "node has no byte range in octree.bin".to_string(),
            });
        };
        Ok(ChunkRequest::bytes(join_url(&self.base_url, "octree.bin"), Some(range)))
    }

    fn decode_payload(&self, _key: NodeKey, bounds: &NodeBounds, bytes: &[u8]) -> Result<PointBuffer> {
        Ok(decode_points(bytes, &self.layout, bounds.natural.center())?)
    }
}
