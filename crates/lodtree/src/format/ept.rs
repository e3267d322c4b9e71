//! Entwine Point Tile datasets: `ept.json`, JSON hierarchy documents and one
//! binary payload per node.

use glam::DVec3;
use lodtree_decode::{
    Aabb, ByteRange, ColorEncoding, DecodedHierarchy, NodeBounds, NodeKey, PointBuffer,
    PointLayout, decode_points, hierarchy,
};
use serde::Deserialize;
use serde_json::Value;

use super::{Chunk, ChunkRequest, HierarchyFormat, RootDescriptor, join_url, parse_metadata};
use crate::error::{Error, Result};

/// Points per axis of a node when `span` is absent.
const DEFAULT_SPAN: u32 = 128;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EptJson {
    bounds: [f64; 6],
    data_type: String,
    schema: Vec<Dimension>,
    #[serde(default)]
    span: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Dimension {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    size: usize,
    #[serde(default)]
    scale: Option<f64>,
    #[serde(default)]
    offset: Option<f64>,
}

/// Flat JSON hierarchy with per-node binary payloads.
#[derive(Debug, Clone)]
pub struct Ept {
    base_url: String,
    layout: PointLayout,
}

impl Ept {
    /// Parse `ept.json`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedSource`] if a required field is missing, the
    /// data type is not `binary`, or `X`, `Y` and `Z` are not consecutive
    /// 32-bit integers.
    pub fn from_metadata(base_url: &str, metadata: &Value) -> Result<(Self, RootDescriptor)> {
        let ept: EptJson = parse_metadata("ept.json", metadata)?;
        if ept.data_type != "binary" {
            return Err(Error::malformed(format!(
                "ept data type {} is not supported",
                ept.data_type
            )));
        }

        let mut offsets = Vec::with_capacity(ept.schema.len());
        let mut stride = 0;
        for dimension in &ept.schema {
            offsets.push(stride);
            stride += dimension.size;
        }
        let find = |name: &str| {
            ept.schema
                .iter()
                .position(|d| d.name == name)
                .map(|i| (&ept.schema[i], offsets[i]))
        };

        let (Some((x, x_offset)), Some((y, y_offset)), Some((z, z_offset))) =
            (find("X"), find("Y"), find("Z"))
        else {
            return Err(Error::malformed("ept schema lacks X, Y or Z"));
        };
        let integer = |d: &Dimension| d.kind == "signed" && d.size == 4;
        if !(integer(x) && integer(y) && integer(z))
            || y_offset != x_offset + 4
            || z_offset != x_offset + 8
        {
            return Err(Error::malformed(
                "ept positions must be consecutive signed 32-bit integers",
            ));
        }

        let mut layout = PointLayout::positions_only(
            DVec3::new(
                x.scale.unwrap_or(1.0),
                y.scale.unwrap_or(1.0),
                z.scale.unwrap_or(1.0),
            ),
            DVec3::new(
                x.offset.unwrap_or(0.0),
                y.offset.unwrap_or(0.0),
                z.offset.unwrap_or(0.0),
            ),
        );
        layout.stride = stride;
        layout.position_offset = x_offset;
        layout.intensity = find("Intensity")
            .filter(|(d, _)| d.size == 2)
            .map(|(_, offset)| offset);
        layout.classification = find("Classification")
            .filter(|(d, _)| d.size == 1)
            .map(|(_, offset)| offset);
        if let (Some((_, red)), Some((_, green)), Some((_, blue))) =
            (find("Red"), find("Green"), find("Blue"))
        {
            if green == red + 2 && blue == red + 4 {
                layout.color = Some(ColorEncoding::Rgb16 { offset: red });
            }
        }

        let [min_x, min_y, min_z, max_x, max_y, max_z] = ept.bounds;
        let span = ept.span.unwrap_or(DEFAULT_SPAN).max(1);
        let root = RootDescriptor {
            natural: Aabb::new(
                DVec3::new(min_x, min_y, min_z),
                DVec3::new(max_x, max_y, max_z),
            ),
            spacing: (max_x - min_x) / f64::from(span),
            page: None,
        };
        Ok((
            Self {
                base_url: base_url.to_string(),
                layout,
            },
            root,
        ))
    }
}

impl HierarchyFormat for Ept {
    fn name(&self) -> &'static str {
        "ept"
    }

    fn hierarchy_request(&self, key: NodeKey, _page: Option<ByteRange>) -> ChunkRequest {
        ChunkRequest::json(join_url(&self.base_url, &format!("ept-hierarchy/{key}.json")))
    }

    fn decode_hierarchy(&self, _key: NodeKey, chunk: Chunk) -> Result<DecodedHierarchy> {
        let decoded = match chunk {
            Chunk::Json(document) => hierarchy::ept::decode_document(&document)?,
            Chunk::Bytes(bytes) => hierarchy::ept::decode_bytes(&bytes)?,
        };
        Ok(decoded)
    }

    fn payload_request(&self, key: NodeKey, _payload: Option<ByteRange>) -> Result<ChunkRequest> {
        Ok(ChunkRequest::bytes(
            join_url(&self.base_url, &format!("ept-data/{key}.bin")),
            None,
        ))
    }

    fn decode_payload(&self, _key: NodeKey, bounds: &NodeBounds, bytes: &[u8]) -> Result<PointBuffer> {
        Ok(decode_points(bytes, &self.layout, bounds.natural.center())?)
    }
}
