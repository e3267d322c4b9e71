//! Per-dataset hierarchy formats.
//!
//! A [`HierarchyFormat`] knows where the hierarchy chunk and the payload of
//! a node live and how to decode them. The loader stays format-neutral: it
//! asks for a request, hands it to the fetcher, and feeds the answer back.

use lodtree_decode::{Aabb, Arity, ByteRange, DecodedHierarchy, NodeBounds, NodeKey, PointBuffer};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

pub mod ept;
pub mod potree;
pub mod potree2;

pub use ept::Ept;
pub use potree::Potree;
pub use potree2::Potree2;

/// How a chunk must be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Bytes,
    Json,
}

/// A remote chunk to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub url: String,
    pub range: Option<ByteRange>,
    pub kind: ChunkKind,
}

impl ChunkRequest {
    #[must_use]
    pub fn bytes(url: String, range: Option<ByteRange>) -> Self {
        Self {
            url,
            range,
            kind: ChunkKind::Bytes,
        }
    }

    #[must_use]
    pub fn json(url: String) -> Self {
        Self {
            url,
            range: None,
            kind: ChunkKind::Json,
        }
    }
}

/// A fetched chunk.
#[derive(Debug, Clone)]
pub enum Chunk {
    Bytes(Vec<u8>),
    Json(Value),
}

/// Root of a dataset as described by its metadata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootDescriptor {
    /// Bounding box in natural coordinates.
    pub natural: Aabb,
    /// Average distance between points at the root level.
    pub spacing: f64,
    /// Location of the root hierarchy chunk, for clustered layouts.
    pub page: Option<ByteRange>,
}

/// Capability of one hierarchy format.
pub trait HierarchyFormat: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn arity(&self) -> Arity {
        Arity::Oct
    }

    /// Where the hierarchy chunk rooted at `key` lives. `page` is the
    /// location recorded for the node when its parent's chunk was decoded.
    fn hierarchy_request(&self, key: NodeKey, page: Option<ByteRange>) -> ChunkRequest;

    /// Decode a chunk whose root is `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk has the wrong kind or fails to decode.
    fn decode_hierarchy(&self, key: NodeKey, chunk: Chunk) -> Result<DecodedHierarchy>;

    /// Where the payload of `key` lives.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllFormedData`] if the format locates payloads by byte
    /// range and the node has none.
    fn payload_request(&self, key: NodeKey, payload: Option<ByteRange>) -> Result<ChunkRequest>;

    /// Decode the payload of a node. Positions are rebased on the center of
    /// the node's natural box.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match the dataset's layout.
    fn decode_payload(&self, key: NodeKey, bounds: &NodeBounds, bytes: &[u8]) -> Result<PointBuffer>;
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    if base.is_empty() {
        return path.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

pub(crate) fn parse_metadata<T: DeserializeOwned>(format: &str, metadata: &Value) -> Result<T> {
    if metadata.is_null() {
        return Err(Error::malformed(format!("{format}: missing root descriptor")));
    }
    T::deserialize(metadata).map_err(|e| Error::malformed(format!("{format}: {e}")))
}

pub(crate) fn expect_bytes(format: &str, chunk: Chunk) -> Result<Vec<u8>> {
    match chunk {
        Chunk::Bytes(bytes) => Ok(bytes),
        Chunk::Json(_) => Err(Error::Logic {
            detail: format!("{format} hierarchy chunks are binary"),
        }),
    }
}
