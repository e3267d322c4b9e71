//! Decode hierarchy pages and point payloads of streamed spatial datasets.
//!
//! This crate provides pure synchronous decoding for the wire formats used by
//! large point cloud and terrain datasets that are fetched piece by piece.
//! All functions can be called from any threading context; the engine
//! decides where decoding runs.
//!
//! # Design principles
//!
//! - **Synchronous**: No async, no threading primitives
//! - **Format-neutral output**: Every hierarchy format decodes into the same
//!   [`DecodedHierarchy`] map keyed by [`NodeKey`]
//! - **Web-compatible**: Compiles to WASM
//!
//! # Formats
//!
//! - [`hierarchy::potree2`]: clustered octree with a side `hierarchy.bin`
//! - [`hierarchy::potree`]: paged binary `.hrc` files, one file per node
//! - [`hierarchy::ept`]: flat JSON hierarchy documents

mod bounds;
mod error;
pub mod grid;
pub mod hierarchy;
mod key;
mod points;

pub use bounds::{Aabb, NodeBounds, OrientedBox};
pub use error::{DecodeError, DecodeResult};
pub use hierarchy::{ByteRange, DecodedHierarchy, HierarchyEntry};
pub use key::{Arity, NodeKey};
pub use points::{ColorEncoding, PointBuffer, PointLayout, decode_points};
