//! Level-of-detail streaming and caching for large spatial datasets.
//!
//! This crate loads octree and quadtree datasets lazily: the tree starts as
//! a single unloaded root, hierarchy chunks are fetched as the view demands,
//! and node payloads are requested one level at a time. Failed requests are
//! retried on a fixed backoff schedule, and geometry shared between tiles is
//! reference counted in a bounded cache.
//!
//! # Design principles
//!
//! - **Web-compatible**: Works on desktop and WASM via reqwest
//! - **Runtime-agnostic**: Futures are plain boxed futures, any executor works
//! - **Sync decoding**: Wire decoding lives in `lodtree-decode` and never awaits
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use lodtree::{HierarchyLoader, HttpFetcher, Identity, PointCloudStreamer, Source, StreamConfig};
//!
//! let fetcher = Arc::new(HttpFetcher::new());
//! let source = Source::from_metadata_url("https://example.com/cloud/ept.json")?;
//! let dataset = source.open(fetcher.as_ref(), Arc::new(Identity)).await?;
//!
//! let loader = HierarchyLoader::new(fetcher, dataset.format, dataset.tree);
//! let mut streamer = PointCloudStreamer::new(loader, dataset.spacing, &StreamConfig::default());
//! let root = streamer.loader().tree().lock().root();
//! streamer.step(root, &view, web_time::Instant::now()).await?;
//! ```

pub mod config;
pub mod crs;
mod error;
pub mod fetch;
pub mod format;
pub mod geometry_cache;
pub mod layer;
pub mod level;
pub mod loader;
pub mod source;
pub mod state;
pub mod streamer;
pub mod tile;
pub mod tree;
pub mod view;

pub use config::StreamConfig;
pub use crs::{CrsTransform, Identity, Translate};
pub use error::{Error, Result};
pub use fetch::{FetchFuture, Fetcher, HttpFetcher};
pub use format::HierarchyFormat;
pub use geometry_cache::{CacheEntry, CachedGeometry, Disposable, Release, SharedGeometryCache};
pub use layer::{Action, Layer, NodeStatus, Outcome};
pub use level::{LevelBounds, Strategy, choose_next_level};
pub use loader::HierarchyLoader;
pub use source::{Dataset, Source, SourceKind};
pub use state::{Backoff, Phase, UpdateState};
pub use streamer::PointCloudStreamer;
pub use tile::{GeometryBuilder, SphereBandBuilder, TileGeometryBuilder, TileMesh};
pub use tree::{NodeId, NodePayload, SpatialNode, Tree};
pub use view::ViewState;

// Re-export decode types for convenience.
pub use lodtree_decode::{Aabb, Arity, ByteRange, NodeBounds, NodeKey, OrientedBox, PointBuffer};
