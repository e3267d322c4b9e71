//! Lazy hierarchy and payload loading.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use lodtree_decode::{NodeKey, PointBuffer};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::format::{Chunk, ChunkKind, ChunkRequest, HierarchyFormat};
use crate::tree::{NodeId, NodePayload, Tree};

type SharedLoad = Shared<BoxFuture<'static, Result<()>>>;

/// Materializes a [`Tree`] chunk by chunk.
///
/// Concurrent [`load_hierarchy`](Self::load_hierarchy) calls for the same
/// node share one fetch. The tree lock is never held across an await.
pub struct HierarchyLoader {
    fetcher: Arc<dyn Fetcher>,
    format: Arc<dyn HierarchyFormat>,
    tree: Arc<Mutex<Tree>>,
    in_flight: Mutex<HashMap<NodeKey, SharedLoad>>,
}

impl HierarchyLoader {
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>, format: Arc<dyn HierarchyFormat>, tree: Tree) -> Self {
        Self {
            fetcher,
            format,
            tree: Arc::new(Mutex::new(tree)),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// The tree being loaded. Lock it briefly; never across an await.
    #[must_use]
    pub fn tree(&self) -> &Arc<Mutex<Tree>> {
        &self.tree
    }

    #[must_use]
    pub fn format(&self) -> &Arc<dyn HierarchyFormat> {
        &self.format
    }

    /// Whether a failure must never be retried, as decided by the fetcher.
    #[must_use]
    pub fn is_definitive(&self, error: &Error) -> bool {
        self.fetcher.is_definitive(error)
    }

    /// Load the hierarchy chunk rooted at `id` and materialize its nodes.
    ///
    /// Resolves at once if the node's hierarchy is already known.
    ///
    /// # Errors
    ///
    /// Returns the fetch error, a decode error, or
    /// [`Error::IllFormedData`] if the chunk does not describe the node. The
    /// node stays unloaded in every case, so the call can be retried.
    pub async fn load_hierarchy(&self, id: NodeId) -> Result<()> {
        let (key, page) = {
            let tree = self.tree.lock();
            let node = tree.get(id).ok_or(Error::UnknownNode)?;
            if node.octree_is_loaded() {
                return Ok(());
            }
            (node.key(), node.page())
        };

        let load = {
            let mut in_flight = self.in_flight.lock();
            if let Some(existing) = in_flight.get(&key) {
                tracing::debug!(%key, "joining in-flight hierarchy load");
                existing.clone()
            } else {
                let request = self.format.hierarchy_request(key, page);
                let load = load_chunk(
                    Arc::clone(&self.fetcher),
                    Arc::clone(&self.format),
                    Arc::clone(&self.tree),
                    key,
                    request,
                )
                .boxed()
                .shared();
                in_flight.insert(key, load.clone());
                load
            }
        };

        let result = load.clone().await;

        let mut in_flight = self.in_flight.lock();
        if in_flight.get(&key).is_some_and(|l| l.peek().is_some()) {
            in_flight.remove(&key);
        }
        result
    }

    /// Number of hierarchy loads currently shared between callers.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Load the points of a node, loading its hierarchy first if needed.
    ///
    /// Nodes without points resolve to an empty buffer without a fetch.
    /// Decoded points are attached to the node and widen its vertical range.
    ///
    /// # Errors
    ///
    /// Returns the hierarchy or payload fetch error, or a decode error.
    pub async fn load_points(&self, id: NodeId) -> Result<Arc<PointBuffer>> {
        self.load_hierarchy(id).await?;

        let (key, bounds, payload) = {
            let tree = self.tree.lock();
            let node = tree.get(id).ok_or(Error::UnknownNode)?;
            if let Some(NodePayload::Points(points)) = node.payload() {
                return Ok(Arc::clone(points));
            }
            if node.count() == 0 {
                return Ok(Arc::default());
            }
            (node.key(), *node.bounds(), node.payload_range())
        };

        let request = self.format.payload_request(key, payload)?;
        let bytes = self.fetcher.fetch_range(&request.url, request.range).await?;
        let points = Arc::new(self.format.decode_payload(key, &bounds, &bytes)?);
        tracing::debug!(%key, points = points.len(), "decoded payload");

        let mut tree = self.tree.lock();
        let id = tree.find(key).ok_or(Error::UnknownNode)?;
        tree.attach_payload(id, NodePayload::Points(Arc::clone(&points)))?;
        if !points.is_empty() {
            tree.expand_vertical(id, points.min_z, points.max_z)?;
        }
        Ok(points)
    }
}

async fn fetch_chunk(fetcher: &dyn Fetcher, request: &ChunkRequest) -> Result<Chunk> {
    Ok(match request.kind {
        ChunkKind::Bytes => Chunk::Bytes(fetcher.fetch_range(&request.url, request.range).await?),
        ChunkKind::Json => Chunk::Json(fetcher.fetch_json(&request.url).await?),
    })
}

async fn load_chunk(
    fetcher: Arc<dyn Fetcher>,
    format: Arc<dyn HierarchyFormat>,
    tree: Arc<Mutex<Tree>>,
    key: NodeKey,
    request: ChunkRequest,
) -> Result<()> {
    let chunk = fetch_chunk(fetcher.as_ref(), &request).await;
    let decoded = chunk.and_then(|chunk| format.decode_hierarchy(key, chunk));
    let decoded = match decoded {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!(%key, url = %request.url, error = %e, "hierarchy load failed");
            return Err(e);
        }
    };

    let mut tree = tree.lock();
    // The node may have been pruned while the chunk was in flight.
    let id = tree.find(key).ok_or(Error::UnknownNode)?;
    let created = tree.attach_hierarchy(id, &decoded)?;
    tracing::info!(
        %key,
        format = format.name(),
        entries = decoded.len(),
        created,
        "hierarchy page loaded"
    );
    Ok(())
}
