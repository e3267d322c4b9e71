//! Point cloud streaming loop.

use std::sync::Arc;

use lodtree_decode::PointBuffer;
use web_time::Instant;

use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::layer::{Action, Layer, NodeStatus, Outcome};
use crate::level::Strategy;
use crate::loader::HierarchyLoader;
use crate::tree::{NodeId, NodePayload};
use crate::view::ViewState;

/// Drives a [`HierarchyLoader`] from per-frame view updates.
///
/// Each point node holds exactly one level, its own depth, so the streamer
/// requests it directly rather than through an intermediate strategy. The
/// configured level bounds still cap how deep the tree is refined.
pub struct PointCloudStreamer {
    loader: HierarchyLoader,
    layer: Layer,
    spacing: f64,
}

impl PointCloudStreamer {
    /// Create a streamer over a loader. `spacing` is the point spacing at
    /// the root level, in world units.
    #[must_use]
    pub fn new(loader: HierarchyLoader, spacing: f64, config: &StreamConfig) -> Self {
        Self {
            loader,
            layer: Layer::new(Strategy::MinNetworkTraffic, config.levels, config.backoff()),
            spacing,
        }
    }

    #[must_use]
    pub fn loader(&self) -> &HierarchyLoader {
        &self.loader
    }

    #[must_use]
    pub fn layer(&self) -> &Layer {
        &self.layer
    }

    /// Points attached to a node, if loaded.
    #[must_use]
    pub fn points(&self, id: NodeId) -> Option<Arc<PointBuffer>> {
        match self.loader.tree().lock().get(id)?.payload()? {
            NodePayload::Points(points) => Some(Arc::clone(points)),
            NodePayload::Tile(_) => None,
        }
    }

    /// Evaluate one node, run the granted fetch, and record its outcome.
    ///
    /// Returns the action that was performed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownNode`] if `id` is not live, or the fetch
    /// error after it was recorded in the node's update state.
    pub async fn step(&mut self, id: NodeId, view: &ViewState, now: Instant) -> Result<Action> {
        let (key, status) = {
            let tree = self.loader.tree().lock();
            let node = tree.get(id).ok_or(Error::UnknownNode)?;
            let depth = i32::try_from(node.depth()).unwrap_or(i32::MAX);
            let bounds = self.layer.bounds();
            let wanted = view.desired_level(&node.bounds().world, self.spacing, bounds.max);
            let has_points = matches!(node.payload(), Some(NodePayload::Points(_)));
            // Empty nodes never need a payload.
            let needed = depth <= wanted
                && (bounds.min..=bounds.max).contains(&depth)
                && node.count() != 0;
            let status = NodeStatus {
                hierarchy_loaded: node.octree_is_loaded(),
                desired_level: needed.then_some(depth),
                current_level: has_points.then_some(depth),
            };
            (node.key(), status)
        };

        let action = self.layer.evaluate(key, status, now);
        let result = match action {
            Action::None => return Ok(action),
            Action::FetchHierarchy => self.loader.load_hierarchy(id).await,
            Action::FetchLevel(_) => self.loader.load_points(id).await.map(|_| ()),
        };
        let level = match action {
            Action::FetchLevel(level) => Some(level),
            Action::None | Action::FetchHierarchy => None,
        };

        match result {
            Ok(()) => {
                self.layer.report(key, Outcome::Success { level }, now);
                Ok(action)
            }
            Err(e) => {
                let definitive = self.loader.is_definitive(&e);
                // A point node has a single level, so a failure must not rule
                // that level out; the backoff alone paces the retry.
                let outcome = Outcome::Failure {
                    level: None,
                    definitive,
                };
                self.layer.report(key, outcome, now);
                Err(e)
            }
        }
    }

    /// Remove a node's subtree and forget its update states.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is the root or is not live.
    pub fn prune(&mut self, id: NodeId) -> Result<Vec<NodePayload>> {
        let mut tree = self.loader.tree().lock();
        let key = tree.get(id).ok_or(Error::UnknownNode)?.key();
        let payloads = tree.prune(id)?;
        drop(tree);
        let forgotten = self.layer.forget_subtree(key);
        tracing::debug!(%key, payloads = payloads.len(), forgotten, "pruned subtree");
        Ok(payloads)
    }
}
