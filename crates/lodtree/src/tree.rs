//! Arena-backed spatial tree.
//!
//! Nodes live in a [`Slab`] and refer to each other through [`NodeId`]
//! handles: children are owned by the arena, the parent link is a plain
//! handle. The tree is materialized lazily, one hierarchy chunk at a time,
//! through [`Tree::attach_hierarchy`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use lodtree_decode::{
    Arity, ByteRange, DecodedHierarchy, HierarchyEntry, NodeBounds, NodeKey, PointBuffer,
};
use slab::Slab;

use crate::crs::CrsTransform;
use crate::error::{Error, Result};
use crate::tile::TileMesh;

/// Handle to a node in a [`Tree`].
///
/// Handles of pruned nodes may be reused by later nodes; hold a
/// [`NodeKey`] across awaits and resolve it with [`Tree::find`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Data attached to a node.
#[derive(Debug, Clone)]
pub enum NodePayload {
    Points(Arc<PointBuffer>),
    Tile(TileMesh),
}

/// One node of a spatial tree.
#[derive(Debug, Clone)]
pub struct SpatialNode {
    key: NodeKey,
    parent: Option<NodeId>,
    /// Children in octant order.
    children: Vec<NodeId>,
    bounds: NodeBounds,
    /// Point or feature count, `-1` while the node's hierarchy is unknown.
    count: i64,
    payload_range: Option<ByteRange>,
    /// Location of the chunk describing this node's subtree, for clustered
    /// layouts.
    page: Option<ByteRange>,
    may_have_children: bool,
    payload: Option<NodePayload>,
}

impl SpatialNode {
    fn new(key: NodeKey, parent: Option<NodeId>, bounds: NodeBounds) -> Self {
        Self {
            key,
            parent,
            children: Vec::new(),
            bounds,
            count: -1,
            payload_range: None,
            page: None,
            may_have_children: true,
            payload: None,
        }
    }

    #[must_use]
    pub fn key(&self) -> NodeKey {
        self.key
    }

    #[must_use]
    pub fn depth(&self) -> u32 {
        self.key.depth
    }

    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    #[must_use]
    pub fn bounds(&self) -> &NodeBounds {
        &self.bounds
    }

    #[must_use]
    pub fn count(&self) -> i64 {
        self.count
    }

    #[must_use]
    pub fn payload_range(&self) -> Option<ByteRange> {
        self.payload_range
    }

    #[must_use]
    pub fn page(&self) -> Option<ByteRange> {
        self.page
    }

    #[must_use]
    pub fn may_have_children(&self) -> bool {
        self.may_have_children
    }

    #[must_use]
    pub fn payload(&self) -> Option<&NodePayload> {
        self.payload.as_ref()
    }

    /// Whether the hierarchy below this node is known.
    #[must_use]
    pub fn octree_is_loaded(&self) -> bool {
        self.count >= 0 || !self.may_have_children
    }
}

/// A lazily materialized octree or quadtree.
pub struct Tree {
    nodes: Slab<SpatialNode>,
    index: HashMap<NodeKey, NodeId>,
    root: NodeId,
    arity: Arity,
    crs: Arc<dyn CrsTransform>,
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("arity", &self.arity)
            .field("nodes", &self.nodes.len())
            .finish_non_exhaustive()
    }
}

impl Tree {
    /// Create a tree holding only its root, whose hierarchy is not loaded.
    #[must_use]
    pub fn new(arity: Arity, bounds: NodeBounds, crs: Arc<dyn CrsTransform>) -> Self {
        let mut nodes = Slab::new();
        let root = NodeId(nodes.insert(SpatialNode::new(NodeKey::ROOT, None, bounds)));
        Self {
            nodes,
            index: HashMap::from([(NodeKey::ROOT, root)]),
            root,
            arity,
            crs,
        }
    }

    /// Set where the root's hierarchy chunk lives.
    #[must_use]
    pub fn with_root_page(mut self, page: ByteRange) -> Self {
        self.nodes[self.root.0].page = Some(page);
        self
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[must_use]
    pub fn arity(&self) -> Arity {
        self.arity
    }

    #[must_use]
    pub fn crs(&self) -> &Arc<dyn CrsTransform> {
        &self.crs
    }

    /// Number of materialized nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&SpatialNode> {
        self.nodes.get(id.0)
    }

    /// Look up a node by key.
    #[must_use]
    pub fn find(&self, key: NodeKey) -> Option<NodeId> {
        self.index.get(&key).copied()
    }

    fn node(&self, id: NodeId) -> Result<&SpatialNode> {
        self.nodes.get(id.0).ok_or(Error::UnknownNode)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut SpatialNode> {
        self.nodes.get_mut(id.0).ok_or(Error::UnknownNode)
    }

    /// Iterate over all nodes in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &SpatialNode)> {
        self.nodes.iter().map(|(i, node)| (NodeId(i), node))
    }

    /// Merge a decoded hierarchy chunk into the subtree rooted at `id`.
    ///
    /// The chunk must list `id`'s own key. Its entry refreshes the node's
    /// count and payload location; every listed descendant is then created
    /// (or refreshed) breadth-first in octant order. Nodes listed as pages
    /// are created unloaded with a count of `-1`.
    ///
    /// Returns the number of nodes created.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllFormedData`] without modifying the tree if the
    /// chunk lacks a node entry for `id`, and [`Error::UnknownNode`] if `id`
    /// is not live.
    pub fn attach_hierarchy(&mut self, id: NodeId, decoded: &DecodedHierarchy) -> Result<usize> {
        let key = self.node(id)?.key;
        let Some(&HierarchyEntry::Node { count, payload }) = decoded.get(&key) else {
            return Err(Error::IllFormedData {
                key,
                detail: "hierarchy chunk has no entry for its own root".to_string(),
            });
        };

        let has_children = self.has_listed_children(key, decoded);
        let node = self.node_mut(id)?;
        node.count = i64::try_from(count).unwrap_or(i64::MAX);
        node.payload_range = payload;
        node.may_have_children = has_children;

        let mut created = 0;
        let mut queue = VecDeque::from([id]);
        while let Some(parent) = queue.pop_front() {
            let parent_key = self.nodes[parent.0].key;
            for octant in 0..self.arity.child_count() {
                let Some(child_key) = parent_key.checked_child(octant) else {
                    break;
                };
                let Some(entry) = decoded.get(&child_key) else {
                    continue;
                };
                let (child, is_new) = self.child_or_insert(parent, octant)?;
                created += usize::from(is_new);

                let has_children = self.has_listed_children(child_key, decoded);
                let node = &mut self.nodes[child.0];
                match *entry {
                    HierarchyEntry::Node { count, payload } => {
                        node.count = i64::try_from(count).unwrap_or(i64::MAX);
                        node.payload_range = payload;
                        node.may_have_children = has_children;
                    }
                    HierarchyEntry::Page { page, has_children } => {
                        node.page = page;
                        // A page already loaded on its own keeps its state.
                        if node.count < 0 {
                            node.may_have_children = has_children;
                        }
                    }
                }
                queue.push_back(child);
            }
        }
        Ok(created)
    }

    fn has_listed_children(&self, key: NodeKey, decoded: &DecodedHierarchy) -> bool {
        (0..self.arity.child_count())
            .filter_map(|octant| key.checked_child(octant))
            .any(|child| decoded.contains(&child))
    }

    /// Return the child of `parent` in `octant`, creating it if needed.
    /// Children stay sorted by octant.
    fn child_or_insert(&mut self, parent: NodeId, octant: u8) -> Result<(NodeId, bool)> {
        let parent_node = self.node(parent)?;
        let key = parent_node.key.checked_child(octant).ok_or_else(|| Error::Logic {
            detail: format!("node {} cannot be subdivided further", parent_node.key),
        })?;
        if let Some(&existing) = self.index.get(&key) {
            return Ok((existing, false));
        }

        let bounds = parent_node
            .bounds
            .child(octant, self.arity, |p| self.crs.to_world(p));
        let id = NodeId(self.nodes.insert(SpatialNode::new(key, Some(parent), bounds)));
        self.index.insert(key, id);

        let position = self.nodes[parent.0]
            .children
            .partition_point(|c| self.nodes[c.0].key.octant() < octant);
        self.nodes[parent.0].children.insert(position, id);
        Ok((id, true))
    }

    /// Create every child of a node whose subdivision is implicit, such as
    /// terrain tiles. Existing children are kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownNode`] if `id` is not live and
    /// [`Error::Logic`] if the children's keys would leave the key range.
    pub fn subdivide(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut children = Vec::with_capacity(usize::from(self.arity.child_count()));
        for octant in 0..self.arity.child_count() {
            let (child, is_new) = self.child_or_insert(id, octant)?;
            if is_new {
                self.nodes[child.0].count = 0;
            }
            children.push(child);
        }
        let node = self.node_mut(id)?;
        node.count = node.count.max(0);
        Ok(children)
    }

    /// Attach data to a node, returning what it replaced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownNode`] if `id` is not live.
    pub fn attach_payload(&mut self, id: NodeId, payload: NodePayload) -> Result<Option<NodePayload>> {
        Ok(self.node_mut(id)?.payload.replace(payload))
    }

    /// Detach a node's data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownNode`] if `id` is not live.
    pub fn take_payload(&mut self, id: NodeId) -> Result<Option<NodePayload>> {
        Ok(self.node_mut(id)?.payload.take())
    }

    /// Widen a node's vertical range and propagate the change to its
    /// ancestors, so every parent keeps containing its children.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownNode`] if `id` is not live.
    pub fn expand_vertical(&mut self, id: NodeId, min_z: f64, max_z: f64) -> Result<()> {
        let mut current = Some(id);
        while let Some(id) = current {
            let node = self.node_mut(id)?;
            // Ancestors already contain an unchanged range.
            if !node.bounds.expand_vertical(min_z, max_z) {
                break;
            }
            current = node.parent;
        }
        Ok(())
    }

    /// Remove `id` and its whole subtree, returning the payloads that were
    /// attached to the removed nodes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Logic`] for the root and [`Error::UnknownNode`] if
    /// `id` is not live.
    pub fn prune(&mut self, id: NodeId) -> Result<Vec<NodePayload>> {
        if id == self.root {
            return Err(Error::Logic {
                detail: "the root node cannot be pruned".to_string(),
            });
        }
        let parent = self.node(id)?.parent;
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(p.0)) {
            parent.children.retain(|&c| c != id);
        }

        let mut payloads = Vec::new();
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let node = self.nodes.remove(id.0);
            self.index.remove(&node.key);
            stack.extend(node.children);
            payloads.extend(node.payload);
        }
        Ok(payloads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Identity;
    use glam::DVec3;
    use lodtree_decode::Aabb;

    fn octree() -> Tree {
        let natural = Aabb::new(DVec3::ZERO, DVec3::splat(8.0));
        Tree::new(Arity::Oct, NodeBounds::new(natural, |p| p), Arc::new(Identity))
    }

    fn node(count: u64) -> HierarchyEntry {
        HierarchyEntry::Node {
            count,
            payload: None,
        }
    }

    #[test]
    fn test_new_tree_is_unloaded() {
        let tree = octree();
        let root = tree.get(tree.root()).unwrap();
        assert_eq!(root.count(), -1);
        assert!(!root.octree_is_loaded());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_attach_creates_children_in_octant_order() {
        let mut tree = octree();
        let decoded: DecodedHierarchy = [
            (NodeKey::ROOT, node(100)),
            (NodeKey::ROOT.child(7), node(7)),
            (NodeKey::ROOT.child(2), node(2)),
            (NodeKey::ROOT.child(5), node(5)),
        ]
        .into_iter()
        .collect();

        let created = tree.attach_hierarchy(tree.root(), &decoded).unwrap();
        assert_eq!(created, 3);

        let root = tree.get(tree.root()).unwrap();
        assert_eq!(root.count(), 100);
        let octants: Vec<u8> = root
            .children()
            .iter()
            .map(|&c| tree.get(c).unwrap().key().octant())
            .collect();
        assert_eq!(octants, vec![2, 5, 7]);
        for &child in root.children() {
            let child = tree.get(child).unwrap();
            assert!(root.bounds().contains(child.bounds()));
            assert!(child.octree_is_loaded());
            assert!(!child.may_have_children());
        }
    }

    #[test]
    fn test_subdivide_stops_at_key_range_limit() {
        let mut tree = octree();
        let mut id = tree.root();
        for _ in 0..32 {
            id = tree.subdivide(id).unwrap()[1];
        }
        assert_eq!(tree.get(id).unwrap().key(), NodeKey::new(32, u32::MAX, 0, 0));
        assert!(matches!(tree.subdivide(id), Err(Error::Logic { .. })));
        assert!(tree.get(id).unwrap().children().is_empty());
    }

    #[test]
    fn test_child_bounds_follow_doubling_rule() {
        let mut tree = octree();
        let decoded: DecodedHierarchy = [(NodeKey::ROOT, node(1)), (NodeKey::ROOT.child(5), node(1))]
            .into_iter()
            .collect();
        tree.attach_hierarchy(tree.root(), &decoded).unwrap();
        let id = tree.find(NodeKey::new(1, 1, 0, 1)).unwrap();
        let child = tree.get(id).unwrap();
        assert_eq!(child.bounds().natural.min, DVec3::new(4.0, 0.0, 4.0));
        assert_eq!(child.bounds().natural.max, DVec3::new(8.0, 4.0, 8.0));
    }

    #[test]
    fn test_pages_are_created_unloaded() {
        let mut tree = octree();
        let page = ByteRange::new(220, 44);
        let decoded: DecodedHierarchy = [
            (NodeKey::ROOT, node(10)),
            (
                NodeKey::ROOT.child(0),
                HierarchyEntry::Page {
                    page: Some(page),
                    has_children: true,
                },
            ),
        ]
        .into_iter()
        .collect();
        tree.attach_hierarchy(tree.root(), &decoded).unwrap();

        let id = tree.find(NodeKey::ROOT.child(0)).unwrap();
        let child = tree.get(id).unwrap();
        assert_eq!(child.count(), -1);
        assert_eq!(child.page(), Some(page));
        assert!(!child.octree_is_loaded());
    }

    #[test]
    fn test_missing_own_entry_leaves_node_unloaded() {
        let mut tree = octree();
        let decoded: DecodedHierarchy = [(NodeKey::ROOT.child(1), node(3))].into_iter().collect();
        let result = tree.attach_hierarchy(tree.root(), &decoded);
        assert!(matches!(result, Err(Error::IllFormedData { .. })));
        assert_eq!(tree.len(), 1);
        assert!(!tree.get(tree.root()).unwrap().octree_is_loaded());
    }

    #[test]
    fn test_reattach_is_idempotent() {
        let mut tree = octree();
        let decoded: DecodedHierarchy = [
            (NodeKey::ROOT, node(4)),
            (NodeKey::ROOT.child(3), node(2)),
            (NodeKey::ROOT.child(3).child(6), node(1)),
        ]
        .into_iter()
        .collect();
        assert_eq!(tree.attach_hierarchy(tree.root(), &decoded).unwrap(), 2);
        assert_eq!(tree.attach_hierarchy(tree.root(), &decoded).unwrap(), 0);
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_vertical_range_propagates_up() {
        let mut tree = octree();
        let child = tree.subdivide(tree.root()).unwrap()[4];
        let grandchild = tree.subdivide(child).unwrap()[0];
        tree.expand_vertical(grandchild, -5.0, 20.0).unwrap();

        for id in [grandchild, child, tree.root()] {
            let bounds = tree.get(id).unwrap().bounds();
            assert!(bounds.min_z <= -5.0);
            assert!(bounds.max_z >= 20.0);
        }
    }

    #[test]
    fn test_prune_removes_subtree_and_returns_payloads() {
        let mut tree = octree();
        let children = tree.subdivide(tree.root()).unwrap();
        let grandchildren = tree.subdivide(children[0]).unwrap();
        tree.attach_payload(grandchildren[1], NodePayload::Points(Arc::default()))
            .unwrap();

        let payloads = tree.prune(children[0]).unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(tree.len(), 1 + 7);
        assert!(tree.find(NodeKey::ROOT.child(0)).is_none());
        assert!(tree.find(NodeKey::ROOT.child(0).child(1)).is_none());
        assert_eq!(tree.get(tree.root()).unwrap().children().len(), 7);
        assert!(tree.prune(tree.root()).is_err());
    }
}
