//! Scene tree storage
//!
//! Nodes live in a slot map and hold their parent link, ordered children,
//! a local [`Transform`] with a lazily recomputed world matrix, and at most one
//! [`NetworkObject`] component.

use std::collections::HashSet;

use crate::foundation::collections::{NodeId, NodeMap};
use crate::foundation::math::{Mat4, Transform};
use crate::replication::NetworkObject;

/// Scene tree errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// Node handle is stale or was never issued by this graph
    #[error("Node {0:?} does not exist")]
    NodeNotFound(NodeId),

    /// The root node cannot be removed, re-parented or carry a network object
    #[error("Operation not allowed on the scene root")]
    RootNode,

    /// Re-parenting would make a node its own ancestor
    #[error("Node {node:?} cannot be parented under its descendant {parent:?}")]
    CyclicParent {
        /// Node being moved
        node: NodeId,
        /// Requested parent
        parent: NodeId,
    },

    /// Node already carries a network object
    #[error("Node {0:?} already has a NetworkObject")]
    DuplicateNetworkObject(NodeId),

    /// Node carries no network object
    #[error("Node {0:?} has no NetworkObject")]
    MissingNetworkObject(NodeId),
}

/// Receives component add/remove notifications from a [`SceneGraph`].
///
/// `on_component_added` runs after the component is attached to its node,
/// `on_component_removed` runs while it is still attached.
pub trait ComponentListener {
    /// A network object was attached to `node`
    fn on_component_added(&mut self, graph: &mut SceneGraph, node: NodeId);

    /// The network object on `node` is about to be detached
    fn on_component_removed(&mut self, graph: &mut SceneGraph, node: NodeId);
}

/// Listener that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NullListener;

impl ComponentListener for NullListener {
    fn on_component_added(&mut self, _graph: &mut SceneGraph, _node: NodeId) {}

    fn on_component_removed(&mut self, _graph: &mut SceneGraph, _node: NodeId) {}
}

/// A single scene node
#[derive(Debug)]
pub struct Node {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    transform: Transform,
    world: Mat4,
    world_dirty: bool,
    network_object: Option<NetworkObject>,
}

impl Node {
    fn new(name: String, parent: Option<NodeId>) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            transform: Transform::identity(),
            world: Mat4::identity(),
            world_dirty: true,
            network_object: None,
        }
    }

    /// Node name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent node, `None` only for the root
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Direct children in creation order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Local transform
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Network object component, if any
    pub fn network_object(&self) -> Option<&NetworkObject> {
        self.network_object.as_ref()
    }
}

/// Hierarchical scene storage
#[derive(Debug)]
pub struct SceneGraph {
    nodes: NodeMap<Node>,
    root: NodeId,
}

impl SceneGraph {
    /// Create a graph containing only the root node
    pub fn new() -> Self {
        let mut nodes = NodeMap::with_key();
        let root = nodes.insert(Node::new("Scene".to_string(), None));
        Self { nodes, root }
    }

    /// Root node handle
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of nodes including the root
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the handle refers to a live node
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(node)
    }

    /// Borrow a node
    pub fn node(&self, node: NodeId) -> Option<&Node> {
        self.nodes.get(node)
    }

    /// Parent of a node
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node).and_then(|n| n.parent)
    }

    /// Create a node under `parent`
    pub fn create_child(&mut self, parent: NodeId, name: impl Into<String>) -> Result<NodeId, SceneError> {
        if !self.nodes.contains_key(parent) {
            return Err(SceneError::NodeNotFound(parent));
        }
        let child = self.nodes.insert(Node::new(name.into(), Some(parent)));
        self.nodes[parent].children.push(child);
        Ok(child)
    }

    /// Whether `ancestor` is `node` or one of its ancestors
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Move `node` under `new_parent`, keeping its local transform
    pub fn set_parent(&mut self, node: NodeId, new_parent: NodeId) -> Result<(), SceneError> {
        if node == self.root {
            return Err(SceneError::RootNode);
        }
        if !self.nodes.contains_key(node) {
            return Err(SceneError::NodeNotFound(node));
        }
        if !self.nodes.contains_key(new_parent) {
            return Err(SceneError::NodeNotFound(new_parent));
        }
        if self.is_ancestor_or_self(node, new_parent) {
            return Err(SceneError::CyclicParent { node, parent: new_parent });
        }

        if let Some(old_parent) = self.nodes[node].parent {
            self.nodes[old_parent].children.retain(|&c| c != node);
        }
        self.nodes[new_parent].children.push(node);
        self.nodes[node].parent = Some(new_parent);
        self.mark_world_dirty(node);
        Ok(())
    }

    /// Local transform of a node
    pub fn transform(&self, node: NodeId) -> Option<&Transform> {
        self.nodes.get(node).map(|n| &n.transform)
    }

    /// Replace the local transform of a node
    pub fn set_transform(&mut self, node: NodeId, transform: Transform) -> Result<(), SceneError> {
        let entry = self.nodes.get_mut(node).ok_or(SceneError::NodeNotFound(node))?;
        entry.transform = transform;
        self.mark_world_dirty(node);
        Ok(())
    }

    /// Whether the cached world matrix of a node is stale
    pub fn is_world_dirty(&self, node: NodeId) -> bool {
        self.nodes.get(node).map_or(false, |n| n.world_dirty)
    }

    // A clean node always has clean ancestors, so a dirty node already has a
    // fully dirty subtree.
    fn mark_world_dirty(&mut self, node: NodeId) {
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let Some(entry) = self.nodes.get_mut(id) else { continue };
            if entry.world_dirty && id != node {
                continue;
            }
            entry.world_dirty = true;
            stack.extend(entry.children.iter().copied());
        }
    }

    /// World matrix of a node, recomputing stale ancestors on the way
    pub fn world_transform(&mut self, node: NodeId) -> Option<Mat4> {
        if !self.nodes.contains_key(node) {
            return None;
        }

        let mut chain = Vec::new();
        let mut current = Some(node);
        while let Some(id) = current {
            let entry = &self.nodes[id];
            if !entry.world_dirty {
                break;
            }
            chain.push(id);
            current = entry.parent;
        }

        for &id in chain.iter().rev() {
            let parent_world = self.nodes[id]
                .parent
                .map_or_else(Mat4::identity, |p| self.nodes[p].world);
            let entry = &mut self.nodes[id];
            entry.world = parent_world * entry.transform.to_matrix();
            entry.world_dirty = false;
        }

        Some(self.nodes[node].world)
    }

    /// Network object on a node
    pub fn network_object(&self, node: NodeId) -> Option<&NetworkObject> {
        self.nodes.get(node).and_then(|n| n.network_object.as_ref())
    }

    /// Mutable network object on a node
    pub fn network_object_mut(&mut self, node: NodeId) -> Option<&mut NetworkObject> {
        self.nodes.get_mut(node).and_then(|n| n.network_object.as_mut())
    }

    /// Attach a network object to a node and notify `listener`.
    ///
    /// The root is never replicated and cannot carry one.
    pub fn add_network_object(
        &mut self,
        node: NodeId,
        object: NetworkObject,
        listener: &mut dyn ComponentListener,
    ) -> Result<(), SceneError> {
        if node == self.root {
            return Err(SceneError::RootNode);
        }
        let entry = self.nodes.get_mut(node).ok_or(SceneError::NodeNotFound(node))?;
        if entry.network_object.is_some() {
            return Err(SceneError::DuplicateNetworkObject(node));
        }
        entry.network_object = Some(object);
        listener.on_component_added(self, node);
        Ok(())
    }

    /// Notify `listener`, then detach and return the network object of a node
    pub fn remove_network_object(
        &mut self,
        node: NodeId,
        listener: &mut dyn ComponentListener,
    ) -> Result<NetworkObject, SceneError> {
        if self.network_object(node).is_none() {
            return if self.contains(node) {
                Err(SceneError::MissingNetworkObject(node))
            } else {
                Err(SceneError::NodeNotFound(node))
            };
        }
        listener.on_component_removed(self, node);
        self.nodes[node]
            .network_object
            .take()
            .ok_or(SceneError::MissingNetworkObject(node))
    }

    /// Subtree of `node` in post-order (children before parents)
    pub fn subtree_post_order(&self, node: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack = vec![(node, false)];
        while let Some((id, expanded)) = stack.pop() {
            let Some(entry) = self.nodes.get(id) else { continue };
            if expanded {
                result.push(id);
            } else {
                stack.push((id, true));
                stack.extend(entry.children.iter().rev().map(|&c| (c, false)));
            }
        }
        result
    }

    /// Subtree of `node` in pre-order (parents before children)
    pub fn subtree_pre_order(&self, node: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let Some(entry) = self.nodes.get(id) else { continue };
            result.push(id);
            stack.extend(entry.children.iter().rev().copied());
        }
        result
    }

    /// Remove a node and its subtree.
    ///
    /// Network objects in the subtree are reported to `listener` deepest
    /// first, each while its node is still alive.
    pub fn remove_node(&mut self, node: NodeId, listener: &mut dyn ComponentListener) -> Result<(), SceneError> {
        if !self.nodes.contains_key(node) {
            return Err(SceneError::NodeNotFound(node));
        }
        self.remove_nodes(&[node], listener)
    }

    /// Remove several nodes and their subtrees in one pass.
    ///
    /// Stale handles and nodes already covered by an earlier subtree are
    /// skipped. Each surviving parent has its child list rebuilt once, so the
    /// cost is linear in the number of removed nodes and their siblings.
    pub fn remove_nodes(&mut self, nodes: &[NodeId], listener: &mut dyn ComponentListener) -> Result<(), SceneError> {
        if nodes.contains(&self.root) {
            return Err(SceneError::RootNode);
        }

        let mut doomed = Vec::new();
        let mut visited = HashSet::new();
        // Post-order walk that never re-enters a subtree already collected
        for &node in nodes {
            let mut stack = vec![(node, false)];
            while let Some((id, expanded)) = stack.pop() {
                if expanded {
                    doomed.push(id);
                    continue;
                }
                let Some(entry) = self.nodes.get(id) else { continue };
                if !visited.insert(id) {
                    continue;
                }
                stack.push((id, true));
                stack.extend(entry.children.iter().rev().map(|&c| (c, false)));
            }
        }

        for &id in &doomed {
            if self.nodes[id].network_object.is_some() {
                listener.on_component_removed(self, id);
                self.nodes[id].network_object = None;
            }
        }

        let orphaned_parents: HashSet<NodeId> = doomed
            .iter()
            .filter_map(|&id| self.nodes[id].parent)
            .filter(|parent| !visited.contains(parent))
            .collect();
        for parent in orphaned_parents {
            if let Some(entry) = self.nodes.get_mut(parent) {
                entry.children.retain(|c| !visited.contains(c));
            }
        }
        for id in doomed {
            self.nodes.remove(id);
        }
        Ok(())
    }
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}
