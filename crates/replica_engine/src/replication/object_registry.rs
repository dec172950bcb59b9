//! Registry of network objects with per-frame dirty tracking
//!
//! Objects are flagged dirty when added, when a child is removed and when an
//! update is queued explicitly. [`NetworkObjectRegistry::update_network_objects`]
//! is the only place flags are cleared: it re-links the hierarchy of every
//! flagged object and refreshes its world transform.

use std::collections::HashSet;

use log::{debug, error, warn};

use super::network_object::NetworkId;
use super::tracked_registry::TrackedComponentRegistry;
use crate::foundation::collections::NodeId;
use crate::scene::{ComponentListener, SceneGraph};

/// Registry membership change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkObjectEvent {
    /// Object was registered under the id
    Added(NetworkId),
    /// Object registered under the id is being removed
    Removed(NetworkId),
}

type Listener = Box<dyn FnMut(&NetworkObjectEvent)>;

/// Tracks every [`NetworkObject`](super::NetworkObject) of one scene
#[derive(Default)]
pub struct NetworkObjectRegistry {
    objects: TrackedComponentRegistry<NodeId>,
    dirty: Vec<bool>,
    listeners: Vec<Listener>,
}

impl NetworkObjectRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to added/removed notifications
    pub fn subscribe(&mut self, listener: impl FnMut(&NetworkObjectEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    fn publish(&mut self, event: NetworkObjectEvent) {
        for listener in &mut self.listeners {
            listener(&event);
        }
    }

    fn mark_dirty(&mut self, index: u32) {
        let index = index as usize;
        if self.dirty.len() <= index {
            self.dirty.resize(index + 1, false);
        }
        self.dirty[index] = true;
    }

    /// Node of a network object
    pub fn network_object(&self, network_id: NetworkId, check_version: bool) -> Option<NodeId> {
        self.objects.get(network_id, check_version)
    }

    /// Node of the network object at an index, whatever its version
    pub fn network_object_by_index(&self, index: u32) -> Option<NodeId> {
        self.objects.get_by_index(index)
    }

    /// All registered objects in registration order
    pub fn network_objects(&self) -> impl Iterator<Item = (NetworkId, NodeId)> + '_ {
        self.objects.iter()
    }

    /// Number of registered objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether no object is registered
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Whether a live object is waiting for a hierarchy update
    pub fn is_dirty(&self, network_id: NetworkId) -> bool {
        self.objects.get(network_id, true).is_some()
            && self.dirty.get(network_id.index as usize).copied().unwrap_or(false)
    }

    /// Number of raised dirty flags, including flags of removed objects
    pub fn dirty_count(&self) -> usize {
        self.dirty.iter().filter(|&&flag| flag).count()
    }

    /// Id of the object on `node` if it is registered here
    pub fn registered_id(&self, graph: &SceneGraph, node: NodeId) -> Option<NetworkId> {
        let network_id = graph.network_object(node)?.network_id();
        (self.objects.get(network_id, true) == Some(node)).then_some(network_id)
    }

    /// Closest registered network object above `network_id` in the scene tree
    pub fn parent_network_object(&self, graph: &SceneGraph, network_id: NetworkId) -> Option<NetworkId> {
        let node = self.objects.get(network_id, true)?;
        let mut current = graph.parent(node);
        while let Some(ancestor) = current {
            if let Some(parent_id) = self.registered_id(graph, ancestor) {
                return Some(parent_id);
            }
            current = graph.parent(ancestor);
        }
        None
    }

    /// Registered network objects directly below `network_id`.
    ///
    /// Scans the node subtree and does not descend past nodes that carry a
    /// registered object.
    pub fn children_network_objects(&self, graph: &SceneGraph, network_id: NetworkId) -> Vec<NetworkId> {
        let mut children = Vec::new();
        let Some(node) = self.objects.get(network_id, true) else {
            return children;
        };
        let Some(entry) = graph.node(node) else {
            return children;
        };

        let mut stack: Vec<NodeId> = entry.children().iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            if let Some(child_id) = self.registered_id(graph, current) {
                children.push(child_id);
            } else if let Some(entry) = graph.node(current) {
                stack.extend(entry.children().iter().rev().copied());
            }
        }
        children
    }

    /// Register the object on `node`, flag it dirty and notify subscribers
    pub fn on_component_added(&mut self, graph: &mut SceneGraph, node: NodeId) {
        if self.registered_id(graph, node).is_some() {
            return;
        }
        if graph.network_object(node).is_none() {
            warn!("Node {:?} has no NetworkObject to register", node);
            return;
        }

        let network_id = match self.objects.add(node) {
            Ok(network_id) => network_id,
            Err(err) => {
                error!("Cannot register NetworkObject: {}", err);
                return;
            }
        };
        if let Some(object) = graph.network_object_mut(node) {
            object.set_network_id(network_id);
            object.set_parent_network_id(None);
        }

        self.mark_dirty(network_id.index);
        self.publish(NetworkObjectEvent::Added(network_id));

        debug!("NetworkObject {} is added", network_id);
    }

    /// Unregister the object on `node`, flagging its former parent dirty
    pub fn on_component_removed(&mut self, graph: &mut SceneGraph, node: NodeId) {
        let Some(network_id) = self.registered_id(graph, node) else {
            return;
        };

        let parent = graph.network_object(node).and_then(|o| o.parent_network_id());
        if let Some(parent_node) = parent.and_then(|p| self.objects.get(p, true)) {
            self.queue_network_object_update(graph, parent_node);
        }

        self.publish(NetworkObjectEvent::Removed(network_id));

        debug!("NetworkObject {} is removed", network_id);

        self.objects.remove(network_id);
        if let Some(object) = graph.network_object_mut(node) {
            object.notify_removed();
            object.set_network_id(NetworkId::NONE);
            object.set_parent_network_id(None);
        }
    }

    /// Request a hierarchy refresh of the object on `node` this frame.
    ///
    /// Returns false and warns if the object is not the one registered under
    /// its own id.
    pub fn queue_network_object_update(&mut self, graph: &SceneGraph, node: NodeId) -> bool {
        let network_id = graph
            .network_object(node)
            .map_or(NetworkId::NONE, |o| o.network_id());
        if self.objects.get(network_id, true) != Some(node) {
            warn!("Cannot queue update for unknown NetworkObject {}", network_id);
            return false;
        }

        self.mark_dirty(network_id.index);
        true
    }

    /// Request a hierarchy refresh by id. Stale ids are rejected.
    pub fn queue_network_object_update_by_id(&mut self, network_id: NetworkId) -> bool {
        if self.objects.get(network_id, true).is_none() {
            warn!("Cannot queue update for unknown NetworkObject {}", network_id);
            return false;
        }

        self.mark_dirty(network_id.index);
        true
    }

    /// Remove the node of every network object from the scene
    pub fn remove_all_network_objects(&mut self, graph: &mut SceneGraph) {
        let nodes_to_remove: Vec<NodeId> = self.objects.iter().map(|(_, node)| node).collect();
        if let Err(err) = graph.remove_nodes(&nodes_to_remove, self) {
            error!("Cannot remove nodes of NetworkObjects: {}", err);
        }
        self.dirty.clear();

        debug!("{} instances of NetworkObject removed", nodes_to_remove.len());
    }

    /// Flush dirty flags: re-link hierarchy and refresh world transforms
    pub fn update_network_objects(&mut self, graph: &mut SceneGraph) {
        for index in 0..self.dirty.len() {
            if !self.dirty[index] {
                continue;
            }

            // Dirty flags only exist for issued indices, which fit in u32
            if let Some(node) = self.objects.get_by_index(index as u32) {
                let network_id = graph.network_object(node).map(|o| o.network_id());
                let parent = network_id.and_then(|id| self.parent_network_object(graph, id));
                if let Some(object) = graph.network_object_mut(node) {
                    object.set_parent_network_id(parent);
                }
                graph.world_transform(node);
            }
            self.dirty[index] = false;
        }
    }

    /// Every registered object ordered root first, parents before children
    pub fn sorted_network_objects(&self, graph: &SceneGraph) -> Vec<NetworkId> {
        let mut visited = HashSet::with_capacity(self.objects.len());
        let mut sorted = Vec::with_capacity(self.objects.len());

        // Enumerate roots
        for (network_id, _) in self.objects.iter() {
            if self.parent_network_object(graph, network_id).is_none() && visited.insert(network_id) {
                sorted.push(network_id);
            }
        }

        // Enumerate children: the vector grows while it is walked
        let mut cursor = 0;
        while cursor < sorted.len() {
            for child in self.children_network_objects(graph, sorted[cursor]) {
                if visited.insert(child) {
                    sorted.push(child);
                }
            }
            cursor += 1;
        }

        sorted
    }
}

impl ComponentListener for NetworkObjectRegistry {
    fn on_component_added(&mut self, graph: &mut SceneGraph, node: NodeId) {
        Self::on_component_added(self, graph, node);
    }

    fn on_component_removed(&mut self, graph: &mut SceneGraph, node: NodeId) {
        Self::on_component_removed(self, graph, node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{translation_of, Transform, Vec3};
    use crate::replication::NetworkObject;
    use crate::scene::SceneError;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn spawn(graph: &mut SceneGraph, registry: &mut NetworkObjectRegistry, parent: NodeId, name: &str) -> (NodeId, NetworkId) {
        let node = graph.create_child(parent, name).unwrap();
        graph.add_network_object(node, NetworkObject::new(), registry).unwrap();
        let id = graph.network_object(node).unwrap().network_id();
        (node, id)
    }

    fn assert_parents_first(graph: &SceneGraph, registry: &NetworkObjectRegistry) {
        let sorted = registry.sorted_network_objects(graph);
        assert_eq!(sorted.len(), registry.len());
        let unique: HashSet<_> = sorted.iter().copied().collect();
        assert_eq!(unique.len(), sorted.len());

        for (position, &id) in sorted.iter().enumerate() {
            if let Some(parent) = registry.parent_network_object(graph, id) {
                let parent_position = sorted.iter().position(|&p| p == parent).unwrap();
                assert!(parent_position < position, "{} listed before its parent {}", id, parent);
            }
        }
    }

    #[test]
    fn test_add_marks_dirty_and_publishes() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut graph = SceneGraph::new();
        let mut registry = NetworkObjectRegistry::new();
        let sink = Rc::clone(&events);
        registry.subscribe(move |event| sink.borrow_mut().push(*event));

        let root = graph.root();
        let (_, id) = spawn(&mut graph, &mut registry, root, "a");

        assert!(registry.is_dirty(id));
        assert_eq!(*events.borrow(), vec![NetworkObjectEvent::Added(id)]);
    }

    #[test]
    fn test_update_clears_all_flags_and_is_idempotent() {
        let mut graph = SceneGraph::new();
        let mut registry = NetworkObjectRegistry::new();
        let root = graph.root();
        let (a, _) = spawn(&mut graph, &mut registry, root, "a");
        spawn(&mut graph, &mut registry, a, "b");
        spawn(&mut graph, &mut registry, root, "c");
        assert_eq!(registry.dirty_count(), 3);

        registry.update_network_objects(&mut graph);
        assert_eq!(registry.dirty_count(), 0);

        registry.update_network_objects(&mut graph);
        assert_eq!(registry.dirty_count(), 0);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_update_links_parent_and_refreshes_transform() {
        let mut graph = SceneGraph::new();
        let mut registry = NetworkObjectRegistry::new();
        let root = graph.root();
        let (a, a_id) = spawn(&mut graph, &mut registry, root, "a");
        let plain = graph.create_child(a, "plain").unwrap();
        let (b, _) = spawn(&mut graph, &mut registry, plain, "b");
        graph.set_transform(a, Transform::from_position(Vec3::new(0.0, 3.0, 0.0))).unwrap();

        registry.update_network_objects(&mut graph);

        assert_eq!(graph.network_object(b).unwrap().parent_network_id(), Some(a_id));
        assert!(!graph.is_world_dirty(b));
        let world = graph.world_transform(b).unwrap();
        assert_relative_eq!(translation_of(&world), Vec3::new(0.0, 3.0, 0.0));
    }

    #[test]
    fn test_removing_child_dirties_parent() {
        let mut graph = SceneGraph::new();
        let mut registry = NetworkObjectRegistry::new();
        let root = graph.root();
        let (a, a_id) = spawn(&mut graph, &mut registry, root, "a");
        let (b, b_id) = spawn(&mut graph, &mut registry, a, "b");
        registry.update_network_objects(&mut graph);

        graph.remove_node(b, &mut registry).unwrap();

        assert!(registry.is_dirty(a_id));
        assert_eq!(registry.network_object(b_id, true), None);
        assert_eq!(registry.children_network_objects(&graph, a_id), Vec::<NetworkId>::new());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_queue_update_rejects_recreated_slot() {
        let mut graph = SceneGraph::new();
        let mut registry = NetworkObjectRegistry::new();
        let root = graph.root();
        let (old_node, old_id) = spawn(&mut graph, &mut registry, root, "old");
        registry.update_network_objects(&mut graph);

        graph.remove_node(old_node, &mut registry).unwrap();
        let (new_node, new_id) = spawn(&mut graph, &mut registry, root, "new");
        registry.update_network_objects(&mut graph);
        assert_eq!(new_id.index, old_id.index);
        assert_ne!(new_id.version, old_id.version);

        assert!(!registry.queue_network_object_update_by_id(old_id));
        assert!(!registry.queue_network_object_update(&graph, old_node));
        assert!(!registry.is_dirty(new_id));
        assert_eq!(registry.dirty_count(), 0);

        assert!(registry.queue_network_object_update(&graph, new_node));
        assert!(registry.is_dirty(new_id));
    }

    #[test]
    fn test_sorted_objects_parents_first() {
        let mut graph = SceneGraph::new();
        let mut registry = NetworkObjectRegistry::new();
        let root = graph.root();

        // Children registered before their parents
        let holder = graph.create_child(root, "holder").unwrap();
        let leaf = graph.create_child(holder, "leaf").unwrap();
        graph.add_network_object(leaf, NetworkObject::new(), &mut registry).unwrap();
        graph.add_network_object(holder, NetworkObject::new(), &mut registry).unwrap();

        let (x, _) = spawn(&mut graph, &mut registry, root, "x");
        let (y, _) = spawn(&mut graph, &mut registry, x, "y");
        spawn(&mut graph, &mut registry, y, "z");
        spawn(&mut graph, &mut registry, x, "w");
        assert_parents_first(&graph, &registry);

        graph.set_parent(x, leaf).unwrap();
        assert_parents_first(&graph, &registry);

        graph.remove_node(y, &mut registry).unwrap();
        assert_parents_first(&graph, &registry);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_remove_all_network_objects() {
        let mut graph = SceneGraph::new();
        let mut registry = NetworkObjectRegistry::new();
        let root = graph.root();
        let (a, _) = spawn(&mut graph, &mut registry, root, "A");
        let (b, _) = spawn(&mut graph, &mut registry, a, "B");
        spawn(&mut graph, &mut registry, b, "C");
        let bystander = graph.create_child(root, "no network object").unwrap();

        registry.remove_all_network_objects(&mut graph);

        assert_eq!(registry.dirty_count(), 0);
        assert_eq!(registry.len(), 0);
        assert!(registry.is_empty());
        assert!(graph.contains(bystander));
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn test_remove_all_network_objects_in_large_scene() {
        let mut graph = SceneGraph::new();
        let mut registry = NetworkObjectRegistry::new();
        let root = graph.root();

        // Wide layer under the root plus a few deep chains
        let mut tips = Vec::new();
        for i in 0..10_000 {
            let (node, _) = spawn(&mut graph, &mut registry, root, &format!("flat {}", i));
            if i % 1_000 == 0 {
                tips.push(node);
            }
        }
        for tip in tips {
            let mut parent = tip;
            for depth in 0..100 {
                parent = spawn(&mut graph, &mut registry, parent, &format!("deep {}", depth)).0;
            }
        }
        assert_eq!(registry.len(), 11_000);

        registry.remove_all_network_objects(&mut graph);

        assert!(registry.is_empty());
        assert_eq!(registry.dirty_count(), 0);
        assert_eq!(graph.node_count(), 1);
        assert!(graph.node(root).unwrap().children().is_empty());
    }

    #[test]
    fn test_root_never_registers() {
        let mut graph = SceneGraph::new();
        let mut registry = NetworkObjectRegistry::new();
        let root = graph.root();

        let result = graph.add_network_object(root, NetworkObject::new(), &mut registry);
        assert_eq!(result, Err(SceneError::RootNode));
        assert!(registry.is_empty());

        spawn(&mut graph, &mut registry, root, "a");
        registry.remove_all_network_objects(&mut graph);
        assert!(registry.is_empty());
        assert_eq!(graph.node_count(), 1);
    }

    fn pick(rng: &mut StdRng, nodes: &[NodeId], skip_root: bool) -> Option<NodeId> {
        let start = usize::from(skip_root);
        (nodes.len() > start).then(|| nodes[rng.gen_range(start..nodes.len())])
    }

    #[test]
    fn test_sorted_objects_parents_first_under_random_edits() {
        for seed in [1_u64, 7, 42, 1337] {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut graph = SceneGraph::new();
            let mut registry = NetworkObjectRegistry::new();
            // Index 0 is always the root
            let mut nodes = vec![graph.root()];

            for step in 0..400 {
                match rng.gen_range(0..10) {
                    0..=3 => {
                        let parent = pick(&mut rng, &nodes, false).unwrap();
                        let node = graph.create_child(parent, format!("n{}", step)).unwrap();
                        if rng.gen_bool(0.7) {
                            graph.add_network_object(node, NetworkObject::new(), &mut registry).unwrap();
                        }
                        nodes.push(node);
                    }
                    4..=5 => {
                        if let Some(node) = pick(&mut rng, &nodes, true) {
                            graph.remove_node(node, &mut registry).unwrap();
                            nodes.retain(|&n| graph.contains(n));
                        }
                    }
                    6..=7 => {
                        let (Some(node), Some(parent)) = (pick(&mut rng, &nodes, true), pick(&mut rng, &nodes, false)) else {
                            continue;
                        };
                        match graph.set_parent(node, parent) {
                            Ok(()) | Err(SceneError::CyclicParent { .. }) => {}
                            Err(err) => panic!("seed {} step {}: {}", seed, step, err),
                        }
                    }
                    _ => {
                        if let Some(node) = pick(&mut rng, &nodes, true) {
                            if graph.network_object(node).is_some() {
                                graph.remove_network_object(node, &mut registry).unwrap();
                            } else {
                                graph.add_network_object(node, NetworkObject::new(), &mut registry).unwrap();
                            }
                        }
                    }
                }
                if rng.gen_bool(0.3) {
                    registry.update_network_objects(&mut graph);
                }

                assert_parents_first(&graph, &registry);
                let carrying = nodes.iter().filter(|&&n| graph.network_object(n).is_some()).count();
                assert_eq!(registry.len(), carrying, "seed {} step {}", seed, step);
            }
        }
    }
}
