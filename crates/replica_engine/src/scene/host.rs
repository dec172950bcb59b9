//! Scene with an attachable replication manager
//!
//! The scene owns its graph, its event system and at most one
//! [`ReplicationManager`]. Attaching a manager registers every existing
//! network object with it and subscribes it to update ticks; detaching stops
//! the manager and unregisters everything again.

use std::rc::Rc;

use log::warn;

use super::graph::{ComponentListener, NullListener, SceneError, SceneGraph};
use crate::events::{Event, EventArg, EventSystem, EventType, P_TIMESTEP};
use crate::foundation::collections::NodeId;
use crate::foundation::math::Transform;
use crate::network::{Connection, ConnectionId};
use crate::replication::{NetworkId, NetworkObject, ReplicationManager};

/// A scene driven by update ticks
#[derive(Default)]
pub struct Scene {
    graph: SceneGraph,
    events: EventSystem,
    replication: Option<ReplicationManager>,
}

impl Scene {
    /// Create an empty scene without replication
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty scene with `manager` attached
    pub fn with_replication(manager: ReplicationManager) -> Self {
        let mut scene = Self::new();
        scene.attach_replication(manager);
        scene
    }

    /// Scene tree
    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    /// Mutable scene tree. Component changes should go through the scene.
    pub fn graph_mut(&mut self) -> &mut SceneGraph {
        &mut self.graph
    }

    /// Scene event system
    pub fn events_mut(&mut self) -> &mut EventSystem {
        &mut self.events
    }

    /// Root node
    pub fn root(&self) -> NodeId {
        self.graph.root()
    }

    /// Attached replication manager
    pub fn replication(&self) -> Option<&ReplicationManager> {
        self.replication.as_ref()
    }

    /// Attached replication manager
    pub fn replication_mut(&mut self) -> Option<&mut ReplicationManager> {
        self.replication.as_mut()
    }

    fn with_listener<R>(&mut self, f: impl FnOnce(&mut SceneGraph, &mut dyn ComponentListener) -> R) -> R {
        let mut detached = NullListener;
        match self.replication.as_mut() {
            Some(manager) => f(&mut self.graph, manager),
            None => f(&mut self.graph, &mut detached),
        }
    }

    /// Attach a manager, replacing and returning the previous one
    pub fn attach_replication(&mut self, mut manager: ReplicationManager) -> Option<ReplicationManager> {
        let previous = self.detach_replication();
        if !manager.registry().is_empty() {
            warn!("Attached ReplicationManager already tracks {} objects", manager.registry().len());
        }

        for node in self.graph.subtree_pre_order(self.graph.root()) {
            if self.graph.network_object(node).is_some() {
                manager.on_component_added(&mut self.graph, node);
            }
        }
        self.replication = Some(manager);
        previous
    }

    /// Stop and detach the manager, unregistering every network object
    pub fn detach_replication(&mut self) -> Option<ReplicationManager> {
        let mut manager = self.replication.take()?;
        manager.stop();

        for node in self.graph.subtree_post_order(self.graph.root()) {
            if self.graph.network_object(node).is_some() {
                manager.on_component_removed(&mut self.graph, node);
            }
        }
        Some(manager)
    }

    /// Create a node under `parent`
    pub fn create_node(&mut self, parent: NodeId, name: impl Into<String>) -> Result<NodeId, SceneError> {
        self.graph.create_child(parent, name)
    }

    /// Replace the local transform of a node
    pub fn set_transform(&mut self, node: NodeId, transform: Transform) -> Result<(), SceneError> {
        self.graph.set_transform(node, transform)
    }

    /// Move a node and queue hierarchy updates for the network objects it carries
    pub fn set_parent(&mut self, node: NodeId, parent: NodeId) -> Result<(), SceneError> {
        self.graph.set_parent(node, parent)?;

        if let Some(manager) = self.replication.as_mut() {
            for moved in self.graph.subtree_pre_order(node) {
                if manager.registry().registered_id(&self.graph, moved).is_some() {
                    manager.queue_network_object_update(&self.graph, moved);
                }
            }
        }
        Ok(())
    }

    /// Attach a network object to a node. Returns the issued id, or `NONE`
    /// when no manager is attached.
    pub fn add_network_object(&mut self, node: NodeId, object: NetworkObject) -> Result<NetworkId, SceneError> {
        self.with_listener(|graph, listener| graph.add_network_object(node, object, listener))?;
        Ok(self
            .graph
            .network_object(node)
            .map_or(NetworkId::NONE, NetworkObject::network_id))
    }

    /// Detach the network object of a node
    pub fn remove_network_object(&mut self, node: NodeId) -> Result<NetworkObject, SceneError> {
        self.with_listener(|graph, listener| graph.remove_network_object(node, listener))
    }

    /// Remove a node and its subtree
    pub fn remove_node(&mut self, node: NodeId) -> Result<(), SceneError> {
        self.with_listener(|graph, listener| graph.remove_node(node, listener))
    }

    /// Run one frame: update tick, then post-update tick
    pub fn update(&mut self, time_step: f32) {
        self.events.send(Event::new(EventType::SceneUpdate).with_arg(P_TIMESTEP, EventArg::TimeStep(time_step)));
        self.events.dispatch();
        if let Some(manager) = self.replication.as_mut() {
            manager.on_scene_update(&mut self.graph, &mut self.events, time_step);
            self.events.dispatch();
        }

        self.events.send(Event::new(EventType::ScenePostUpdate).with_arg(P_TIMESTEP, EventArg::TimeStep(time_step)));
        self.events.dispatch();
        if let Some(manager) = self.replication.as_mut() {
            manager.on_scene_post_update(&mut self.graph, &mut self.events, time_step);
            self.events.dispatch();
        }
    }

    /// Switch the attached manager to standalone mode
    pub fn start_standalone(&mut self) -> bool {
        let Some(manager) = self.replication.as_mut() else { return false };
        manager.start_standalone(&mut self.graph);
        true
    }

    /// Switch the attached manager to server mode
    pub fn start_server(&mut self) -> bool {
        let Some(manager) = self.replication.as_mut() else { return false };
        manager.start_server(&mut self.graph);
        true
    }

    /// Switch the attached manager to client mode
    pub fn start_client(&mut self, connection: &Rc<dyn Connection>) -> bool {
        let Some(manager) = self.replication.as_mut() else { return false };
        manager.start_client(&mut self.graph, connection);
        true
    }

    /// Return the attached manager to standalone without re-initializing objects
    pub fn stop(&mut self) {
        if let Some(manager) = self.replication.as_mut() {
            manager.stop();
        }
    }

    /// Start replicating to a client connection
    pub fn add_connection(&mut self, connection: Rc<dyn Connection>) -> bool {
        self.replication
            .as_mut()
            .is_some_and(|manager| manager.add_connection(connection))
    }

    /// Forget a connection
    pub fn drop_connection(&mut self, connection_id: ConnectionId) {
        if let Some(manager) = self.replication.as_mut() {
            manager.drop_connection(&mut self.graph, connection_id);
        }
    }

    /// Route an inbound message to the attached manager
    pub fn process_message(&mut self, connection: &dyn Connection, message_id: u16, payload: &[u8]) -> bool {
        self.replication
            .as_mut()
            .is_some_and(|manager| manager.process_message(connection, message_id, payload))
    }
}
