//! Replication mode state machine
//!
//! A [`ReplicationManager`] is in exactly one of three modes:
//!
//! ```text
//!            start_server()            start_client(conn)
//! Standalone ──────────────► Server    Standalone ──────────► Client
//!     ▲                        │           ▲                    │
//!     └────────── stop() ──────┘           └────── stop() ──────┘
//! ```
//!
//! Every `start_*` call stops the previous mode first. A client stays in its
//! handshake sub-state until `Configure`, `SceneClock` and a synchronized
//! connection clock are all available; only then is its [`ClientReplica`]
//! created and the `Synchronized` acknowledgement sent.

use std::collections::BTreeSet;
use std::rc::{Rc, Weak};

use log::{debug, error, info, warn};

use super::client::ClientReplica;
use super::network_object::{NetworkId, NetworkObjectMode};
use super::object_registry::NetworkObjectRegistry;
use super::server::ServerReplicator;
use crate::config::{NetworkSettings, ReplicationConfig};
use crate::events::{Event, EventSystem, EventType};
use crate::foundation::collections::NodeId;
use crate::network::{
    read_serialized, send_serialized, Connection, ConnectionId, DeliveryClass, MessageId,
    MsgConfigure, MsgSceneClock, MsgSynchronized,
};
use crate::scene::{ComponentListener, SceneGraph};

/// Replication mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicationManagerMode {
    /// No networking
    Standalone,
    /// Authoritative server
    Server,
    /// Observer of a remote server
    Client,
}

#[derive(Debug, Default)]
struct StandaloneData {
    recently_added: BTreeSet<NetworkId>,
}

/// Client state: handshake accumulator, then the replica
pub struct ClientData {
    connection: Weak<dyn Connection>,
    connection_id: ConnectionId,
    ack_magic: Option<u32>,
    server_settings: Option<NetworkSettings>,
    initial_clock: Option<MsgSceneClock>,
    replica: Option<ClientReplica>,
}

impl ClientData {
    fn new(connection: &Rc<dyn Connection>) -> Self {
        Self {
            connection: Rc::downgrade(connection),
            connection_id: connection.id(),
            ack_magic: None,
            server_settings: None,
            initial_clock: None,
            replica: None,
        }
    }

    /// Connection to the server, if it is still alive
    pub fn connection(&self) -> Option<Rc<dyn Connection>> {
        self.connection.upgrade()
    }

    /// Identifier of the server connection
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Magic received in `Configure`
    pub fn ack_magic(&self) -> Option<u32> {
        self.ack_magic
    }

    /// Whether `Configure` was received
    pub fn has_settings(&self) -> bool {
        self.server_settings.is_some()
    }

    /// Whether the initial `SceneClock` was received
    pub fn has_initial_clock(&self) -> bool {
        self.initial_clock.is_some()
    }

    /// Replica, once the handshake is complete
    pub fn replica(&self) -> Option<&ClientReplica> {
        self.replica.as_ref()
    }

    fn is_ready_to_initialize(&self) -> bool {
        self.ack_magic.is_some() && self.server_settings.is_some() && self.initial_clock.is_some()
    }

    fn try_initialize(&mut self, connection: &dyn Connection) -> bool {
        if self.replica.is_some() || !connection.is_clock_synchronized() || !self.is_ready_to_initialize() {
            return false;
        }
        let (Some(magic), Some(settings), Some(clock)) =
            (self.ack_magic, self.server_settings.clone(), self.initial_clock)
        else {
            return false;
        };

        self.replica = Some(ClientReplica::new(self.connection.clone(), clock, settings));

        let ack = MsgSynchronized { magic };
        if let Err(err) = send_serialized(connection, MessageId::Synchronized, &ack, DeliveryClass::ReliableUnordered) {
            error!("Cannot acknowledge replication handshake: {}", err);
        }
        info!("Client replica is synchronized with server at frame {}", clock.latest_frame);
        true
    }

    fn process_uninitialized_message(&mut self, connection: &dyn Connection, message_id: MessageId, payload: &[u8]) -> bool {
        match message_id {
            MessageId::Configure => match read_serialized::<MsgConfigure>(payload) {
                Ok(msg) => {
                    connection.log_message_payload(message_id, &msg);
                    if let Err(err) = msg.settings.validate() {
                        warn!("Ignoring server settings: {}", err);
                        return true;
                    }
                    self.ack_magic = Some(msg.magic);
                    self.server_settings = Some(msg.settings);
                }
                Err(err) => {
                    warn!("Ignoring malformed {:?}: {}", message_id, err);
                    return true;
                }
            },
            MessageId::SceneClock => match read_serialized::<MsgSceneClock>(payload) {
                Ok(msg) => {
                    connection.log_message_payload(message_id, &msg);
                    // Unreliable clock frames may arrive reordered
                    match self.initial_clock {
                        Some(latest) if latest.latest_frame > msg.latest_frame => {
                            debug!("Ignoring stale handshake clock for frame {}", msg.latest_frame);
                        }
                        _ => self.initial_clock = Some(msg),
                    }
                }
                Err(err) => {
                    warn!("Ignoring malformed {:?}: {}", message_id, err);
                    return true;
                }
            },
            MessageId::Synchronized => return false,
        }

        self.try_initialize(connection);
        true
    }

    fn uninitialized_debug_info(&self) -> String {
        let mut wait_list = Vec::new();
        if self.connection().is_some_and(|c| !c.is_clock_synchronized()) {
            wait_list.push("system clock");
        }
        if self.server_settings.is_none() {
            wait_list.push("settings");
        }
        if self.initial_clock.is_none() || wait_list.is_empty() {
            wait_list.push("server scene time");
        }

        format!("Connecting... Waiting for {}...", wait_list.join(", "))
    }
}

enum ModeState {
    Standalone(StandaloneData),
    Server(Box<ServerReplicator>),
    Client(Box<ClientData>),
}

/// Drives replication of one scene in the current mode
pub struct ReplicationManager {
    registry: NetworkObjectRegistry,
    config: ReplicationConfig,
    state: ModeState,
}

impl ReplicationManager {
    /// Create a manager in standalone mode
    pub fn new(config: ReplicationConfig) -> Self {
        Self {
            registry: NetworkObjectRegistry::new(),
            config,
            state: ModeState::Standalone(StandaloneData::default()),
        }
    }

    /// Network objects of the scene
    pub fn registry(&self) -> &NetworkObjectRegistry {
        &self.registry
    }

    /// Mutable access for subscriptions and queued updates
    pub fn registry_mut(&mut self) -> &mut NetworkObjectRegistry {
        &mut self.registry
    }

    /// Manager attributes
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Current mode
    pub fn mode(&self) -> ReplicationManagerMode {
        match self.state {
            ModeState::Standalone(_) => ReplicationManagerMode::Standalone,
            ModeState::Server(_) => ReplicationManagerMode::Server,
            ModeState::Client(_) => ReplicationManagerMode::Client,
        }
    }

    /// Whether no networking is active
    pub fn is_standalone(&self) -> bool {
        self.mode() == ReplicationManagerMode::Standalone
    }

    /// Whether this scene is a server
    pub fn is_server(&self) -> bool {
        self.mode() == ReplicationManagerMode::Server
    }

    /// Whether this scene is a client
    pub fn is_client(&self) -> bool {
        self.mode() == ReplicationManagerMode::Client
    }

    /// Server state in server mode
    pub fn server(&self) -> Option<&ServerReplicator> {
        match &self.state {
            ModeState::Server(server) => Some(&**server),
            _ => None,
        }
    }

    /// Client state in client mode
    pub fn client(&self) -> Option<&ClientData> {
        match &self.state {
            ModeState::Client(client) => Some(&**client),
            _ => None,
        }
    }

    /// Client replica once the handshake is complete
    pub fn client_replica(&self) -> Option<&ClientReplica> {
        self.client().and_then(ClientData::replica)
    }

    /// Whether a client finished its handshake
    pub fn is_client_synchronized(&self) -> bool {
        self.client_replica().is_some()
    }

    /// Objects added in standalone mode and not yet initialized
    pub fn pending_standalone_objects(&self) -> usize {
        match &self.state {
            ModeState::Standalone(standalone) => standalone.recently_added.len(),
            _ => 0,
        }
    }

    /// Leave the current mode and return to standalone
    pub fn stop(&mut self) {
        match std::mem::replace(&mut self.state, ModeState::Standalone(StandaloneData::default())) {
            ModeState::Client(_) => info!("Stopped client for scene replication"),
            ModeState::Server(_) => info!("Stopped server for scene replication"),
            ModeState::Standalone(_) => {}
        }
    }

    /// Run without networking, initializing every object immediately
    pub fn start_standalone(&mut self, graph: &mut SceneGraph) {
        self.stop();

        for (_, node) in self.registry.network_objects() {
            if let Some(object) = graph.network_object_mut(node) {
                object.set_network_mode(NetworkObjectMode::Standalone);
                object.initialize_standalone();
            }
        }

        info!("Started standalone scene replication");
    }

    /// Become the authoritative server for this scene
    pub fn start_server(&mut self, graph: &mut SceneGraph) {
        self.stop();

        let mut server = ServerReplicator::new(self.config.clone());
        for (network_id, node) in self.registry.network_objects() {
            initialize_on_server(graph, node);
            server.on_network_object_added(network_id);
        }
        self.state = ModeState::Server(Box::new(server));

        info!("Started server for scene replication");
    }

    /// Become a client of the server behind `connection`.
    ///
    /// Every local network object is removed; the scene waits for server state.
    pub fn start_client(&mut self, graph: &mut SceneGraph, connection: &Rc<dyn Connection>) {
        self.stop();

        self.state = ModeState::Client(Box::new(ClientData::new(connection)));
        self.registry.remove_all_network_objects(graph);

        info!("Started client for scene replication");
    }

    /// Start replicating to a client connection. Server mode only.
    pub fn add_connection(&mut self, connection: Rc<dyn Connection>) -> bool {
        match &mut self.state {
            ModeState::Server(server) => server.add_connection(connection),
            _ => {
                warn!("Cannot add connection {} outside of server mode", connection.id());
                false
            }
        }
    }

    /// Forget a connection. A client losing its server goes standalone.
    pub fn drop_connection(&mut self, graph: &mut SceneGraph, connection_id: ConnectionId) {
        let lost_server = self.client().is_some_and(|client| client.connection_id == connection_id);
        if let ModeState::Server(server) = &mut self.state {
            server.remove_connection(connection_id);
        } else if lost_server {
            info!("Connection {} to server is dropped", connection_id);
            self.start_standalone(graph);
        }
    }

    /// Route an inbound message. Returns whether it was consumed.
    pub fn process_message(&mut self, connection: &dyn Connection, message_id: u16, payload: &[u8]) -> bool {
        let Ok(message_id) = MessageId::try_from(message_id) else {
            return false;
        };

        match &mut self.state {
            ModeState::Client(client) => {
                if client.replica.is_none() {
                    return client.process_uninitialized_message(connection, message_id, payload);
                }
                client
                    .replica
                    .as_mut()
                    .is_some_and(|replica| replica.process_message(connection, message_id, payload))
            }
            ModeState::Server(server) => server.process_message(connection, message_id, payload),
            ModeState::Standalone(_) => false,
        }
    }

    /// Scene update tick
    pub fn on_scene_update(&mut self, graph: &mut SceneGraph, events: &mut EventSystem, time_step: f32) {
        self.handle_scene_update(EventType::SceneNetworkUpdate, graph, events, time_step);
    }

    /// Scene post-update tick; flushes dirty objects last
    pub fn on_scene_post_update(&mut self, graph: &mut SceneGraph, events: &mut EventSystem, time_step: f32) {
        self.handle_scene_update(EventType::SceneNetworkPostUpdate, graph, events, time_step);
        self.registry.update_network_objects(graph);
    }

    fn handle_scene_update(&mut self, kind: EventType, graph: &mut SceneGraph, events: &mut EventSystem, time_step: f32) {
        match &mut self.state {
            ModeState::Standalone(standalone) => {
                let recently_added = std::mem::take(&mut standalone.recently_added);
                initialize_objects_standalone(&self.registry, graph, &recently_added);

                events.send(Event::network_update(kind, time_step, time_step));
            }
            ModeState::Server(server) => {
                server.process_scene_update(kind, events, time_step);
            }
            ModeState::Client(client) => {
                if client.replica.is_none() {
                    if let Some(connection) = client.connection() {
                        client.try_initialize(connection.as_ref());
                    }
                }
                if let Some(replica) = client.replica.as_mut() {
                    replica.process_scene_update(kind, events, time_step);
                }
            }
        }
    }

    /// Request a hierarchy refresh of the object on `node`
    pub fn queue_network_object_update(&mut self, graph: &SceneGraph, node: NodeId) -> bool {
        self.registry.queue_network_object_update(graph, node)
    }

    /// Register a new network object
    pub fn on_component_added(&mut self, graph: &mut SceneGraph, node: NodeId) {
        if self.registry.registered_id(graph, node).is_some() {
            return;
        }
        self.registry.on_component_added(graph, node);
        let Some(network_id) = self.registry.registered_id(graph, node) else {
            return;
        };

        match &mut self.state {
            ModeState::Standalone(standalone) => {
                standalone.recently_added.insert(network_id);
            }
            ModeState::Server(server) => {
                initialize_on_server(graph, node);
                server.on_network_object_added(network_id);
            }
            ModeState::Client(_) => {
                if let Some(object) = graph.network_object_mut(node) {
                    object.set_network_mode(NetworkObjectMode::ClientReplicated);
                }
            }
        }
    }

    /// Unregister a network object
    pub fn on_component_removed(&mut self, graph: &mut SceneGraph, node: NodeId) {
        if let Some(network_id) = self.registry.registered_id(graph, node) {
            match &mut self.state {
                ModeState::Standalone(standalone) => {
                    standalone.recently_added.remove(&network_id);
                }
                ModeState::Server(server) => server.on_network_object_removed(network_id),
                ModeState::Client(_) => {}
            }
        }

        self.registry.on_component_removed(graph, node);
    }

    /// Settings of the active server or synchronized client
    pub fn settings(&self) -> Option<&NetworkSettings> {
        match &self.state {
            ModeState::Server(server) => Some(server.settings()),
            ModeState::Client(client) => client.replica().map(ClientReplica::settings),
            ModeState::Standalone(_) => None,
        }
    }

    /// Network frames per second, defaulted when no settings are active
    pub fn update_frequency(&self) -> u32 {
        self.settings()
            .map_or_else(|| NetworkSettings::default().update_frequency, |s| s.update_frequency)
    }

    /// Seconds of object history kept in the current mode
    pub fn trace_duration_in_seconds(&self) -> f32 {
        match &self.state {
            ModeState::Server(server) => server.settings().server_tracing_duration,
            ModeState::Client(client) => client
                .replica()
                .map_or(0.0, |replica| replica.settings().client_tracing_duration),
            ModeState::Standalone(_) => 0.0,
        }
    }

    /// Frames of object history kept in the current mode, at least one
    pub fn trace_duration_in_frames(&self) -> u32 {
        let frames = (self.trace_duration_in_seconds() * self.update_frequency() as f32).ceil();
        // Saturating float-to-int conversion
        (frames as u32).max(1)
    }

    /// Human-readable state for overlays and logs
    pub fn debug_info(&self) -> String {
        match &self.state {
            ModeState::Client(client) => match client.replica() {
                Some(replica) => replica.debug_info(),
                None => client.uninitialized_debug_info(),
            },
            ModeState::Server(server) => server.debug_info(),
            ModeState::Standalone(_) => String::new(),
        }
    }
}

impl Default for ReplicationManager {
    fn default() -> Self {
        Self::new(ReplicationConfig::default())
    }
}

impl ComponentListener for ReplicationManager {
    fn on_component_added(&mut self, graph: &mut SceneGraph, node: NodeId) {
        Self::on_component_added(self, graph, node);
    }

    fn on_component_removed(&mut self, graph: &mut SceneGraph, node: NodeId) {
        Self::on_component_removed(self, graph, node);
    }
}

fn initialize_on_server(graph: &mut SceneGraph, node: NodeId) {
    if let Some(object) = graph.network_object_mut(node) {
        object.set_network_mode(NetworkObjectMode::Server);
        object.initialize_on_server();
    }
}

fn initialize_objects_standalone(registry: &NetworkObjectRegistry, graph: &mut SceneGraph, recently_added: &BTreeSet<NetworkId>) {
    for &network_id in recently_added {
        let Some(object) = registry
            .network_object(network_id, true)
            .and_then(|node| graph.network_object_mut(node))
        else {
            error!("Cannot find recently added NetworkObject {}", network_id);
            continue;
        };

        object.set_network_mode(NetworkObjectMode::Standalone);
        object.initialize_standalone();
    }
}
