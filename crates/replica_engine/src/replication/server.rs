//! Server side of scene replication
//!
//! Owns the authoritative network clock and the handshake state of every
//! client connection. A connection is considered part of the replicated world
//! once it answers `Configure` with a `Synchronized` carrying the same magic.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use log::{info, warn};
use rand::Rng;

use super::network_object::NetworkId;
use crate::config::{NetworkSettings, ReplicationConfig};
use crate::events::{Event, EventArg, EventSystem, EventType, P_FRAME};
use crate::network::{
    read_serialized, send_serialized, Connection, ConnectionId, DeliveryClass, MessageId,
    MsgConfigure, MsgSceneClock, MsgSynchronized,
};

struct ClientConnection {
    connection: Rc<dyn Connection>,
    magic: u32,
    synchronized: bool,
}

/// Authoritative replication state of a server scene
pub struct ServerReplicator {
    config: ReplicationConfig,
    connections: BTreeMap<ConnectionId, ClientConnection>,
    objects: BTreeSet<NetworkId>,
    current_frame: u32,
    accumulated_time: f64,
    frames_this_tick: u32,
}

impl ServerReplicator {
    /// Create a server with no connections at frame 0
    pub fn new(config: ReplicationConfig) -> Self {
        Self {
            config,
            connections: BTreeMap::new(),
            objects: BTreeSet::new(),
            current_frame: 0,
            accumulated_time: 0.0,
            frames_this_tick: 0,
        }
    }

    /// Settings pushed to clients
    pub fn settings(&self) -> &NetworkSettings {
        &self.config.settings
    }

    /// Network frames per second
    pub fn update_frequency(&self) -> u32 {
        self.config.settings.update_frequency
    }

    /// Latest simulated network frame
    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }

    /// Server time of the latest frame in seconds
    pub fn current_frame_time(&self) -> f64 {
        f64::from(self.current_frame) * f64::from(self.settings().frame_duration())
    }

    /// Number of connected clients
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of clients that completed the handshake
    pub fn synchronized_connection_count(&self) -> usize {
        self.connections.values().filter(|c| c.synchronized).count()
    }

    /// Whether a client completed the handshake
    pub fn is_connection_synchronized(&self, id: ConnectionId) -> bool {
        self.connections.get(&id).is_some_and(|c| c.synchronized)
    }

    /// Number of objects replicated by this server
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Start replicating to a new client: sends `Configure` and the current clock
    pub fn add_connection(&mut self, connection: Rc<dyn Connection>) -> bool {
        let id = connection.id();
        if self.connections.contains_key(&id) {
            warn!("Connection {} is already replicated", id);
            return false;
        }

        let magic: u32 = rand::thread_rng().gen();
        let configure = MsgConfigure { magic, settings: self.config.settings.clone() };
        let clock = self.scene_clock();
        let sent = send_serialized(connection.as_ref(), MessageId::Configure, &configure, DeliveryClass::ReliableOrdered)
            .and_then(|()| send_serialized(connection.as_ref(), MessageId::SceneClock, &clock, DeliveryClass::ReliableOrdered));
        if let Err(err) = sent {
            warn!("Cannot start replication for connection {}: {}", id, err);
            return false;
        }

        self.connections.insert(id, ClientConnection { connection, magic, synchronized: false });
        info!("Connection {} is added to scene replication", id);
        true
    }

    /// Stop replicating to a client
    pub fn remove_connection(&mut self, id: ConnectionId) -> bool {
        let removed = self.connections.remove(&id).is_some();
        if removed {
            info!("Connection {} is removed from scene replication", id);
        }
        removed
    }

    /// Handle a client message. Returns false if the message is not ours.
    pub fn process_message(&mut self, connection: &dyn Connection, message_id: MessageId, payload: &[u8]) -> bool {
        if message_id != MessageId::Synchronized {
            return false;
        }
        let id = connection.id();
        let Some(client) = self.connections.get_mut(&id) else {
            return false;
        };

        match read_serialized::<MsgSynchronized>(payload) {
            Ok(msg) => {
                connection.log_message_payload(message_id, &msg);
                if msg.magic != client.magic {
                    warn!("Connection {} acknowledged with unexpected magic {}", id, msg.magic);
                } else if !client.synchronized {
                    client.synchronized = true;
                    info!("Connection {} is synchronized", id);
                }
            }
            Err(err) => warn!("Ignoring malformed {:?} from {}: {}", message_id, id, err),
        }
        true
    }

    /// Object registered while serving
    pub fn on_network_object_added(&mut self, network_id: NetworkId) {
        self.objects.insert(network_id);
    }

    /// Object removed while serving
    pub fn on_network_object_removed(&mut self, network_id: NetworkId) {
        self.objects.remove(&network_id);
    }

    /// Advance the clock on update, broadcast it on post-update
    pub fn process_scene_update(&mut self, kind: EventType, events: &mut EventSystem, time_step: f32) {
        match kind {
            EventType::SceneNetworkUpdate => {
                self.frames_this_tick = self.advance_clock(time_step);
                self.send_network_events(kind, events, time_step);
            }
            EventType::SceneNetworkPostUpdate => {
                self.send_network_events(kind, events, time_step);
                if self.frames_this_tick > 0 || self.config.allow_zero_updates_on_server {
                    self.broadcast_clock();
                }
            }
            _ => {}
        }
    }

    fn advance_clock(&mut self, time_step: f32) -> u32 {
        let frame_duration = f64::from(self.settings().frame_duration());
        self.accumulated_time += f64::from(time_step.max(0.0));

        let mut frames = 0;
        while self.accumulated_time + 1e-9 >= frame_duration {
            self.accumulated_time -= frame_duration;
            frames += 1;
        }
        self.current_frame = self.current_frame.wrapping_add(frames);
        frames
    }

    fn send_network_events(&self, kind: EventType, events: &mut EventSystem, time_step: f32) {
        if !self.config.is_fixed_update_server {
            events.send(Event::network_update(kind, time_step, time_step).with_arg(P_FRAME, EventArg::Frame(self.current_frame)));
            return;
        }

        let frame_duration = self.settings().frame_duration();
        let first_frame = self.current_frame.wrapping_sub(self.frames_this_tick);
        for offset in 1..=self.frames_this_tick {
            let frame = first_frame.wrapping_add(offset);
            events.send(Event::network_update(kind, frame_duration, frame_duration).with_arg(P_FRAME, EventArg::Frame(frame)));
        }
        if self.frames_this_tick == 0 && self.config.allow_zero_updates_on_server {
            events.send(Event::network_update(kind, 0.0, 0.0).with_arg(P_FRAME, EventArg::Frame(self.current_frame)));
        }
    }

    fn scene_clock(&self) -> MsgSceneClock {
        MsgSceneClock {
            latest_frame: self.current_frame,
            latest_frame_time: self.current_frame_time(),
            input_delay: self.config.settings.input_delay_frames,
        }
    }

    fn broadcast_clock(&self) {
        let clock = self.scene_clock();
        for (id, client) in &self.connections {
            let sent = send_serialized(client.connection.as_ref(), MessageId::SceneClock, &clock, DeliveryClass::UnreliableUnordered);
            if let Err(err) = sent {
                warn!("Cannot send clock to connection {}: {}", id, err);
            }
        }
    }

    /// Human-readable server state
    pub fn debug_info(&self) -> String {
        format!(
            "Server: frame {}, {} connection(s) ({} synchronized), {} object(s)",
            self.current_frame,
            self.connection_count(),
            self.synchronized_connection_count(),
            self.object_count(),
        )
    }
}
