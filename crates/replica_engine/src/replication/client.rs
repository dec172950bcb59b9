//! Client side of scene replication after the handshake

use std::rc::{Rc, Weak};

use log::warn;

use crate::config::NetworkSettings;
use crate::events::{Event, EventArg, EventSystem, EventType, P_FRAME};
use crate::network::{read_serialized, Connection, MessageId, MsgSceneClock};

/// Observer state of a synchronized client.
///
/// Times are kept in fractional network frames. The replica time trails the
/// latest known server frame by the interpolation delay and never passes it;
/// the input time runs `input_delay` frames ahead of the server.
pub struct ClientReplica {
    connection: Weak<dyn Connection>,
    settings: NetworkSettings,
    latest_server_frame: u32,
    latest_server_time: f64,
    input_delay: u32,
    replica_time: f64,
    input_time: f64,
}

impl ClientReplica {
    /// Create a replica from the handshake results
    pub fn new(connection: Weak<dyn Connection>, initial_clock: MsgSceneClock, settings: NetworkSettings) -> Self {
        let frequency = f64::from(settings.update_frequency.max(1));
        let latest = f64::from(initial_clock.latest_frame);
        let interpolation_frames = f64::from(settings.interpolation_delay) * frequency;
        Self {
            connection,
            latest_server_frame: initial_clock.latest_frame,
            latest_server_time: initial_clock.latest_frame_time,
            input_delay: initial_clock.input_delay,
            replica_time: (latest - interpolation_frames).max(0.0),
            input_time: latest + f64::from(initial_clock.input_delay),
            settings,
        }
    }

    /// Connection to the server, if it is still alive
    pub fn connection(&self) -> Option<Rc<dyn Connection>> {
        self.connection.upgrade()
    }

    /// Settings received from the server
    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    /// Network frames per second
    pub fn update_frequency(&self) -> u32 {
        self.settings.update_frequency
    }

    /// Latest frame reported by the server
    pub fn latest_server_frame(&self) -> u32 {
        self.latest_server_frame
    }

    /// Server time of the latest reported frame
    pub fn latest_server_time(&self) -> f64 {
        self.latest_server_time
    }

    /// Replica time in frames
    pub fn replica_time(&self) -> f64 {
        self.replica_time
    }

    /// Input time in frames
    pub fn input_time(&self) -> f64 {
        self.input_time
    }

    /// Handle a server message. Returns false if the message is not ours.
    pub fn process_message(&mut self, connection: &dyn Connection, message_id: MessageId, payload: &[u8]) -> bool {
        if message_id != MessageId::SceneClock {
            return false;
        }

        match read_serialized::<MsgSceneClock>(payload) {
            Ok(msg) => {
                connection.log_message_payload(message_id, &msg);
                // Unreliable updates may arrive out of order
                if msg.latest_frame >= self.latest_server_frame {
                    self.latest_server_frame = msg.latest_frame;
                    self.latest_server_time = msg.latest_frame_time;
                    self.input_delay = msg.input_delay;
                    let floor = f64::from(self.latest_server_frame) + f64::from(self.input_delay);
                    self.input_time = self.input_time.max(floor);
                }
            }
            Err(err) => warn!("Ignoring malformed {:?}: {}", message_id, err),
        }
        true
    }

    /// Advance replica and input time on update, forward events on both ticks
    pub fn process_scene_update(&mut self, kind: EventType, events: &mut EventSystem, time_step: f32) {
        if kind == EventType::SceneNetworkUpdate {
            let frames = f64::from(time_step.max(0.0)) * f64::from(self.update_frequency().max(1));
            self.replica_time = (self.replica_time + frames).min(f64::from(self.latest_server_frame));
            self.input_time += frames;
        }

        // Replica time is non-negative and bounded by a u32 frame
        let replica_frame = self.replica_time.floor() as u32;
        events.send(Event::network_update(kind, time_step, time_step).with_arg(P_FRAME, EventArg::Frame(replica_frame)));
    }

    /// Human-readable replica state
    pub fn debug_info(&self) -> String {
        format!(
            "Client: replica frame {:.2}, input frame {:.2}, server frame {}",
            self.replica_time, self.input_time, self.latest_server_frame,
        )
    }
}
