//! Scene event system
//!
//! Key principles:
//! - Key-value arguments (no order dependency)
//! - Handler returns bool (true = consumed, stops forwarding)
//! - Registration system (only notify interested handlers)
//! - Events sent during a tick are delivered by the next `dispatch`

use std::collections::HashMap;

/// Event type identification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Scene logic update tick
    SceneUpdate,
    /// Scene logic post-update tick
    ScenePostUpdate,
    /// Replication-aware update, sent by the active replication mode
    SceneNetworkUpdate,
    /// Replication-aware post-update, sent by the active replication mode
    SceneNetworkPostUpdate,
}

/// Variant for type-safe event arguments
#[derive(Debug, Clone, PartialEq)]
pub enum EventArg {
    /// Time step in seconds
    TimeStep(f32),
    /// Network frame number
    Frame(u32),
}

/// Argument key: scene time step
pub const P_TIMESTEP: &str = "timestep";
/// Argument key: time step of replicated (interpolated) state
pub const P_TIMESTEP_REPLICA: &str = "timestep_replica";
/// Argument key: time step of locally predicted input
pub const P_TIMESTEP_INPUT: &str = "timestep_input";
/// Argument key: network frame the event belongs to
pub const P_FRAME: &str = "frame";

/// Event with type ID and key-value arguments
#[derive(Debug, Clone)]
pub struct Event {
    /// Type of event
    pub event_type: EventType,
    args: HashMap<&'static str, EventArg>,
}

impl Event {
    /// Create a new event with the given type
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            args: HashMap::new(),
        }
    }

    /// Network update event carrying both replica and input time steps
    pub fn network_update(event_type: EventType, timestep_replica: f32, timestep_input: f32) -> Self {
        Self::new(event_type)
            .with_arg(P_TIMESTEP_REPLICA, EventArg::TimeStep(timestep_replica))
            .with_arg(P_TIMESTEP_INPUT, EventArg::TimeStep(timestep_input))
    }

    /// Add an argument to the event (builder pattern)
    pub fn with_arg(mut self, key: &'static str, value: EventArg) -> Self {
        self.args.insert(key, value);
        self
    }

    /// Get an argument by key
    pub fn get_arg(&self, key: &str) -> Option<&EventArg> {
        self.args.get(key)
    }

    /// Get a time step argument if present
    pub fn get_timestep(&self, key: &str) -> Option<f32> {
        if let Some(EventArg::TimeStep(step)) = self.get_arg(key) {
            Some(*step)
        } else {
            None
        }
    }

    /// Get the frame argument if present
    pub fn get_frame(&self) -> Option<u32> {
        if let Some(EventArg::Frame(frame)) = self.get_arg(P_FRAME) {
            Some(*frame)
        } else {
            None
        }
    }
}

/// Event handler trait
/// Returns true if event was consumed (stops forwarding)
/// Returns false to allow forwarding to other handlers
pub trait EventHandler {
    /// Handle an event, return true if consumed
    fn on_event(&mut self, event: &Event) -> bool;
}

impl<F> EventHandler for F
where
    F: FnMut(&Event) -> bool,
{
    fn on_event(&mut self, event: &Event) -> bool {
        self(event)
    }
}

/// Event system with registration and queuing
/// Follows chain of responsibility pattern
#[derive(Default)]
pub struct EventSystem {
    queue: Vec<Event>,
    handlers: HashMap<EventType, Vec<Box<dyn EventHandler>>>,
}

impl EventSystem {
    /// Create a new empty event system
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a specific event type
    /// Only handlers registered for this type will be notified
    pub fn register_handler(&mut self, event_type: EventType, handler: Box<dyn EventHandler>) {
        self.handlers
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    /// Queue an event for the next dispatch
    pub fn send(&mut self, event: Event) {
        self.queue.push(event);
    }

    /// Number of events waiting for dispatch
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Dispatch all pending events in send order
    pub fn dispatch(&mut self) {
        let pending = std::mem::take(&mut self.queue);
        for event in pending {
            self.dispatch_event(&event);
        }
    }

    /// Dispatch single event to registered handlers
    /// Stops on first handler that returns true (consumed)
    fn dispatch_event(&mut self, event: &Event) {
        if let Some(handlers) = self.handlers.get_mut(&event.event_type) {
            for handler in handlers.iter_mut() {
                if handler.on_event(event) {
                    break;
                }
            }
        }
    }
}
