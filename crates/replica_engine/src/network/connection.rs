//! Connection abstraction consumed by replication

use std::fmt;

use log::trace;

use super::protocol::MessageId;

/// Identifier of a connection, unique within one transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Delivery guarantees requested for a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryClass {
    /// Delivered once, in send order
    ReliableOrdered,
    /// Delivered once, any order
    ReliableUnordered,
    /// May be dropped, never delivered out of order
    UnreliableOrdered,
    /// May be dropped or reordered
    UnreliableUnordered,
}

impl DeliveryClass {
    /// Whether delivery is guaranteed
    pub fn is_reliable(self) -> bool {
        matches!(self, Self::ReliableOrdered | Self::ReliableUnordered)
    }
}

/// A link to one remote peer.
///
/// Methods take `&self`; implementations that buffer outgoing data use
/// interior mutability. Replication keeps connections behind `Rc`/`Weak`.
pub trait Connection {
    /// Transport-level identifier
    fn id(&self) -> ConnectionId;

    /// Whether the system clock is synchronized with the remote peer
    fn is_clock_synchronized(&self) -> bool;

    /// Queue an encoded message for sending
    fn send_message(&self, message_id: MessageId, payload: &[u8], delivery: DeliveryClass);

    /// Log a decoded incoming message
    fn log_message_payload(&self, message_id: MessageId, payload: &dyn fmt::Debug) {
        trace!("{}: received {:?} {:?}", self.id(), message_id, payload);
    }
}
