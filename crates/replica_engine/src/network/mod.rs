//! Network collaborator surface
//!
//! The replication layer never touches sockets. It talks to a [`Connection`]
//! that can send tagged messages with a [`DeliveryClass`] and report whether
//! its clock is synchronized with the remote end. Message payloads are defined
//! in [`protocol`].

pub mod connection;
pub mod protocol;

pub use connection::{Connection, ConnectionId, DeliveryClass};
pub use protocol::{
    read_serialized, send_serialized, MessageId, MsgConfigure, MsgSceneClock, MsgSynchronized,
    ProtocolError,
};
