//! Replication handshake messages
//!
//! | Message        | Direction     | Delivery                       |
//! |----------------|---------------|--------------------------------|
//! | `Configure`    | server→client | reliable ordered               |
//! | `SceneClock`   | server→client | reliable first, then unreliable|
//! | `Synchronized` | client→server | reliable unordered             |
//!
//! Payloads are `serde` structs encoded with `bincode`.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::connection::{Connection, DeliveryClass};
use crate::config::NetworkSettings;

/// Wire identifiers of replication messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageId {
    /// Server settings and handshake magic
    Configure = 0x90,
    /// Server clock snapshot
    SceneClock = 0x91,
    /// Client acknowledges the handshake
    Synchronized = 0x92,
}

impl MessageId {
    /// Raw wire value
    pub fn raw(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for MessageId {
    type Error = ProtocolError;

    fn try_from(raw: u16) -> Result<Self, Self::Error> {
        match raw {
            0x90 => Ok(Self::Configure),
            0x91 => Ok(Self::SceneClock),
            0x92 => Ok(Self::Synchronized),
            other => Err(ProtocolError::UnknownMessage(other)),
        }
    }
}

/// Server→client: replication settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsgConfigure {
    /// Token the client echoes back in `Synchronized`
    pub magic: u32,
    /// Server settings bundle
    pub settings: NetworkSettings,
}

/// Server→client: authoritative clock
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MsgSceneClock {
    /// Latest simulated server frame
    pub latest_frame: u32,
    /// Server time of that frame in seconds
    pub latest_frame_time: f64,
    /// Frames of input delay the client should apply
    pub input_delay: u32,
}

/// Client→server: handshake acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgSynchronized {
    /// Magic from the `Configure` message
    pub magic: u32,
}

/// Message encoding errors
#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    /// Payload could not be encoded or decoded
    #[error("Malformed payload: {0}")]
    Codec(#[from] bincode::Error),

    /// Message id outside the replication range
    #[error("Unknown message id {0:#x}")]
    UnknownMessage(u16),
}

/// Decode a message payload
pub fn read_serialized<M: DeserializeOwned>(payload: &[u8]) -> Result<M, ProtocolError> {
    Ok(bincode::deserialize(payload)?)
}

/// Encode a message and send it over `connection`
pub fn send_serialized<M: Serialize>(
    connection: &dyn Connection,
    message_id: MessageId,
    message: &M,
    delivery: DeliveryClass,
) -> Result<(), ProtocolError> {
    let payload = bincode::serialize(message)?;
    connection.send_message(message_id, &payload, delivery);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_ids_round_trip_raw_values() {
        for id in [MessageId::Configure, MessageId::SceneClock, MessageId::Synchronized] {
            assert_eq!(MessageId::try_from(id.raw()).unwrap(), id);
        }
        assert!(matches!(MessageId::try_from(0x10), Err(ProtocolError::UnknownMessage(0x10))));
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let payload = bincode::serialize(&MsgConfigure { magic: 7, settings: NetworkSettings::default() }).unwrap();
        let result = read_serialized::<MsgConfigure>(&payload[..payload.len() / 2]);
        assert!(matches!(result, Err(ProtocolError::Codec(_))));
    }
}
