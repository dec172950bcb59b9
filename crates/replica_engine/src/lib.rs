//! # Replica Engine
//!
//! Scene replication layer of a modular game engine.
//!
//! ## Features
//!
//! - **Modes**: Standalone, authoritative server or observing client
//! - **Handshake**: Settings and clock exchange before a client replicates
//! - **Network Objects**: Versioned ids, dirty tracking and parent-first ordering
//! - **Transport Agnostic**: Works over any [`network::Connection`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use replica_engine::prelude::*;
//!
//! fn main() -> Result<(), SceneError> {
//!     let mut scene = Scene::with_replication(ReplicationManager::new(ReplicationConfig::default()));
//!     let root = scene.root();
//!     let ship = scene.create_node(root, "ship")?;
//!     scene.add_network_object(ship, NetworkObject::new())?;
//!
//!     scene.start_server();
//!     scene.update(1.0 / 60.0);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod foundation;
pub mod config;
pub mod events;
pub mod scene;
pub mod network;
pub mod replication;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, NetworkSettings, ReplicationConfig},
        events::{Event, EventArg, EventSystem, EventType},
        foundation::math::{Mat4, Transform, Vec3},
        network::{Connection, ConnectionId, DeliveryClass, MessageId},
        replication::{
            NetworkBehavior, NetworkId, NetworkObject, NetworkObjectMode, ReplicationManager,
            ReplicationManagerMode,
        },
        scene::{Scene, SceneError, SceneGraph},
    };
}
