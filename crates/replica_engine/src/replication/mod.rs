//! Scene replication
//!
//! ## Architecture
//!
//! ```text
//! Scene update / post-update tick
//!      ↓
//! ReplicationManager (Standalone | Server | Client)
//!      ↓
//! ServerReplicator / ClientReplica
//!      ↓
//! NetworkObjectRegistry dirty flush (once per frame, last)
//! ```
//!
//! - [`TrackedComponentRegistry`] issues index/version references
//! - [`NetworkObjectRegistry`] tracks [`NetworkObject`]s, dirty flags and hierarchy order
//! - [`ReplicationManager`] owns the mode and routes messages and ticks

mod client;
mod manager;
mod network_object;
mod object_registry;
mod server;
mod tracked_registry;


pub use client::ClientReplica;
pub use manager::{ClientData, ReplicationManager, ReplicationManagerMode};
pub use network_object::{NetworkBehavior, NetworkId, NetworkObject, NetworkObjectMode};
pub use object_registry::{NetworkObjectEvent, NetworkObjectRegistry};
pub use server::ServerReplicator;
pub use tracked_registry::{ComponentReference, RegistryError, TrackedComponentRegistry, MAX_INDEX_COUNT};
