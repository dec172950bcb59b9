//! Scene tree collaborator
//!
//! Provides the minimal scene surface replication needs:
//! - Node hierarchy with cycle-free re-parenting
//! - Cached world transforms
//! - Network object component add/remove notifications
//! - Update and post-update ticks driving an attached [`ReplicationManager`](crate::replication::ReplicationManager)

mod graph;
mod host;

pub use graph::{ComponentListener, Node, NullListener, SceneError, SceneGraph};
pub use host::Scene;
