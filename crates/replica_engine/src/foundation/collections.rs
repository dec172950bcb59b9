//! Specialized collection types

pub use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Stable handle of a node in a [`SceneGraph`](crate::scene::SceneGraph).
    ///
    /// Keys are generational: a handle to a removed node never aliases a node
    /// created later in the same slot.
    pub struct NodeId;
}

/// Map from scene node handles to node data
pub type NodeMap<T> = SlotMap<NodeId, T>;
