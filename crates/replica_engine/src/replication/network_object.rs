//! Replicable scene component

use std::fmt;

use super::tracked_registry::ComponentReference;

/// Cross-network identity of a [`NetworkObject`]
pub type NetworkId = ComponentReference;

/// How a network object is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkObjectMode {
    /// Not initialized by any replication mode yet
    Draft,
    /// Local simulation without networking
    Standalone,
    /// Owned and simulated by the server
    Server,
    /// Mirrored from a server
    ClientReplicated,
}

/// Gameplay hooks attached to a network object
pub trait NetworkBehavior {
    /// Object entered standalone simulation
    fn initialize_standalone(&mut self, _network_id: NetworkId) {}

    /// Object became server-authoritative
    fn initialize_on_server(&mut self, _network_id: NetworkId) {}

    /// Object is about to lose its id
    fn on_removed_from_registry(&mut self, _network_id: NetworkId) {}
}

/// Component marking a scene node as replicated.
///
/// The parent link is a [`NetworkId`] refreshed by
/// [`NetworkObjectRegistry::update_network_objects`](super::NetworkObjectRegistry::update_network_objects);
/// a parent that no longer resolves counts as no parent.
pub struct NetworkObject {
    network_id: NetworkId,
    parent: Option<NetworkId>,
    mode: NetworkObjectMode,
    behaviors: Vec<Box<dyn NetworkBehavior>>,
}

impl NetworkObject {
    /// Create an unregistered object in draft mode
    pub fn new() -> Self {
        Self {
            network_id: NetworkId::NONE,
            parent: None,
            mode: NetworkObjectMode::Draft,
            behaviors: Vec::new(),
        }
    }

    /// Attach a behavior (builder pattern)
    #[must_use]
    pub fn with_behavior(mut self, behavior: Box<dyn NetworkBehavior>) -> Self {
        self.behaviors.push(behavior);
        self
    }

    /// Identity issued by the registry, `NONE` while unregistered
    pub fn network_id(&self) -> NetworkId {
        self.network_id
    }

    /// Parent identity as of the last hierarchy update
    pub fn parent_network_id(&self) -> Option<NetworkId> {
        self.parent
    }

    /// Current mode
    pub fn network_mode(&self) -> NetworkObjectMode {
        self.mode
    }

    /// Set the current mode
    pub fn set_network_mode(&mut self, mode: NetworkObjectMode) {
        self.mode = mode;
    }

    /// Run standalone initialization hooks
    pub fn initialize_standalone(&mut self) {
        let id = self.network_id;
        for behavior in &mut self.behaviors {
            behavior.initialize_standalone(id);
        }
    }

    /// Run server initialization hooks
    pub fn initialize_on_server(&mut self) {
        let id = self.network_id;
        for behavior in &mut self.behaviors {
            behavior.initialize_on_server(id);
        }
    }

    pub(crate) fn notify_removed(&mut self) {
        let id = self.network_id;
        for behavior in &mut self.behaviors {
            behavior.on_removed_from_registry(id);
        }
    }

    pub(crate) fn set_network_id(&mut self, network_id: NetworkId) {
        self.network_id = network_id;
    }

    pub(crate) fn set_parent_network_id(&mut self, parent: Option<NetworkId>) {
        self.parent = parent;
    }
}

impl Default for NetworkObject {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NetworkObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkObject")
            .field("network_id", &self.network_id)
            .field("parent", &self.parent)
            .field("mode", &self.mode)
            .field("behaviors", &self.behaviors.len())
            .finish()
    }
}
