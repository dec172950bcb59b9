//! Server and client scenes replicating over an in-process lossy loopback
//!
//! Pass a `.toml` or `.ron` replication config as the first argument to
//! override the defaults.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use rand::Rng;
use replica_engine::config::ConfigError;
use replica_engine::foundation::logging;
use replica_engine::prelude::*;

// Demo configuration
const FRAME_TIME: f32 = 1.0 / 60.0;
const DEMO_FRAMES: u32 = 120;
const CLOCK_SYNC_FRAME: u32 = 10;  // Client clock settles after a few frames
const UNRELIABLE_LOSS: f64 = 0.2;
const REPORT_INTERVAL: u32 = 30;

#[derive(thiserror::Error, Debug)]
enum DemoError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),

    #[error("Client did not synchronize within {0} frames")]
    NotSynchronized(u32),
}

struct Packet {
    message_id: MessageId,
    payload: Vec<u8>,
}

/// One direction of the loopback: what is sent here is received by the other scene
struct LoopbackLink {
    id: ConnectionId,
    clock_synchronized: Cell<bool>,
    outbox: RefCell<VecDeque<Packet>>,
    dropped: Cell<u32>,
}

impl LoopbackLink {
    fn new(id: u32, clock_synchronized: bool) -> Rc<Self> {
        Rc::new(Self {
            id: ConnectionId(id),
            clock_synchronized: Cell::new(clock_synchronized),
            outbox: RefCell::new(VecDeque::new()),
            dropped: Cell::new(0),
        })
    }

    fn drain(&self) -> Vec<Packet> {
        self.outbox.borrow_mut().drain(..).collect()
    }
}

impl Connection for LoopbackLink {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_clock_synchronized(&self) -> bool {
        self.clock_synchronized.get()
    }

    fn send_message(&self, message_id: MessageId, payload: &[u8], delivery: DeliveryClass) {
        if !delivery.is_reliable() && rand::thread_rng().gen_bool(UNRELIABLE_LOSS) {
            self.dropped.set(self.dropped.get() + 1);
            return;
        }
        self.outbox.borrow_mut().push_back(Packet { message_id, payload: payload.to_vec() });
    }
}

struct ShipBehavior {
    name: &'static str,
}

impl NetworkBehavior for ShipBehavior {
    fn initialize_standalone(&mut self, network_id: NetworkId) {
        log::info!("{} runs standalone as {}", self.name, network_id);
    }

    fn initialize_on_server(&mut self, network_id: NetworkId) {
        log::info!("{} is served as {}", self.name, network_id);
    }
}

fn ship(name: &'static str) -> NetworkObject {
    NetworkObject::new().with_behavior(Box::new(ShipBehavior { name }))
}

fn load_config() -> Result<ReplicationConfig, DemoError> {
    match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Loading replication config from {}", path);
            let config = ReplicationConfig::load_from_file(&path)?;
            config.settings.validate()?;
            Ok(config)
        }
        None => Ok(ReplicationConfig {
            is_fixed_update_server: true,
            ..ReplicationConfig::default()
        }),
    }
}

/// Frigate with an escort formation hanging off a plain grouping node
fn spawn_fleet(scene: &mut Scene) -> Result<(), DemoError> {
    let root = scene.root();
    let frigate = scene.create_node(root, "frigate")?;
    scene.set_transform(frigate, Transform::from_position(Vec3::new(0.0, 0.0, -20.0)))?;
    scene.add_network_object(frigate, ship("frigate"))?;

    let formation = scene.create_node(frigate, "formation")?;
    for (slot, name) in ["leader", "left wing", "right wing"].into_iter().enumerate() {
        let escort = scene.create_node(formation, name)?;
        let offset = slot as f32 * 2.0;
        scene.set_transform(escort, Transform::from_position(Vec3::new(-offset, 0.0, offset)))?;
        scene.add_network_object(escort, ship(name))?;
    }
    Ok(())
}

/// Hand every packet queued on `link` to `scene`, answering over `reply`
fn deliver(link: &LoopbackLink, reply: &LoopbackLink, scene: &mut Scene) {
    for packet in link.drain() {
        if !scene.process_message(reply, packet.message_id.raw(), &packet.payload) {
            log::debug!("Unhandled {:?} on {}", packet.message_id, reply.id());
        }
    }
}

fn report(frame: u32, server: &Scene, client: &Scene) {
    let server_info = server.replication().map(ReplicationManager::debug_info).unwrap_or_default();
    let client_info = client.replication().map(ReplicationManager::debug_info).unwrap_or_default();
    log::info!("[frame {}] {}", frame, server_info);
    log::info!("[frame {}] {}", frame, client_info);
}

fn log_hierarchy(scene: &Scene) {
    let Some(manager) = scene.replication() else { return };
    let graph = scene.graph();
    for network_id in manager.registry().sorted_network_objects(graph) {
        let node = manager
            .registry()
            .network_object(network_id, true)
            .and_then(|node| graph.node(node));
        let name = node.map_or("<missing>", |node| node.name());
        let parent = node
            .and_then(|node| node.network_object())
            .and_then(NetworkObject::parent_network_id);
        match parent {
            Some(parent) => log::info!("  {} {} (parent {})", network_id, name, parent),
            None => log::info!("  {} {}", network_id, name),
        }
    }
}

fn main() -> Result<(), DemoError> {
    logging::init_with_level(log::LevelFilter::Info);

    log::info!("Starting replication loopback demo");
    let config = load_config()?;

    let mut server = Scene::with_replication(ReplicationManager::new(config));
    spawn_fleet(&mut server)?;
    server.start_server();

    let to_client = LoopbackLink::new(1, true);
    let to_server = LoopbackLink::new(2, false);
    let mut client = Scene::with_replication(ReplicationManager::default());
    let server_link: Rc<dyn Connection> = to_server.clone();
    client.start_client(&server_link);
    server.add_connection(to_client.clone());

    for frame in 1..=DEMO_FRAMES {
        if frame == CLOCK_SYNC_FRAME {
            log::info!("Client clock is synchronized with server");
            to_server.clock_synchronized.set(true);
        }

        server.update(FRAME_TIME);
        client.update(FRAME_TIME);
        deliver(&to_client, &to_server, &mut client);
        deliver(&to_server, &to_client, &mut server);

        if frame % REPORT_INTERVAL == 0 {
            report(frame, &server, &client);
        }
    }

    log::info!("Server hierarchy, parents first:");
    log_hierarchy(&server);
    log::info!(
        "Dropped {} unreliable packet(s) to client, {} to server",
        to_client.dropped.get(),
        to_server.dropped.get(),
    );

    let client_synchronized = client.replication().is_some_and(ReplicationManager::is_client_synchronized);
    let server_accepted = server
        .replication()
        .and_then(ReplicationManager::server)
        .is_some_and(|replicator| replicator.is_connection_synchronized(to_client.id()));
    if !client_synchronized || !server_accepted {
        return Err(DemoError::NotSynchronized(DEMO_FRAMES));
    }

    log::info!("Loopback demo finished");
    Ok(())
}
