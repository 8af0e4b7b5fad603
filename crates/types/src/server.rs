//! Shared per-server state.
//!
//! `ServerInner` is the slice of a managed server's state that is touched
//! from more than one task: the orchestrator owns the rest of the record,
//! but the simulated LOC server must atomically check initialization,
//! assign network ids, and install deferred-notification hooks. The whole
//! struct sits behind one mutex exposed through [`SharedServer::lock`].

use crate::geo::GpsLocation;
use crate::port_offset;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Kind of managed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerKind {
    /// Hosts user identities and their profiles.
    Profile,
    /// Hosts time-bounded geolocated activities.
    Proximity,
}

impl std::fmt::Display for ServerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerKind::Profile => write!(f, "profile"),
            ServerKind::Proximity => write!(f, "proximity"),
        }
    }
}

/// Opaque 32-byte server identifier assigned on LOC registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkId(pub [u8; 32]);

impl NetworkId {
    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from a byte slice; must be exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(NetworkId)
    }
}

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for NetworkId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for NetworkId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        NetworkId::from_slice(&bytes)
            .ok_or_else(|| D::Error::custom(format!("expected 32 bytes, got {}", bytes.len())))
    }
}

/// How to reach a server's primary interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerContact {
    /// IP address bytes (IPv4, network order).
    pub ip_address: Vec<u8>,
    /// Primary interface port.
    pub primary_port: u16,
}

/// Channel over which a deferred subscriber learns that a peer initialized.
pub type InitWaiterTx = mpsc::UnboundedSender<SharedServer>;

/// The server state shared between the orchestrator and the LOC servers.
#[derive(Debug)]
pub struct ServerInner {
    /// Unique server name, e.g. `A001`.
    pub name: String,
    /// Server kind.
    pub kind: ServerKind,
    /// Server location.
    pub location: GpsLocation,
    /// First port of the server's reserved 20-port block.
    pub base_port: u16,
    network_id: Option<NetworkId>,
    initialized: bool,
    // Subscribers waiting for this server to initialize, in install order.
    init_waiters: Vec<(String, InitWaiterTx)>,
}

impl ServerInner {
    /// Create the shared state for a freshly declared server.
    pub fn new(name: &str, kind: ServerKind, location: GpsLocation, base_port: u16) -> Self {
        Self {
            name: name.to_string(),
            kind,
            location,
            base_port,
            network_id: None,
            initialized: false,
            init_waiters: Vec::new(),
        }
    }

    /// Whether the server has completed LOC registration.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Network id, set on first successful registration and stable after.
    pub fn network_id(&self) -> Option<NetworkId> {
        self.network_id
    }

    /// Mark the server uninitialized (child deregistered or stopped).
    ///
    /// The network id is retained: it is stable for the server's lifetime.
    pub fn uninitialize(&mut self) {
        self.initialized = false;
    }

    /// Install a deferred-notification hook for `subscriber`.
    ///
    /// Idempotent per subscriber name so a burst of re-subscriptions before
    /// initialization yields exactly one notification.
    pub fn add_init_waiter(&mut self, subscriber: &str, tx: InitWaiterTx) {
        if self.init_waiters.iter().any(|(name, _)| name == subscriber) {
            return;
        }
        self.init_waiters.push((subscriber.to_string(), tx));
    }

    /// Remove a deferred-notification hook, if installed.
    pub fn remove_init_waiter(&mut self, subscriber: &str) {
        self.init_waiters.retain(|(name, _)| name != subscriber);
    }

    /// Number of pending deferred-notification hooks.
    pub fn init_waiter_count(&self) -> usize {
        self.init_waiters.len()
    }

    /// LOC port (base of the reserved block).
    pub fn loc_port(&self) -> u16 {
        self.base_port + port_offset::LOC
    }

    /// Primary interface port.
    pub fn primary_port(&self) -> u16 {
        self.base_port + port_offset::PRIMARY
    }

    /// Neighbor interface port.
    pub fn neighbor_port(&self) -> u16 {
        self.base_port + port_offset::NEIGHBOR
    }

    /// First client port: non-customer for profile servers, the single
    /// client interface for proximity servers.
    pub fn client_port(&self) -> u16 {
        self.base_port + port_offset::CLIENT_FIRST
    }

    /// Customer client port (profile servers only).
    pub fn customer_port(&self) -> u16 {
        self.base_port + port_offset::CLIENT_SECOND
    }

    /// Contact info advertised to LOC peers.
    pub fn contact(&self) -> ServerContact {
        ServerContact {
            ip_address: vec![127, 0, 0, 1],
            primary_port: self.primary_port(),
        }
    }
}

/// Handle to a server's shared state.
#[derive(Debug, Clone)]
pub struct SharedServer(Arc<Mutex<ServerInner>>);

impl SharedServer {
    /// Wrap fresh server state.
    pub fn new(inner: ServerInner) -> Self {
        Self(Arc::new(Mutex::new(inner)))
    }

    /// Lock the server state.
    ///
    /// Poisoning is recovered: the simulator aborts the scenario on any
    /// task panic, so a poisoned guard only ever carries consistent state.
    pub fn lock(&self) -> MutexGuard<'_, ServerInner> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Server name without holding the lock beyond the call.
    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    /// Assign the network id and flip to initialized, draining deferred
    /// hooks.
    ///
    /// The id is only stored on first assignment; re-registration after a
    /// restart keeps the original id. Waiters are notified outside the
    /// lock, in install order.
    pub fn complete_initialization(&self, id: NetworkId) {
        let waiters = {
            let mut inner = self.lock();
            if inner.network_id.is_none() {
                inner.network_id = Some(id);
            }
            inner.initialized = true;
            std::mem::take(&mut inner.init_waiters)
        };
        for (_, tx) in waiters {
            let _ = tx.send(self.clone());
        }
    }

    /// Pointer equality: both handles refer to the same server.
    pub fn same_server(&self, other: &SharedServer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
