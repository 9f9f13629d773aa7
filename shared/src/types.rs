use std::collections::{HashMap, HashSet};
use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Opaque machine identifier. Unique within one snapshot, including the
/// synthesized `<owner>:<address>` identifiers of subnet machines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(pub String);

impl MachineId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier of a subnet machine synthesized for `address` under `owner`
    pub fn subnet(owner: &MachineId, address: &str) -> Self {
        Self(format!("{}:{}", owner.0, address))
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network-level metadata for the tailnet the daemon is logged into
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tailnet {
    pub name: String,
    pub dns_suffix: String,
    pub dns_enabled: bool,
}

/// Daemon-level status read from the envelope of `status --json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub version_up_to_date: bool,
    pub tunneling_enabled: bool,
    pub backend_state: String,
    pub have_node_key: bool,
    pub health: Vec<String>,
    pub dns_suffix: String,
    pub tailnet: Option<Tailnet>,
    pub self_id: MachineId,
    pub self_user_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineKind {
    SelfHost,
    RemoteHost,
    SelfSubnet,
    RemoteSubnet,
}

/// How traffic reaches a machine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relay {
    /// Named DERP relay region, e.g. "fra"
    Named(String),
    /// Routed through the host that advertises the subnet
    Route { id: MachineId, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub online: bool,
    pub active: bool,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineInfo {
    pub public_key: String,
    pub key_expiry: Option<DateTime<Utc>>,
    pub exit_node: bool,
    pub user_id: UserId,
    pub addresses: Vec<String>,
    pub created: DateTime<Utc>,
    pub last_write: Option<DateTime<Utc>>,
    pub last_handshake: Option<DateTime<Utc>>,
    pub in_network_map: bool,
    pub in_magic_sock: bool,
    pub in_engine: bool,
}

/// A machine on the tailnet, or a single address behind an advertised subnet route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub id: MachineId,
    pub name: String,

    /// Address used to connect: MagicDNS name for hosts, the IP for subnet machines
    pub url: String,

    pub os: Option<String>,
    pub kind: MachineKind,
    pub relay: Relay,

    /// Never present on subnet machines
    pub activity: Option<Activity>,

    /// One child per address of every advertised route; `None` when nothing was advertised
    pub subnet_routes: Option<Vec<Machine>>,

    /// Never present on subnet machines
    pub info: Option<MachineInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub login_name: String,
    pub display_name: String,
    pub avatar_url: String,
    pub roles: Vec<String>,
}

/// Service identity. Two services may share a port as long as the protocol differs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub protocol: String,
    pub port: u16,
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.protocol, self.port)
    }
}

/// A TCP service probed on every machine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub protocol: String,
    pub port: u16,
    #[serde(default)]
    pub uses_username: bool,
    #[serde(default)]
    pub uses_password: bool,
}

impl Service {
    pub fn new(name: &str, protocol: &str, port: u16) -> Self {
        Self {
            name: name.to_string(),
            protocol: protocol.to_string(),
            port,
            uses_username: false,
            uses_password: false,
        }
    }

    pub fn key(&self) -> ServiceKey {
        ServiceKey {
            protocol: self.protocol.clone(),
            port: self.port,
        }
    }

    /// The built-in catalog
    pub fn defaults() -> Vec<Service> {
        vec![
            Service::new("AFP", "afp", 548),
            Service::new("SSH", "ssh", 22),
            Service::new("SMB", "smb", 445),
            Service::new("RDP", "rdp", 3389),
            Service::new("VNC", "vnc", 5900),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Unknown,
    Processing,
    Online,
    Offline,
    Error,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Online | Status::Offline | Status::Error)
    }
}

pub type StatusMap = HashMap<MachineId, HashMap<ServiceKey, Status>>;

/// Everything one machine refresh produced. Replaced wholesale, never patched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub daemon: DaemonStatus,

    /// Top-level machines sorted by ID; subnet machines hang off their owner
    pub machines: Vec<Machine>,

    pub users: HashMap<UserId, User>,

    /// Flat index over top-level and subnet machines
    pub lookup: HashMap<MachineId, Machine>,

    /// SHA-256 over the stable topology fields, hex encoded
    pub fingerprint: String,

    pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn machine(&self, id: &MachineId) -> Option<&Machine> {
        self.lookup.get(id)
    }

    pub fn contains(&self, id: &MachineId) -> bool {
        self.lookup.contains_key(id)
    }

    pub fn user_for(&self, machine: &Machine) -> Option<&User> {
        machine
            .info
            .as_ref()
            .and_then(|info| self.users.get(&info.user_id))
    }

    /// Machines in tree order: each host followed by its subnet machines
    pub fn all_machines(&self) -> Vec<Machine> {
        let mut out = Vec::with_capacity(self.lookup.len());
        for machine in &self.machines {
            out.push(machine.clone());
            if let Some(children) = &machine.subnet_routes {
                out.extend(children.iter().cloned());
            }
        }
        out
    }

    /// Machines for a table selection. An empty selection means every machine.
    pub fn machines_for(&self, selection: &HashSet<MachineId>) -> Vec<Machine> {
        if selection.is_empty() {
            return self.all_machines();
        }
        self.all_machines()
            .into_iter()
            .filter(|m| selection.contains(&m.id))
            .collect()
    }

    pub fn ids(&self) -> HashSet<MachineId> {
        self.lookup.keys().cloned().collect()
    }
}
