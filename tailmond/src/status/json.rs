//! Wire format of `tailscale status --json`.
//!
//! Only the fields the engine reads are declared. Anything not wrapped in
//! `Option` is required and a missing value fails the whole decode.

use std::collections::HashMap;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct RawStatus {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "TUN")]
    pub tun: bool,
    #[serde(rename = "BackendState")]
    pub backend_state: String,
    #[serde(rename = "HaveNodeKey")]
    pub have_node_key: bool,
    #[serde(rename = "Health")]
    pub health: Vec<String>,
    #[serde(rename = "MagicDNSSuffix")]
    pub magic_dns_suffix: String,
    #[serde(rename = "CurrentTailnet")]
    pub current_tailnet: Option<RawTailnet>,
    #[serde(rename = "Self")]
    pub self_node: RawMachine,
    #[serde(rename = "Peer")]
    pub peer: Option<HashMap<String, RawMachine>>,
    #[serde(rename = "User")]
    pub user: Option<HashMap<String, RawUser>>,
    #[serde(rename = "ClientVersion")]
    pub client_version: Option<RawClientVersion>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawTailnet {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "MagicDNSSuffix")]
    pub magic_dns_suffix: String,
    #[serde(rename = "MagicDNSEnabled")]
    pub magic_dns_enabled: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawClientVersion {
    #[serde(rename = "RunningLatest", default)]
    pub running_latest: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawMachine {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "PublicKey")]
    pub public_key: String,
    #[serde(rename = "HostName")]
    pub host_name: String,
    #[serde(rename = "DNSName")]
    pub dns_name: String,
    #[serde(rename = "OS")]
    pub os: String,
    #[serde(rename = "UserID")]
    pub user_id: u64,
    #[serde(rename = "TailscaleIPs")]
    pub tailscale_ips: Vec<String>,
    #[serde(rename = "PrimaryRoutes")]
    pub primary_routes: Option<Vec<String>>,
    #[serde(rename = "Relay")]
    pub relay: String,
    #[serde(rename = "RxBytes")]
    pub rx_bytes: u64,
    #[serde(rename = "TxBytes")]
    pub tx_bytes: u64,
    #[serde(rename = "Created")]
    pub created: String,
    #[serde(rename = "LastWrite")]
    pub last_write: Option<String>,
    #[serde(rename = "LastSeen")]
    pub last_seen: Option<String>,
    #[serde(rename = "LastHandshake")]
    pub last_handshake: Option<String>,
    #[serde(rename = "Online")]
    pub online: bool,
    #[serde(rename = "ExitNode")]
    pub exit_node: bool,
    #[serde(rename = "Active")]
    pub active: bool,
    #[serde(rename = "InNetworkMap")]
    pub in_network_map: bool,
    #[serde(rename = "InMagicSock")]
    pub in_magic_sock: bool,
    #[serde(rename = "InEngine")]
    pub in_engine: bool,
    #[serde(rename = "KeyExpiry")]
    pub key_expiry: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawUser {
    #[serde(rename = "ID")]
    pub id: u64,
    #[serde(rename = "LoginName")]
    pub login_name: String,
    #[serde(rename = "DisplayName")]
    pub display_name: String,
    // omitempty on the daemon side
    #[serde(rename = "ProfilePicURL", default)]
    pub profile_pic_url: String,
    #[serde(rename = "Roles", default)]
    pub roles: Vec<String>,
}
