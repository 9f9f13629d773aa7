use std::collections::{HashMap, HashSet};
use chrono::{DateTime, Datelike, Utc};
use shared::types::{
    Activity, DaemonStatus, Machine, MachineId, MachineInfo, MachineKind, Relay, Snapshot,
    Tailnet, User, UserId,
};
use crate::error::StatusError;
use super::hash;
use super::json::{RawMachine, RawStatus};
use super::subnet::{expand_route, Expansion};

/// Turns daemon status JSON into a [`Snapshot`].
///
/// Built once from configuration and shared; parsing has no hidden state.
#[derive(Debug, Clone)]
pub struct StatusParser {
    subnet_expansion_limit: u64,
    names: HashMap<MachineId, String>,
}

impl StatusParser {
    pub fn new(subnet_expansion_limit: u64) -> Self {
        Self {
            subnet_expansion_limit,
            names: HashMap::new(),
        }
    }

    /// Display names that replace the reported ones, keyed by machine ID
    pub fn with_names(mut self, names: HashMap<MachineId, String>) -> Self {
        self.names = names;
        self
    }

    fn display_name(&self, id: &MachineId, reported: &str) -> String {
        self.names.get(id).cloned().unwrap_or_else(|| reported.to_string())
    }

    pub fn parse(&self, raw: &[u8]) -> Result<Snapshot, StatusError> {
        let status: RawStatus = serde_json::from_slice(raw)?;
        let self_id = MachineId::new(status.self_node.id.clone());

        let daemon = DaemonStatus {
            version: status.version,
            version_up_to_date: status.client_version.map(|v| v.running_latest).unwrap_or(false),
            tunneling_enabled: status.tun,
            backend_state: status.backend_state,
            have_node_key: status.have_node_key,
            health: status.health,
            dns_suffix: status.magic_dns_suffix,
            tailnet: status.current_tailnet.map(|t| Tailnet {
                name: t.name,
                dns_suffix: t.magic_dns_suffix,
                dns_enabled: t.magic_dns_enabled,
            }),
            self_id: self_id.clone(),
            self_user_id: UserId(status.self_node.user_id),
        };

        let users: HashMap<UserId, User> = status
            .user
            .unwrap_or_default()
            .into_values()
            .map(|u| {
                let user = User {
                    id: UserId(u.id),
                    login_name: u.login_name,
                    display_name: u.display_name,
                    avatar_url: u.profile_pic_url,
                    roles: u.roles,
                };
                (user.id, user)
            })
            .collect();

        let mut records: Vec<RawMachine> = std::iter::once(status.self_node)
            .chain(status.peer.unwrap_or_default().into_values())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));

        let machines = records
            .iter()
            .map(|record| self.machine(record, &self_id))
            .collect::<Result<Vec<_>, _>>()?;

        let mut lookup = HashMap::new();
        for machine in &machines {
            index(&mut lookup, machine)?;
            for child in machine.subnet_routes.iter().flatten() {
                index(&mut lookup, child)?;
            }
        }

        let fingerprint = hash::fingerprint(&machines);
        tracing::debug!(
            "Parsed {} machines ({} with subnets), fingerprint {}",
            machines.len(),
            lookup.len(),
            fingerprint
        );

        Ok(Snapshot {
            daemon,
            machines,
            users,
            lookup,
            fingerprint,
            fetched_at: Utc::now(),
        })
    }

    fn machine(&self, raw: &RawMachine, self_id: &MachineId) -> Result<Machine, StatusError> {
        let id = MachineId::new(raw.id.clone());
        let kind = if &id == self_id {
            MachineKind::SelfHost
        } else {
            MachineKind::RemoteHost
        };

        let activity = Activity {
            online: raw.online,
            active: raw.active,
            rx_bytes: raw.rx_bytes,
            tx_bytes: raw.tx_bytes,
            last_seen: optional_timestamp(&raw.id, "LastSeen", raw.last_seen.as_deref())?,
        };

        let info = MachineInfo {
            public_key: raw.public_key.clone(),
            key_expiry: optional_timestamp(&raw.id, "KeyExpiry", raw.key_expiry.as_deref())?,
            exit_node: raw.exit_node,
            user_id: UserId(raw.user_id),
            addresses: raw.tailscale_ips.clone(),
            created: timestamp(&raw.id, "Created", &raw.created)?,
            last_write: optional_timestamp(&raw.id, "LastWrite", raw.last_write.as_deref())?,
            last_handshake: optional_timestamp(&raw.id, "LastHandshake", raw.last_handshake.as_deref())?,
            in_network_map: raw.in_network_map,
            in_magic_sock: raw.in_magic_sock,
            in_engine: raw.in_engine,
        };

        let subnet_routes = self.subnet_machines(raw, &id, kind)?;

        Ok(Machine {
            name: self.display_name(&id, &raw.host_name),
            id,
            url: raw.dns_name.clone(),
            os: Some(raw.os.clone()),
            kind,
            relay: Relay::Named(raw.relay.clone()),
            activity: Some(activity),
            subnet_routes,
            info: Some(info),
        })
    }

    /// One child per address of every advertised route. `None` rather than an
    /// empty list when nothing expands.
    fn subnet_machines(
        &self,
        raw: &RawMachine,
        owner: &MachineId,
        owner_kind: MachineKind,
    ) -> Result<Option<Vec<Machine>>, StatusError> {
        let Some(routes) = &raw.primary_routes else {
            return Ok(None);
        };

        let kind = match owner_kind {
            MachineKind::SelfHost => MachineKind::SelfSubnet,
            _ => MachineKind::RemoteSubnet,
        };

        let mut seen = HashSet::new();
        let mut children = Vec::new();

        for route in routes {
            let expansion = expand_route(route, self.subnet_expansion_limit).map_err(|_| {
                StatusError::Route {
                    machine: raw.id.clone(),
                    route: route.clone(),
                }
            })?;

            match expansion {
                Expansion::Addresses(addresses) => {
                    for address in addresses {
                        let address = address.to_string();
                        // Overlapping routes from the same owner
                        if !seen.insert(address.clone()) {
                            continue;
                        }
                        let id = MachineId::subnet(owner, &address);
                        children.push(Machine {
                            name: self.display_name(&id, &address),
                            id,
                            url: address,
                            os: None,
                            kind,
                            relay: Relay::Route {
                                id: owner.clone(),
                                name: raw.host_name.clone(),
                            },
                            activity: None,
                            subnet_routes: None,
                            info: None,
                        });
                    }
                }
                Expansion::TooLarge { prefix } => {
                    tracing::warn!(
                        "Not expanding route {} of {}: /{} exceeds {} addresses",
                        route,
                        raw.host_name,
                        prefix,
                        self.subnet_expansion_limit
                    );
                }
            }
        }

        Ok(if children.is_empty() { None } else { Some(children) })
    }
}

fn index(lookup: &mut HashMap<MachineId, Machine>, machine: &Machine) -> Result<(), StatusError> {
    if lookup.insert(machine.id.clone(), machine.clone()).is_some() {
        return Err(StatusError::DuplicateId(machine.id.to_string()));
    }
    Ok(())
}

fn timestamp(machine: &str, field: &'static str, value: &str) -> Result<DateTime<Utc>, StatusError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StatusError::Timestamp {
            machine: machine.to_string(),
            field,
            value: value.to_string(),
        })
}

/// The daemon writes Go's zero time for "never"
fn optional_timestamp(
    machine: &str,
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, StatusError> {
    match value {
        None => Ok(None),
        Some(value) => {
            let parsed = timestamp(machine, field, value)?;
            Ok((parsed.year() > 1).then_some(parsed))
        }
    }
}
