use serde::Serialize;
use sha2::{Sha256, Digest};
use shared::types::{Machine, MachineKind, Relay};

/// Only the topology: traffic counters, timestamps and online flags change on
/// every refresh without the table layout changing.
#[derive(Serialize)]
struct TopologyView<'a> {
    id: &'a str,
    name: &'a str,
    url: &'a str,
    kind: MachineKind,
    relay: &'a Relay,
}

/// SHA-256 over every machine (subnet machines included), sorted by ID so the
/// result does not depend on input order.
pub fn fingerprint(machines: &[Machine]) -> String {
    let mut views: Vec<TopologyView<'_>> = Vec::new();
    for machine in machines {
        views.push(view(machine));
        if let Some(children) = &machine.subnet_routes {
            views.extend(children.iter().map(view));
        }
    }
    views.sort_by(|a, b| a.id.cmp(b.id));

    // Plain strings and enums, serialization cannot fail
    let json = serde_json::to_vec(&views).unwrap_or_default();

    hex::encode(Sha256::digest(&json))
}

fn view(machine: &Machine) -> TopologyView<'_> {
    TopologyView {
        id: machine.id.as_str(),
        name: &machine.name,
        url: &machine.url,
        kind: machine.kind,
        relay: &machine.relay,
    }
}
