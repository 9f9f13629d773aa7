use std::net::IpAddr;
use std::str::FromStr;
use ipnetwork::IpNetwork;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Expansion {
    Addresses(Vec<IpAddr>),
    /// More addresses than the configured limit
    TooLarge { prefix: u8 },
}

/// Expand a CIDR into every address it covers, network and broadcast included.
pub(crate) fn expand_route(route: &str, limit: u64) -> Result<Expansion, ipnetwork::IpNetworkError> {
    let network = IpNetwork::from_str(route.trim())?;
    let width: u32 = if network.is_ipv4() { 32 } else { 128 };
    let host_bits = width - u32::from(network.prefix());

    if host_bits >= 64 || (1u64 << host_bits) > limit {
        return Ok(Expansion::TooLarge { prefix: network.prefix() });
    }

    let addresses = match network {
        IpNetwork::V4(net) => net.iter().map(IpAddr::V4).collect(),
        IpNetwork::V6(net) => net.iter().map(IpAddr::V6).collect(),
    };
    Ok(Expansion::Addresses(addresses))
}
