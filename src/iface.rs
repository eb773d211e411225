use pnet::datalink::{self, NetworkInterface};
use pnet::ipnetwork::IpNetwork;
use std::net::Ipv4Addr;

#[derive(thiserror::Error, Debug)]
pub enum IfaceError {
    #[error("no interface named {0:?}")]
    InterfaceNotFound(String),
    #[error("no address associated with interface {0}")]
    NoAddressOnInterface(String),
    #[error("no usable IPv4 address on interface {0}")]
    NoUsableAddress(String),
}

/// Resolve the named interface to a local, non-loopback IPv4 address.
///
/// The scan subnet and the broadcast source must sit on the segment the
/// operator configured, so loopback and IPv6-only entries are skipped.
/// An empty name means "use the wildcard endpoint" and is the caller's
/// business; this lookup is only for explicitly configured interfaces.
pub fn resolve_local_addr(name: &str) -> Result<Ipv4Addr, IfaceError> {
    resolve_in(datalink::interfaces(), name)
}

fn resolve_in(interfaces: Vec<NetworkInterface>, name: &str) -> Result<Ipv4Addr, IfaceError> {
    let iface = interfaces
        .into_iter()
        .find(|i| i.name == name)
        .ok_or_else(|| IfaceError::InterfaceNotFound(name.to_string()))?;
    if iface.ips.is_empty() {
        return Err(IfaceError::NoAddressOnInterface(name.to_string()));
    }
    first_usable_addr(&iface.ips).ok_or_else(|| IfaceError::NoUsableAddress(name.to_string()))
}

fn first_usable_addr(ips: &[IpNetwork]) -> Option<Ipv4Addr> {
    ips.iter().find_map(|net| match net {
        IpNetwork::V4(v4) if !v4.ip().is_loopback() => Some(v4.ip()),
        _ => None,
    })
}
