//! Host address discovery for the build's HTTP server.

use std::net::IpAddr;
use vmbuild_shared::{VmbuildError, VmbuildResult};

/// Resolve the address the build's HTTP server should advertise.
///
/// `hint` is returned as-is when it is a literal IP address. Otherwise it
/// names the interface to use (any interface when empty) and its first
/// non-loopback address is picked, IPv4 preferred.
pub fn resolve_host_ip(hint: &str) -> VmbuildResult<IpAddr> {
    if let Ok(ip) = hint.parse::<IpAddr>() {
        return Ok(ip);
    }

    let addrs = interface_addresses()?
        .into_iter()
        .filter(|(name, _)| hint.is_empty() || name == hint)
        .map(|(_, ip)| ip);
    let ip = pick_host_ip(addrs).ok_or_else(|| {
        if hint.is_empty() {
            VmbuildError::NotFound("no non-loopback interface address".into())
        } else {
            VmbuildError::NotFound(format!("no usable address on interface {}", hint))
        }
    })?;

    tracing::debug!(hint = %hint, ip = %ip, "Resolved host address");
    Ok(ip)
}

/// `(interface name, address)` for every IP address on the host.
fn interface_addresses() -> VmbuildResult<Vec<(String, IpAddr)>> {
    let ifaddrs = nix::ifaddrs::getifaddrs().map_err(std::io::Error::from)?;

    Ok(ifaddrs
        .filter_map(|ifaddr| {
            let addr = ifaddr.address?;
            let ip = if let Some(v4) = addr.as_sockaddr_in() {
                IpAddr::V4(v4.ip())
            } else {
                IpAddr::V6(addr.as_sockaddr_in6()?.ip())
            };
            Some((ifaddr.interface_name, ip))
        })
        .collect())
}

/// First usable address: IPv4 before IPv6, never loopback or unspecified.
fn pick_host_ip(addrs: impl IntoIterator<Item = IpAddr>) -> Option<IpAddr> {
    let usable: Vec<IpAddr> = addrs
        .into_iter()
        .filter(|ip| !ip.is_loopback() && !ip.is_unspecified())
        .collect();

    usable
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| usable.first())
        .copied()
}
