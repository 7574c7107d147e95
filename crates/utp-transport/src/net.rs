//! Address handling: host/port splitting, port-range listening, and the
//! host list a self-signed listener certificate is issued for.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;

use tracing::{debug, warn};

use crate::error::TransportError;

/// A parsed listen address: a host plus one port or an inclusive port range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddr {
    pub host: String,
    pub ports: RangeInclusive<u16>,
}

/// Split `host:port`, `[v6]:port` or `:port`.
///
/// Returns `None` when the address has no port or an unbracketed IPv6 host.
pub fn split_host_port(addr: &str) -> Option<(&str, &str)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest.split_once(']')?;
        let port = rest.strip_prefix(':')?;
        return Some((host, port));
    }
    let (host, port) = addr.rsplit_once(':')?;
    if host.contains(':') || host.contains('[') || host.contains(']') {
        return None;
    }
    Some((host, port))
}

/// Parse `host:port`, `:port` or `host:min-max`.
pub fn parse_listen_addr(addr: &str) -> Result<ListenAddr, TransportError> {
    let (host, ports) = split_host_port(addr)
        .ok_or_else(|| TransportError::invalid_address(addr, "expected host:port"))?;

    let ports = match ports.split_once('-') {
        None => {
            let port = parse_port(addr, ports)?;
            port..=port
        }
        Some((min, max)) => {
            let min = parse_port(addr, min)?;
            let max = parse_port(addr, max)?;
            if min > max {
                return Err(TransportError::invalid_address(
                    addr,
                    format!("empty port range {min}-{max}"),
                ));
            }
            min..=max
        }
    };

    Ok(ListenAddr {
        host: host.to_string(),
        ports,
    })
}

fn parse_port(addr: &str, port: &str) -> Result<u16, TransportError> {
    port.parse()
        .map_err(|_| TransportError::invalid_address(addr, format!("invalid port {port:?}")))
}

/// Resolve `host` and `port` to the first matching socket address.
///
/// An empty host means every local interface.
pub(crate) async fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    if host.is_empty() {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| TransportError::invalid_address(host, "host did not resolve"))
}

/// Resolve a dial target. An empty host dials the local machine.
///
/// Returns the resolved address and the host name to present during a TLS
/// handshake.
pub(crate) async fn resolve_dial(addr: &str) -> Result<(SocketAddr, String), TransportError> {
    let (host, port) = split_host_port(addr)
        .ok_or_else(|| TransportError::invalid_address(addr, "expected host:port"))?;
    let port = parse_port(addr, port)?;
    let host = if host.is_empty() {
        Ipv4Addr::LOCALHOST.to_string()
    } else {
        host.to_string()
    };
    let target = resolve(&host, port).await?;
    Ok((target, host))
}

/// Bind with `bind` on the listen address, walking a port range in order.
///
/// Returns the first successful bind, or the error of the last port tried.
pub(crate) async fn listen_on<T, F, Fut>(addr: &str, mut bind: F) -> Result<T, TransportError>
where
    F: FnMut(SocketAddr) -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let ListenAddr { host, ports } = parse_listen_addr(addr)?;

    let mut last_err = None;
    for port in ports {
        let target = resolve(&host, port).await?;
        match bind(target).await {
            Ok(bound) => return Ok(bound),
            Err(e) => {
                debug!(addr = %target, error = %e, "bind failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| TransportError::invalid_address(addr, "unable to bind")))
}

/// Hosts a self-signed certificate for a listener on `addr` should cover.
///
/// The host part of a `host:port` address; every local interface address
/// when the host is empty; the raw address when it cannot be split.
pub fn certificate_hosts(addr: &str) -> Vec<String> {
    match split_host_port(addr) {
        Some(("", _)) => local_ip_addrs(),
        Some((host, _)) => vec![host.to_string()],
        None => vec![addr.to_string()],
    }
}

/// String forms of every IP address assigned to a local interface.
pub fn local_ip_addrs() -> Vec<String> {
    match if_addrs::get_if_addrs() {
        Ok(ifaces) => ifaces.iter().map(|iface| iface.ip().to_string()).collect(),
        Err(e) => {
            warn!(error = %e, "failed to enumerate local interfaces");
            Vec::new()
        }
    }
}
