//! Local IPv4 address discovery

use std::net::Ipv4Addr;

/// Non-loopback IPv4 addresses of interfaces that are up, in the order
/// the OS reports them
#[cfg(unix)]
pub fn local_ipv4_addresses() -> Vec<Ipv4Addr> {
    use nix::net::if_::InterfaceFlags;

    let all_addrs = match nix::ifaddrs::getifaddrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::warn!("Failed to enumerate interfaces: {}", e);
            return Vec::new();
        }
    };

    let mut addresses = Vec::new();
    for ifaddr in all_addrs {
        if !ifaddr.flags.contains(InterfaceFlags::IFF_UP) {
            continue;
        }
        let Some(ip) = ifaddr
            .address
            .as_ref()
            .and_then(|addr| addr.as_sockaddr_in())
            .map(|sin| sin.ip())
        else {
            continue;
        };
        if usable(ip) && !addresses.contains(&ip) {
            tracing::debug!("Candidate address {} on {}", ip, ifaddr.interface_name);
            addresses.push(ip);
        }
    }
    addresses
}

/// Without interface enumeration, fall back to the address the routing
/// table picks for outbound traffic. No packet is sent.
#[cfg(not(unix))]
pub fn local_ipv4_addresses() -> Vec<Ipv4Addr> {
    let routed = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9))?;
            socket.local_addr()
        });
    match routed {
        Ok(std::net::SocketAddr::V4(addr)) if usable(*addr.ip()) => vec![*addr.ip()],
        Ok(_) => Vec::new(),
        Err(e) => {
            tracing::warn!("Failed to find the outbound local address: {}", e);
            Vec::new()
        }
    }
}

fn usable(ip: Ipv4Addr) -> bool {
    !ip.is_loopback() && !ip.is_unspecified()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_returns_loopback() {
        for ip in local_ipv4_addresses() {
            assert!(!ip.is_loopback());
            assert!(!ip.is_unspecified());
        }
    }
}
