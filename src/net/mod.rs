//! Current-node identity.
//!
//! The ownership map records, per lock key, the IP of the node that last
//! populated the shared copy. We use the first site-local (RFC1918) IPv4
//! address found on any network interface; if none exists, callers that need
//! a write path fail with `IllegalState`.

use crate::err::{CacheError, Result};
use std::net::Ipv4Addr;

/// Return the first site-local IPv4 address found across all network
/// interfaces, or `IllegalState` if the host has none.
pub fn current_node_ip() -> Result<Ipv4Addr> {
    for iface in pnet_datalink::interfaces() {
        for ip_net in &iface.ips {
            if let std::net::IpAddr::V4(v4) = ip_net.ip() {
                if !v4.is_loopback() && is_private_ipv4(&v4) {
                    return Ok(v4);
                }
            }
        }
    }
    Err(CacheError::illegal_state("IP not found"))
}

/// RFC1918 private-range classification:
/// - 10.0.0.0/8
/// - 172.16.0.0/12
/// - 192.168.0.0/16
#[inline]
pub fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    match octets {
        [10, _, _, _] => true,
        [172, b, _, _] if (16..=31).contains(&b) => true,
        [192, 168, _, _] => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_private_ranges() {
        assert!(is_private_ipv4(&Ipv4Addr::new(10, 0, 0, 1)));
        assert!(is_private_ipv4(&Ipv4Addr::new(172, 20, 0, 1)));
        assert!(!is_private_ipv4(&Ipv4Addr::new(172, 32, 0, 1)));
        assert!(is_private_ipv4(&Ipv4Addr::new(192, 168, 1, 10)));
        assert!(!is_private_ipv4(&Ipv4Addr::new(8, 8, 8, 8)));
        assert!(!is_private_ipv4(&Ipv4Addr::new(127, 0, 0, 1)));
    }
}
