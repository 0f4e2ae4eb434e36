//! IP address arithmetic and the domain-name grammar.

use ipnetwork::IpNetwork;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Steps an address one up or down, treating it as a big-endian unsigned
/// integer of its own byte width. No wraparound guard; callers own bounds.
pub fn next_ip(ip: IpAddr, dir: Direction) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => {
            let n = u32::from(v4);
            let n = match dir {
                Direction::Up => n.wrapping_add(1),
                Direction::Down => n.wrapping_sub(1),
            };
            IpAddr::V4(n.into())
        }
        IpAddr::V6(v6) => {
            let n = u128::from(v6);
            let n = match dir {
                Direction::Up => n.wrapping_add(1),
                Direction::Down => n.wrapping_sub(1),
            };
            IpAddr::V6(n.into())
        }
    }
}

/// Rejects loopback and multicast addresses. Private ranges are kept on
/// purpose; the scanner runs inside private networks too.
pub fn is_usable(ip: IpAddr) -> bool {
    !ip.is_loopback() && !ip.is_multicast()
}

pub fn cidr_contains(net: &IpNetwork, ip: IpAddr) -> bool {
    net.contains(ip)
}

/// Hostname grammar: at most 253 characters, dot-separated labels of 1-63
/// alphanumerics and hyphens, with no hyphen at either label end.
pub fn is_valid_domain(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    })
}
