//! Address handling for DNSBL queries: reverse forms, canonical text
//! representations, and CIDR containment.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;

/// Reverse an IPv4 address into DNSBL query order: `a.b.c.d` → `d.c.b.a`.
pub fn reverse_ipv4(ip: Ipv4Addr) -> String {
    let o = ip.octets();
    format!("{}.{}.{}.{}", o[3], o[2], o[1], o[0])
}

/// Reverse an IPv6 address into the 32-nibble DNSBL form: each address byte
/// expands to two hex nibbles and the whole sequence is emitted in reverse,
/// dot-joined (the ip6.arpa convention without the suffix).
pub fn reverse_ipv6(ip: Ipv6Addr) -> String {
    let mut nibbles = Vec::with_capacity(32);
    for byte in ip.octets().iter().rev() {
        nibbles.push(format!("{:x}", byte & 0x0f));
        nibbles.push(format!("{:x}", byte >> 4));
    }
    nibbles.join(".")
}

pub fn reverse_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => reverse_ipv4(v4),
        IpAddr::V6(v6) => reverse_ipv6(v6),
    }
}

/// Canonical text form: dotted quad for v4, fully expanded lowercase
/// 8-group hex for v6. Cache keys and durable columns always hold this
/// form so that two lexical spellings of one address collide.
pub fn canonical_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => {
            let s = v6.segments();
            format!(
                "{:04x}:{:04x}:{:04x}:{:04x}:{:04x}:{:04x}:{:04x}:{:04x}",
                s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7]
            )
        }
    }
}

/// Canonicalise a textual address, if it parses at all.
pub fn canonicalize(s: &str) -> Option<String> {
    s.parse::<IpAddr>().ok().map(canonical_ip)
}

/// Parse the reversed-IP prefix of a DNSBL query name: either 4 dotted
/// decimal octets (v4, wire order) or 32 dotted hex nibbles (v6).
/// Returns the address in normal order.
pub fn parse_reverse_prefix(prefix: &str) -> Option<IpAddr> {
    let parts: Vec<&str> = prefix.split('.').collect();
    match parts.len() {
        4 => {
            let mut octets = [0u8; 4];
            for (i, part) in parts.iter().rev().enumerate() {
                if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                octets[i] = part.parse().ok()?;
            }
            Some(IpAddr::V4(Ipv4Addr::new(
                octets[0], octets[1], octets[2], octets[3],
            )))
        }
        32 => {
            let mut nibbles = [0u8; 32];
            for (i, part) in parts.iter().rev().enumerate() {
                if part.len() != 1 {
                    return None;
                }
                nibbles[i] = u8::from_str_radix(part, 16).ok()?;
            }
            let mut octets = [0u8; 16];
            for (i, octet) in octets.iter_mut().enumerate() {
                *octet = (nibbles[2 * i] << 4) | nibbles[2 * i + 1];
            }
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

/// Strip `.suffix` from a query name and parse the remainder as a reversed
/// IP. Trailing dots on either side are ignored; matching is byte-exact, so
/// callers lowercase both sides first.
pub fn parse_reverse(name: &str, suffix: &str) -> Option<IpAddr> {
    let name = name.trim_end_matches('.');
    let suffix = suffix.trim_end_matches('.');
    let prefix = name.strip_suffix(suffix)?.strip_suffix('.')?;
    parse_reverse_prefix(prefix)
}

/// Version-aware containment test; addresses of the other family never
/// match a network.
pub fn cidr_contains(net: &IpNetwork, ip: IpAddr) -> bool {
    match (net, ip) {
        (IpNetwork::V4(net), IpAddr::V4(ip)) => net.contains(ip),
        (IpNetwork::V6(net), IpAddr::V6(ip)) => net.contains(ip),
        _ => false,
    }
}

/// A row in a CIDR block table, as seen by the matcher.
#[derive(Debug, Clone)]
pub struct NetworkEntry {
    pub id: i64,
    pub network: IpNetwork,
    pub listed: bool,
}

/// Among listed entries containing `ip`, pick the most specific network;
/// equal prefix lengths resolve to the smallest id.
pub fn longest_prefix_match(entries: &[NetworkEntry], ip: IpAddr) -> Option<&NetworkEntry> {
    let mut best: Option<&NetworkEntry> = None;
    for entry in entries {
        if !entry.listed || !cidr_contains(&entry.network, ip) {
            continue;
        }
        let better = match best {
            None => true,
            Some(b) => {
                entry.network.prefix() > b.network.prefix()
                    || (entry.network.prefix() == b.network.prefix() && entry.id < b.id)
            }
        };
        if better {
            best = Some(entry);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_reverse_ipv4() {
        assert_eq!(reverse_ipv4("127.0.0.2".parse().unwrap()), "2.0.0.127");
        assert_eq!(reverse_ipv4("1.2.3.4".parse().unwrap()), "4.3.2.1");
    }

    #[test]
    fn test_reverse_ipv6() {
        let r = reverse_ipv6("::1".parse().unwrap());
        assert_eq!(r.split('.').count(), 32);
        assert!(r.starts_with("1.0.0.0."));
        assert!(r.ends_with(".0.0.0.0"));

        // 2001:db8::1 — leading nibbles of the address appear last
        let r = reverse_ipv6("2001:db8::1".parse().unwrap());
        assert!(r.ends_with("8.b.d.0.1.0.0.2"));
    }

    #[test]
    fn test_parse_reverse_roundtrip_v4() {
        for addr in ["127.0.0.2", "8.8.8.8", "255.255.255.255", "0.0.0.0"] {
            let ip = v4(addr);
            let name = format!("{}.zen.example.org", reverse_ip(ip));
            assert_eq!(parse_reverse(&name, "zen.example.org"), Some(ip));
        }
    }

    #[test]
    fn test_parse_reverse_roundtrip_v6() {
        for addr in ["::1", "2001:db8::dead:beef", "fe80::1:2:3:4"] {
            let ip: IpAddr = addr.parse().unwrap();
            let name = format!("{}.v6.example.org.", reverse_ip(ip));
            assert_eq!(parse_reverse(&name, "v6.example.org"), Some(ip));
        }
    }

    #[test]
    fn test_parse_reverse_rejects_garbage() {
        assert_eq!(parse_reverse("www.zen.example.org", "zen.example.org"), None);
        assert_eq!(parse_reverse("256.0.0.127.zen.example.org", "zen.example.org"), None);
        assert_eq!(parse_reverse("1.2.3.zen.example.org", "zen.example.org"), None);
        assert_eq!(parse_reverse("-1.2.3.4.zen.example.org", "zen.example.org"), None);
        assert_eq!(parse_reverse("zen.example.org", "zen.example.org"), None);
        // suffix must be preceded by a dot
        assert_eq!(parse_reverse("4.3.2.1zen.example.org", "zen.example.org"), None);
    }

    #[test]
    fn test_canonical_collision() {
        assert_eq!(
            canonicalize("2001:db8::1"),
            canonicalize("2001:0DB8:0000:0000:0000:0000:0000:0001")
        );
        assert_eq!(
            canonicalize("2001:db8::1").unwrap(),
            "2001:0db8:0000:0000:0000:0000:0000:0001"
        );
        assert_eq!(canonicalize("127.0.0.1").unwrap(), "127.0.0.1");
        assert_eq!(canonicalize("not an ip"), None);
    }

    #[test]
    fn test_cidr_contains() {
        let net: IpNetwork = "10.0.0.0/8".parse().unwrap();
        assert!(cidr_contains(&net, v4("10.255.0.1")));
        assert!(!cidr_contains(&net, v4("11.0.0.1")));
        // version mismatch is never a match
        assert!(!cidr_contains(&net, "::ffff:10.0.0.1".parse().unwrap()));

        let net6: IpNetwork = "2001:db8::/32".parse().unwrap();
        assert!(cidr_contains(&net6, "2001:db8:ffff::1".parse().unwrap()));
        assert!(!cidr_contains(&net6, v4("10.0.0.1")));
    }

    #[test]
    fn test_longest_prefix_match() {
        let entries = vec![
            NetworkEntry { id: 1, network: "10.0.0.0/8".parse().unwrap(), listed: true },
            NetworkEntry { id: 2, network: "10.1.0.0/16".parse().unwrap(), listed: true },
            NetworkEntry { id: 3, network: "10.1.4.0/24".parse().unwrap(), listed: false },
        ];

        // most specific listed network wins; the /24 is not listed
        let hit = longest_prefix_match(&entries, v4("10.1.4.5")).unwrap();
        assert_eq!(hit.id, 2);

        let hit = longest_prefix_match(&entries, v4("10.200.0.1")).unwrap();
        assert_eq!(hit.id, 1);

        assert!(longest_prefix_match(&entries, v4("192.168.0.1")).is_none());
    }

    #[test]
    fn test_longest_prefix_tie_breaks_by_id() {
        let entries = vec![
            NetworkEntry { id: 7, network: "10.0.0.0/8".parse().unwrap(), listed: true },
            NetworkEntry { id: 3, network: "10.0.0.0/8".parse().unwrap(), listed: true },
        ];
        let hit = longest_prefix_match(&entries, v4("10.1.1.1")).unwrap();
        assert_eq!(hit.id, 3);
    }
}
