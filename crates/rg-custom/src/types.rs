use std::net::Ipv4Addr;

use ipnetwork::IpNetwork;

/// Address returned for custom-blocklist hits.
pub const CUSTOM_RESPONSE_ADDR: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 2);

/// One administered blocklist row.
#[derive(Debug, Clone)]
pub struct CustomEntry {
    pub id: i64,
    pub network: IpNetwork,
    pub listed: bool,
    pub reason: Option<String>,
    pub added_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// The single zone-configuration row. The DNS engine reads it at startup
/// and on reload; only the administrative surface writes it.
#[derive(Debug, Clone)]
pub struct CustomZoneConfig {
    pub zone_name: String,
    pub description: Option<String>,
    pub enabled: bool,
}

/// Outcome of a containment check against the table.
#[derive(Debug, Clone)]
pub struct CustomCheck {
    pub listed: bool,
    pub response: Option<Ipv4Addr>,
    pub reason: Option<String>,
    pub network: Option<IpNetwork>,
    pub matched_id: Option<i64>,
}

impl CustomCheck {
    pub fn not_listed() -> Self {
        Self {
            listed: false,
            response: None,
            reason: None,
            network: None,
            matched_id: None,
        }
    }
}
