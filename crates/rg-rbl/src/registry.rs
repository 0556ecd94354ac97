//! Query-name classification: which zone owns a name, and which reversed
//! address it encodes.

use std::net::IpAddr;

use rg_common::ip::parse_reverse_prefix;

use crate::types::{AggregateZone, Rbl};

/// Immutable routing table built at startup (and rebuilt wholesale on
/// reload). Aggregate and custom zones take precedence over single RBLs;
/// among single RBLs the longest zone suffix wins; everything else is
/// forwarded.
pub struct ZoneRegistry {
    rbls: Vec<Rbl>,
    aggregates: Vec<AggregateZone>,
    custom_zone: Option<String>,
}

#[derive(Debug)]
pub enum QueryClass<'a> {
    SingleRbl { rbl: &'a Rbl, ip: IpAddr },
    Aggregate { zone: &'a AggregateZone, ip: IpAddr },
    Custom { ip: IpAddr },
    Forward,
}

impl ZoneRegistry {
    pub fn new(
        mut rbls: Vec<Rbl>,
        mut aggregates: Vec<AggregateZone>,
        custom_zone: Option<String>,
    ) -> Self {
        for rbl in &mut rbls {
            rbl.host = rbl.host.trim_end_matches('.').to_lowercase();
        }
        for zone in &mut aggregates {
            zone.domain = zone.domain.trim_end_matches('.').to_lowercase();
        }
        let custom_zone = custom_zone.map(|z| z.trim_end_matches('.').to_lowercase());
        Self {
            rbls,
            aggregates,
            custom_zone,
        }
    }

    pub fn rbls(&self) -> &[Rbl] {
        &self.rbls
    }

    pub fn aggregates(&self) -> &[AggregateZone] {
        &self.aggregates
    }

    pub fn custom_zone(&self) -> Option<&str> {
        self.custom_zone.as_deref()
    }

    /// Classify a query name. A name under an owned zone whose prefix does
    /// not parse as a reversed IP falls through to `Forward`.
    pub fn classify(&self, qname: &str) -> QueryClass<'_> {
        let name = qname.trim_end_matches('.').to_lowercase();

        for zone in &self.aggregates {
            if let Some(prefix) = strip_zone_suffix(&name, &zone.domain) {
                if let Some(ip) = parse_reverse_prefix(prefix) {
                    return QueryClass::Aggregate { zone, ip };
                }
            }
        }

        if let Some(custom) = &self.custom_zone {
            if let Some(prefix) = strip_zone_suffix(&name, custom) {
                if let Some(ip) = parse_reverse_prefix(prefix) {
                    return QueryClass::Custom { ip };
                }
            }
        }

        let mut best: Option<(&Rbl, IpAddr)> = None;
        for rbl in &self.rbls {
            if let Some(prefix) = strip_zone_suffix(&name, &rbl.host) {
                if let Some(ip) = parse_reverse_prefix(prefix) {
                    let longer = best.map_or(true, |(b, _)| rbl.host.len() > b.host.len());
                    if longer {
                        best = Some((rbl, ip));
                    }
                }
            }
        }
        if let Some((rbl, ip)) = best {
            return QueryClass::SingleRbl { rbl, ip };
        }

        QueryClass::Forward
    }
}

/// The non-empty label prefix of `name` under `.zone`, or None when `name`
/// is not strictly under `zone`.
fn strip_zone_suffix<'a>(name: &'a str, zone: &str) -> Option<&'a str> {
    if zone.is_empty() {
        return None;
    }
    let rest = name.strip_suffix(zone)?;
    let rest = rest.strip_suffix('.')?;
    if rest.is_empty() {
        return None;
    }
    Some(rest)
}
