//! Loading of the RBL servers file and the optional aggregate zones file.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::types::{AggregateZone, Rbl};

#[derive(Debug, Deserialize)]
struct AggregateZoneEntry {
    domain: String,
    #[serde(default)]
    description: Option<String>,
    rbls: RblSelection,
}

/// `"*"` selects every configured RBL; otherwise an explicit host list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RblSelection {
    Wildcard(String),
    List(Vec<String>),
}

/// Load the RBL servers file: a JSON array of `{name, host, description}`.
/// Hosts are lowercased; duplicate hosts keep the first occurrence.
pub fn load_rbl_servers(path: &Path) -> Result<Vec<Rbl>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read RBL servers file {}", path.display()))?;
    let mut rbls: Vec<Rbl> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse RBL servers file {}", path.display()))?;

    let mut seen = Vec::new();
    rbls.retain_mut(|rbl| {
        rbl.host = rbl.host.trim_end_matches('.').to_lowercase();
        if rbl.host.is_empty() {
            warn!("Dropping RBL '{}' with empty host", rbl.name);
            return false;
        }
        if seen.contains(&rbl.host) {
            warn!("Dropping duplicate RBL host {}", rbl.host);
            return false;
        }
        seen.push(rbl.host.clone());
        true
    });

    info!("Loaded {} RBL servers from {}", rbls.len(), path.display());
    Ok(rbls)
}

/// Load the aggregate zones file and expand each zone's member selection
/// against the loaded RBL set. Hosts in an explicit list that match no
/// configured RBL are dropped with a warning.
pub fn load_aggregate_zones(path: &Path, rbls: &[Rbl]) -> Result<Vec<AggregateZone>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read aggregate zones file {}", path.display()))?;
    let entries: Vec<AggregateZoneEntry> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse aggregate zones file {}", path.display()))?;

    let mut zones = Vec::with_capacity(entries.len());
    for entry in entries {
        let domain = entry.domain.trim_end_matches('.').to_lowercase();
        let members = match entry.rbls {
            RblSelection::Wildcard(s) if s == "*" => rbls.to_vec(),
            RblSelection::Wildcard(s) => {
                bail!("Aggregate zone {}: unknown RBL selector '{}'", domain, s)
            }
            RblSelection::List(hosts) => {
                let mut members = Vec::with_capacity(hosts.len());
                for host in hosts {
                    let host = host.trim_end_matches('.').to_lowercase();
                    match rbls.iter().find(|r| r.host == host) {
                        Some(rbl) => members.push(rbl.clone()),
                        None => warn!("Aggregate zone {}: unknown RBL host {}, skipping", domain, host),
                    }
                }
                members
            }
        };

        if members.is_empty() {
            warn!("Aggregate zone {} has no usable RBLs", domain);
        }
        info!("Aggregate zone {} expanded to {} RBLs", domain, members.len());

        zones.push(AggregateZone {
            domain,
            description: entry.description,
            rbls: members,
        });
    }

    Ok(zones)
}
