//! Deadline-bounded fan-out over an aggregate zone's RBL set.
//!
//! Each member RBL is checked on its own task; results race onto a channel
//! and whatever has arrived by the deadline forms the answer. Stragglers
//! keep running unobserved — their cache writes still land, warming the
//! next query.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout_at;
use tracing::debug;

use rg_cache::ListStatus;

use crate::lookup::{RblCheck, RblResolver};
use crate::types::AggregateZone;

/// Sentinel answer for "listed on at least one RBL".
pub const AGGREGATE_RESPONSE_ADDR: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 2);
/// TTL for aggregate answers.
pub const AGGREGATE_TTL: u32 = 300;
/// Per-RBL TXT listing records are capped to keep UDP responses small.
pub const TXT_LISTING_CAP: usize = 5;

#[derive(Debug, Clone)]
pub struct ListedRbl {
    pub name: String,
    pub response: Ipv4Addr,
}

#[derive(Debug, Clone)]
pub struct AggregateOutcome {
    pub listed: Vec<ListedRbl>,
    pub completed: usize,
    pub total: usize,
    pub elapsed_ms: u64,
}

impl AggregateOutcome {
    pub fn listed_count(&self) -> usize {
        self.listed.len()
    }

    /// Headline TXT: listed/completed, then completed/total with timing.
    pub fn summary(&self) -> String {
        format!(
            "Listed on {}/{} RBLs ({}/{} checked in {}ms)",
            self.listed.len(),
            self.completed,
            self.completed,
            self.total,
            self.elapsed_ms
        )
    }

    /// TXT payload lines: summary, then per-RBL listings capped at
    /// [`TXT_LISTING_CAP`], then an overflow marker when the cap was hit.
    pub fn txt_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(2 + self.listed.len().min(TXT_LISTING_CAP));
        lines.push(self.summary());
        for rbl in self.listed.iter().take(TXT_LISTING_CAP) {
            lines.push(format!("{}: LISTED", rbl.name));
        }
        if self.listed.len() > TXT_LISTING_CAP {
            lines.push(format!(
                "... and {} more ({}/{} shown)",
                self.listed.len() - TXT_LISTING_CAP,
                TXT_LISTING_CAP,
                self.listed.len()
            ));
        }
        lines
    }
}

pub struct AggregateExecutor {
    resolver: Arc<RblResolver>,
    deadline: Duration,
}

impl AggregateExecutor {
    pub fn new(resolver: Arc<RblResolver>, deadline: Duration) -> Self {
        Self { resolver, deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Check `ip` against every RBL in the zone, collecting whatever
    /// completes before the deadline.
    pub async fn run(&self, ip: IpAddr, zone: &AggregateZone) -> AggregateOutcome {
        let total = zone.rbls.len();
        let start = tokio::time::Instant::now();
        let deadline = start + self.deadline;

        let (tx, mut rx) = mpsc::channel::<RblCheck>(total.max(1));
        for rbl in zone.rbls.iter().cloned() {
            let resolver = self.resolver.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let check = resolver.check_cached(ip, &rbl).await;
                let _ = tx.send(check).await;
            });
        }
        drop(tx);

        let mut listed = Vec::new();
        let mut completed = 0usize;
        while completed < total {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(check)) => {
                    completed += 1;
                    if check.status == ListStatus::Listed {
                        if let Some(response) = check.response {
                            listed.push(ListedRbl {
                                name: check.rbl_name,
                                response,
                            });
                        }
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    debug!(
                        "Aggregate deadline hit for {} on {}: {}/{} complete",
                        ip, zone.domain, completed, total
                    );
                    break;
                }
            }
        }

        AggregateOutcome {
            listed,
            completed,
            total,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }
}
