//! Single-RBL resolution: compose the reversed query name, ask upstream,
//! classify the outcome. DNSBL semantics: an A answer means listed, an
//! authoritative NXDOMAIN (or empty answer) means clean, anything else is
//! an error that must not be mistaken for either.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::debug;

use rg_cache::{ListStatus, TieredCache};
use rg_common::error::LookupErrorKind;
use rg_common::ip::reverse_ip;
use rg_common::now_epoch;
use rg_dns::packet::{RCODE_NOERROR, RCODE_NXDOMAIN};
use rg_dns::records::{RData, RecordType};
use rg_dns::{ClientError, DnsClient};

use crate::types::Rbl;

/// TTL for a clean (not listed) classification.
const NOT_LISTED_TTL: u32 = 3600;
/// TTL for an error classification; short so transient failures retry soon.
const ERROR_TTL: u32 = 300;
/// TTL for a listed answer whose records carried none.
const DEFAULT_LISTED_TTL: u32 = 3600;

/// Outcome of checking one IP against one RBL.
#[derive(Debug, Clone)]
pub struct RblCheck {
    pub rbl_name: String,
    pub rbl_host: String,
    pub status: ListStatus,
    pub response: Option<Ipv4Addr>,
    pub error: Option<LookupErrorKind>,
    pub ttl: u32,
    pub response_time_ms: u64,
    pub from_cache: bool,
}

/// Resolver over one upstream client and the shared cache. Both collaborators
/// are handed in at construction; the resolver owns no global state.
pub struct RblResolver {
    client: Arc<DnsClient>,
    cache: Arc<TieredCache>,
    timeout: Duration,
}

impl RblResolver {
    pub fn new(client: Arc<DnsClient>, cache: Arc<TieredCache>, timeout: Duration) -> Self {
        Self {
            client,
            cache,
            timeout,
        }
    }

    /// Perform the upstream lookup and classify, bypassing the cache.
    pub async fn lookup(&self, ip: IpAddr, rbl: &Rbl) -> RblCheck {
        let qname = format!("{}.{}", reverse_ip(ip), rbl.host);
        let start = Instant::now();

        let outcome = timeout(self.timeout, self.client.query(&qname, RecordType::A)).await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        let (status, response, error, ttl) = match outcome {
            Err(_) => (ListStatus::Error, None, Some(LookupErrorKind::Timeout), ERROR_TTL),
            Ok(Err(ClientError::Timeout)) => {
                (ListStatus::Error, None, Some(LookupErrorKind::Timeout), ERROR_TTL)
            }
            Ok(Err(e)) => {
                debug!("RBL lookup {} failed: {}", qname, e);
                (ListStatus::Error, None, Some(LookupErrorKind::Network), ERROR_TTL)
            }
            Ok(Ok(reply)) => match reply.header.rcode() {
                RCODE_NXDOMAIN => (ListStatus::NotListed, None, None, NOT_LISTED_TTL),
                RCODE_NOERROR => {
                    let first_a = reply.answers.iter().find_map(|r| match r.rdata {
                        RData::A(addr) => Some(addr),
                        _ => None,
                    });
                    match first_a {
                        Some(addr) => {
                            let ttl = reply
                                .answers
                                .iter()
                                .map(|r| r.ttl)
                                .max()
                                .map(|t| t.max(1))
                                .unwrap_or(DEFAULT_LISTED_TTL);
                            (ListStatus::Listed, Some(addr), None, ttl)
                        }
                        // NOERROR with no A records: no data for this name
                        None => (ListStatus::NotListed, None, None, NOT_LISTED_TTL),
                    }
                }
                rcode => {
                    debug!("RBL lookup {} answered rcode {}", qname, rcode);
                    (
                        ListStatus::Error,
                        None,
                        Some(LookupErrorKind::UpstreamServfail),
                        ERROR_TTL,
                    )
                }
            },
        };

        RblCheck {
            rbl_name: rbl.name.clone(),
            rbl_host: rbl.host.clone(),
            status,
            response,
            error,
            ttl,
            response_time_ms,
            from_cache: false,
        }
    }

    /// Cache-aware check: a hit returns immediately; a miss resolves upstream
    /// and queues the cache write without waiting for it.
    pub async fn check_cached(&self, ip: IpAddr, rbl: &Rbl) -> RblCheck {
        if let Some(entry) = self.cache.get(ip, &rbl.host).await {
            return RblCheck {
                rbl_name: rbl.name.clone(),
                rbl_host: rbl.host.clone(),
                status: entry.status,
                response: entry.response,
                error: entry.error.as_deref().and_then(LookupErrorKind::parse),
                ttl: entry.remaining_ttl(now_epoch()),
                response_time_ms: 0,
                from_cache: true,
            };
        }

        let check = self.lookup(ip, rbl).await;
        self.cache.put_background(
            ip,
            &rbl.host,
            check.status,
            check.response,
            check.error.map(|k| k.as_str().to_string()),
            check.ttl,
        );
        check
    }
}
