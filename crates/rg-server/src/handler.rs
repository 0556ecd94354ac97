//! Request routing: classify the query name, dispatch to the matching
//! engine, encode the answer. Owned zones answer authoritatively
//! (`aa=1, ra=0`); forwarded traffic is relayed verbatim.

use std::net::SocketAddr;
use std::time::Instant;

use tracing::{debug, warn};

use rg_cache::ListStatus;
use rg_dns::packet::{
    self, DnsQuery, RCODE_FORMERR, RCODE_NOERROR, RCODE_NXDOMAIN, RCODE_SERVFAIL,
};
use rg_dns::records::{DnsRecord, RecordType};
use rg_rbl::aggregate::{AGGREGATE_RESPONSE_ADDR, AGGREGATE_TTL};
use rg_rbl::QueryClass;

use crate::SharedServerState;

/// TTL for custom-blocklist answers.
const CUSTOM_TTL: u32 = 3600;
/// TXT body when a custom entry has no administrator-supplied reason.
const CUSTOM_DEFAULT_REASON: &str = "Listed in custom blocklist";

struct Dispatched {
    bytes: Vec<u8>,
    class: &'static str,
    rcode: u8,
    cached: bool,
}

impl Dispatched {
    fn respond(
        query: &DnsQuery,
        answers: Vec<DnsRecord>,
        rcode: u8,
        authoritative: bool,
        class: &'static str,
        cached: bool,
    ) -> Self {
        Self {
            bytes: packet::build_response(query, &answers, rcode, authoritative),
            class,
            rcode,
            cached,
        }
    }
}

/// Handle one wire-format query and produce the wire-format response.
/// Returns an empty vec only for input too mangled to echo a header back.
pub async fn handle_query(query_bytes: &[u8], state: &SharedServerState, src: SocketAddr) -> Vec<u8> {
    let query = match packet::parse_query(query_bytes) {
        Ok(q) => q,
        Err(e) => {
            debug!("Failed to parse DNS query from {}: {}", src, e);
            // FORMERR if at least the header is readable
            if query_bytes.len() >= 12 {
                let mut err_resp = query_bytes[..12].to_vec();
                err_resp[2] |= 0x80; // QR=1
                err_resp[3] = (err_resp[3] & 0xF0) | RCODE_FORMERR;
                return err_resp;
            }
            return vec![];
        }
    };

    let start = Instant::now();
    let result = dispatch(&query, query_bytes, state).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    if let Some(question) = query.questions.first() {
        let state_read = state.read().await;
        if let Some(logger) = &state_read.query_logger {
            logger.log(
                &question.name,
                &question.qtype.to_string(),
                &src.ip().to_string(),
                result.class,
                result.rcode,
                result.cached,
                elapsed_ms,
            );
        }
    }

    result.bytes
}

async fn dispatch(query: &DnsQuery, raw_query: &[u8], state: &SharedServerState) -> Dispatched {
    let Some(question) = query.questions.first() else {
        return Dispatched::respond(query, vec![], RCODE_NOERROR, false, "empty", false);
    };
    let qname = question.name.clone();
    let qtype = question.qtype;

    // Snapshot the handles so no lock is held across upstream awaits
    let (registry, resolver, aggregate, custom, client) = {
        let s = state.read().await;
        (
            s.registry.clone(),
            s.resolver.clone(),
            s.aggregate.clone(),
            s.custom.clone(),
            s.client.clone(),
        )
    };

    match registry.classify(&qname) {
        QueryClass::SingleRbl { rbl, ip } => {
            if !matches!(qtype, RecordType::A | RecordType::TXT) {
                // AAAA and friends: authoritative no-data under RBL zones
                return Dispatched::respond(query, vec![], RCODE_NOERROR, true, "single", false);
            }

            let check = resolver.check_cached(ip, rbl).await;
            let cached = check.from_cache;
            match check.status {
                ListStatus::Listed => {
                    let answers = match (qtype, check.response) {
                        (RecordType::A, Some(addr)) => vec![DnsRecord::a(&qname, addr, check.ttl)],
                        // TXT carries no payload for single RBLs; listed is no-data
                        _ => vec![],
                    };
                    Dispatched::respond(query, answers, RCODE_NOERROR, true, "single", cached)
                }
                ListStatus::NotListed => {
                    Dispatched::respond(query, vec![], RCODE_NXDOMAIN, true, "single", cached)
                }
                ListStatus::Error => {
                    Dispatched::respond(query, vec![], RCODE_SERVFAIL, true, "single", cached)
                }
            }
        }

        QueryClass::Aggregate { zone, ip } => {
            if !matches!(qtype, RecordType::A | RecordType::TXT) {
                return Dispatched::respond(query, vec![], RCODE_NOERROR, true, "aggregate", false);
            }

            let outcome = aggregate.run(ip, zone).await;
            if outcome.listed.is_empty() {
                return Dispatched::respond(query, vec![], RCODE_NXDOMAIN, true, "aggregate", false);
            }

            let answers = if qtype == RecordType::A {
                vec![DnsRecord::a(&qname, AGGREGATE_RESPONSE_ADDR, AGGREGATE_TTL)]
            } else {
                outcome
                    .txt_lines()
                    .iter()
                    .map(|line| DnsRecord::txt(&qname, line, AGGREGATE_TTL))
                    .collect()
            };
            Dispatched::respond(query, answers, RCODE_NOERROR, true, "aggregate", false)
        }

        QueryClass::Custom { ip } => {
            if !matches!(qtype, RecordType::A | RecordType::TXT) {
                return Dispatched::respond(query, vec![], RCODE_NOERROR, true, "custom", false);
            }

            match custom.check(ip) {
                Ok(check) if check.listed => {
                    let answers = if qtype == RecordType::A {
                        match check.response {
                            Some(addr) => vec![DnsRecord::a(&qname, addr, CUSTOM_TTL)],
                            None => vec![],
                        }
                    } else {
                        let reason = check.reason.as_deref().unwrap_or(CUSTOM_DEFAULT_REASON);
                        vec![DnsRecord::txt(&qname, reason, CUSTOM_TTL)]
                    };
                    Dispatched::respond(query, answers, RCODE_NOERROR, true, "custom", false)
                }
                Ok(_) => Dispatched::respond(query, vec![], RCODE_NXDOMAIN, true, "custom", false),
                Err(e) => {
                    warn!("Custom-RBL check failed for {}: {}", ip, e);
                    Dispatched::respond(query, vec![], RCODE_SERVFAIL, true, "custom", false)
                }
            }
        }

        QueryClass::Forward => match client.forward(raw_query).await {
            Ok(response) => {
                let rcode = if response.len() >= 4 { response[3] & 0xF } else { 0 };
                Dispatched {
                    bytes: response,
                    class: "forward",
                    rcode,
                    cached: false,
                }
            }
            Err(e) => {
                warn!("Upstream forward failed for {}: {}", qname, e);
                Dispatched::respond(query, vec![], RCODE_SERVFAIL, false, "forward", false)
            }
        },
    }
}
