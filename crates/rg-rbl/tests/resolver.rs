//! End-to-end resolver behaviour against a scripted local upstream.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;

use rg_cache::{CacheStore, ListStatus, MemoryCache, TieredCache};
use rg_common::error::LookupErrorKind;
use rg_dns::packet::{self, RCODE_NOERROR, RCODE_NXDOMAIN, RCODE_SERVFAIL};
use rg_dns::records::DnsRecord;
use rg_dns::DnsClient;
use rg_rbl::aggregate::AggregateExecutor;
use rg_rbl::lookup::RblResolver;
use rg_rbl::types::{AggregateZone, Rbl};

/// What the stub upstream does for one query name.
#[derive(Clone)]
enum Behavior {
    /// Answer with an A record after a delay.
    Listed { addr: Ipv4Addr, ttl: u32, delay_ms: u64 },
    /// Answer NXDOMAIN after a delay.
    NotListed { delay_ms: u64 },
    /// Answer SERVFAIL immediately.
    Servfail,
    /// Never answer.
    Silent,
}

/// A local UDP nameserver driven by a per-qname behavior table.
/// Unknown names answer NXDOMAIN.
async fn spawn_stub(rules: Vec<(String, Behavior)>) -> SocketAddr {
    let rules: HashMap<String, Behavior> = rules.into_iter().collect();
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        loop {
            let (len, src) = match socket.recv_from(&mut buf).await {
                Ok(r) => r,
                Err(_) => break,
            };
            let query = match packet::parse_query(&buf[..len]) {
                Ok(q) => q,
                Err(_) => continue,
            };
            let name = query.questions[0].name.clone();
            let behavior = rules
                .get(&name)
                .cloned()
                .unwrap_or(Behavior::NotListed { delay_ms: 0 });

            let socket = socket.clone();
            tokio::spawn(async move {
                let response = match behavior {
                    Behavior::Listed { addr, ttl, delay_ms } => {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        let answers = vec![DnsRecord::a(&name, addr, ttl)];
                        packet::build_response(&query, &answers, RCODE_NOERROR, false)
                    }
                    Behavior::NotListed { delay_ms } => {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        packet::build_error_response(&query, RCODE_NXDOMAIN, false)
                    }
                    Behavior::Servfail => packet::build_error_response(&query, RCODE_SERVFAIL, false),
                    Behavior::Silent => return,
                };
                let _ = socket.send_to(&response, src).await;
            });
        }
    });

    addr
}

fn rbl(name: &str, host: &str) -> Rbl {
    Rbl {
        name: name.to_string(),
        host: host.to_string(),
        description: String::new(),
    }
}

fn make_resolver(upstream: SocketAddr, timeout_ms: u64) -> (Arc<RblResolver>, Arc<TieredCache>) {
    let client = Arc::new(DnsClient::new(&upstream.to_string(), timeout_ms).unwrap());
    let cache = Arc::new(TieredCache::new(
        CacheStore::open_memory().unwrap(),
        Some(MemoryCache::new(128)),
    ));
    let resolver = Arc::new(RblResolver::new(client, cache.clone(), Duration::from_millis(timeout_ms)));
    (resolver, cache)
}

#[tokio::test]
async fn test_lookup_listed() {
    let upstream = spawn_stub(vec![(
        "2.0.0.127.zen.test".to_string(),
        Behavior::Listed { addr: Ipv4Addr::new(127, 0, 0, 2), ttl: 900, delay_ms: 0 },
    )])
    .await;
    let (resolver, _) = make_resolver(upstream, 2000);

    let check = resolver
        .lookup("127.0.0.2".parse().unwrap(), &rbl("Zen", "zen.test"))
        .await;
    assert_eq!(check.status, ListStatus::Listed);
    assert_eq!(check.response, Some(Ipv4Addr::new(127, 0, 0, 2)));
    assert_eq!(check.ttl, 900);
    assert!(!check.from_cache);
}

#[tokio::test]
async fn test_lookup_not_listed() {
    let upstream = spawn_stub(vec![]).await;
    let (resolver, _) = make_resolver(upstream, 2000);

    let check = resolver
        .lookup("8.8.8.8".parse().unwrap(), &rbl("Zen", "zen.test"))
        .await;
    assert_eq!(check.status, ListStatus::NotListed);
    assert_eq!(check.response, None);
    assert_eq!(check.error, None);
    assert_eq!(check.ttl, 3600);
}

#[tokio::test]
async fn test_lookup_servfail_classifies_as_error() {
    let upstream = spawn_stub(vec![(
        "2.0.0.127.zen.test".to_string(),
        Behavior::Servfail,
    )])
    .await;
    let (resolver, _) = make_resolver(upstream, 2000);

    let check = resolver
        .lookup("127.0.0.2".parse().unwrap(), &rbl("Zen", "zen.test"))
        .await;
    assert_eq!(check.status, ListStatus::Error);
    assert_eq!(check.error, Some(LookupErrorKind::UpstreamServfail));
    assert_eq!(check.ttl, 300);
}

#[tokio::test]
async fn test_lookup_timeout_classifies_as_error() {
    let upstream = spawn_stub(vec![(
        "2.0.0.127.zen.test".to_string(),
        Behavior::Silent,
    )])
    .await;
    let (resolver, _) = make_resolver(upstream, 200);

    let check = resolver
        .lookup("127.0.0.2".parse().unwrap(), &rbl("Zen", "zen.test"))
        .await;
    assert_eq!(check.status, ListStatus::Error);
    assert_eq!(check.error, Some(LookupErrorKind::Timeout));
    assert_eq!(check.ttl, 300);
}

#[tokio::test]
async fn test_check_cached_miss_then_hit() {
    let upstream = spawn_stub(vec![(
        "2.0.0.127.zen.test".to_string(),
        Behavior::Listed { addr: Ipv4Addr::new(127, 0, 0, 2), ttl: 900, delay_ms: 0 },
    )])
    .await;
    let (resolver, cache) = make_resolver(upstream, 2000);
    let ip: IpAddr = "127.0.0.2".parse().unwrap();
    let zen = rbl("Zen", "zen.test");

    let first = resolver.check_cached(ip, &zen).await;
    assert!(!first.from_cache);
    assert_eq!(first.status, ListStatus::Listed);

    // the cache write is fire-and-forget; wait for it to land
    for _ in 0..50 {
        if cache.get(ip, "zen.test").await.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let second = resolver.check_cached(ip, &zen).await;
    assert!(second.from_cache);
    assert_eq!(second.response_time_ms, 0);
    assert_eq!(second.status, ListStatus::Listed);
    assert_eq!(second.response, Some(Ipv4Addr::new(127, 0, 0, 2)));
}

#[tokio::test]
async fn test_check_cached_prefers_cache_over_upstream() {
    // the stub would never answer; only the prepopulated cache can
    let upstream = spawn_stub(vec![(
        "4.3.2.1.bl.test".to_string(),
        Behavior::Silent,
    )])
    .await;
    let (resolver, cache) = make_resolver(upstream, 300);
    let ip: IpAddr = "1.2.3.4".parse().unwrap();

    cache
        .put(ip, "bl.test", ListStatus::Listed, Some(Ipv4Addr::new(127, 0, 0, 2)), None, 600)
        .await
        .unwrap();

    let start = Instant::now();
    let check = resolver.check_cached(ip, &rbl("BL", "bl.test")).await;
    assert!(check.from_cache);
    assert_eq!(check.status, ListStatus::Listed);
    // answered from cache, not by waiting out the silent upstream
    assert!(start.elapsed() < Duration::from_millis(200));
}

#[tokio::test]
async fn test_aggregate_collects_fast_lookups_only() {
    let upstream = spawn_stub(vec![
        (
            "2.0.0.127.a.test".to_string(),
            Behavior::Listed { addr: Ipv4Addr::new(127, 0, 0, 3), ttl: 300, delay_ms: 10 },
        ),
        (
            "2.0.0.127.b.test".to_string(),
            Behavior::Listed { addr: Ipv4Addr::new(127, 0, 0, 5), ttl: 300, delay_ms: 20 },
        ),
        (
            "2.0.0.127.c.test".to_string(),
            Behavior::NotListed { delay_ms: 500 },
        ),
    ])
    .await;
    let (resolver, _) = make_resolver(upstream, 2000);
    let executor = AggregateExecutor::new(resolver, Duration::from_millis(250));

    let zone = AggregateZone {
        domain: "multi.example.com".to_string(),
        description: None,
        rbls: vec![rbl("A", "a.test"), rbl("B", "b.test"), rbl("C", "c.test")],
    };

    let start = Instant::now();
    let outcome = executor.run("127.0.0.2".parse().unwrap(), &zone).await;

    assert_eq!(outcome.total, 3);
    assert_eq!(outcome.completed, 2);
    assert_eq!(outcome.listed.len(), 2);
    assert!(start.elapsed() < Duration::from_millis(400));

    let summary = outcome.summary();
    assert!(summary.starts_with("Listed on 2/2 RBLs (2/3 checked in"), "bad summary: {}", summary);
}

#[tokio::test]
async fn test_aggregate_deadline_with_everything_slow() {
    let upstream = spawn_stub(vec![
        ("2.0.0.127.a.test".to_string(), Behavior::NotListed { delay_ms: 500 }),
        ("2.0.0.127.b.test".to_string(), Behavior::NotListed { delay_ms: 500 }),
        ("2.0.0.127.c.test".to_string(), Behavior::NotListed { delay_ms: 500 }),
    ])
    .await;
    let (resolver, _) = make_resolver(upstream, 2000);
    let executor = AggregateExecutor::new(resolver, Duration::from_millis(250));

    let zone = AggregateZone {
        domain: "multi.example.com".to_string(),
        description: None,
        rbls: vec![rbl("A", "a.test"), rbl("B", "b.test"), rbl("C", "c.test")],
    };

    let start = Instant::now();
    let outcome = executor.run("127.0.0.2".parse().unwrap(), &zone).await;
    let elapsed = start.elapsed();

    assert_eq!(outcome.completed, 0);
    assert_eq!(outcome.listed.len(), 0);
    // emitted within a small constant overhead of the deadline
    assert!(elapsed >= Duration::from_millis(240), "returned too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(400), "returned too late: {:?}", elapsed);
}

#[tokio::test]
async fn test_aggregate_stragglers_still_populate_cache() {
    let upstream = spawn_stub(vec![(
        "2.0.0.127.slow.test".to_string(),
        Behavior::Listed { addr: Ipv4Addr::new(127, 0, 0, 2), ttl: 300, delay_ms: 300 },
    )])
    .await;
    let (resolver, cache) = make_resolver(upstream, 2000);
    let executor = AggregateExecutor::new(resolver, Duration::from_millis(100));

    let zone = AggregateZone {
        domain: "multi.example.com".to_string(),
        description: None,
        rbls: vec![rbl("Slow", "slow.test")],
    };

    let ip: IpAddr = "127.0.0.2".parse().unwrap();
    let outcome = executor.run(ip, &zone).await;
    assert_eq!(outcome.completed, 0);

    // the abandoned lookup drains in the background and lands in the cache
    let mut cached = None;
    for _ in 0..100 {
        cached = cache.get(ip, "slow.test").await;
        if cached.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let entry = cached.expect("straggler lookup should have populated the cache");
    assert_eq!(entry.status, ListStatus::Listed);
}
