//! Upstream DNS client: originates lookups for the RBL resolver and relays
//! raw queries for the forwarder path. UDP first, TCP retry on truncation.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

use crate::packet::{self, ParsedResponse};
use crate::records::RecordType;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid upstream address: {0}")]
    InvalidAddress(String),
    #[error("upstream query timed out")]
    Timeout,
    #[error("upstream I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed upstream response: {0}")]
    Malformed(#[from] packet::DnsParseError),
    #[error("upstream TCP response too large: {0} bytes")]
    ResponseTooLarge(usize),
}

pub struct DnsClient {
    server: SocketAddr,
    timeout: Duration,
}

impl DnsClient {
    /// Accepts `ip`, `ip:port`, `v6addr` or `[v6addr]:port`; a missing port
    /// defaults to 53.
    pub fn new(server: &str, timeout_ms: u64) -> Result<Self, ClientError> {
        let server = parse_server_addr(server)
            .ok_or_else(|| ClientError::InvalidAddress(server.to_string()))?;
        Ok(Self {
            server,
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Originate a single-question query (fresh ID, RD=1) and parse the
    /// reply into sections. Any well-formed reply is Ok regardless of rcode;
    /// the caller classifies.
    pub async fn query(&self, name: &str, qtype: RecordType) -> Result<ParsedResponse, ClientError> {
        let id = rand::random::<u16>();
        let query = packet::build_query(id, name, qtype);
        let response = self.exchange(&query).await?;
        Ok(packet::parse_response_sections(&response)?)
    }

    /// Relay a client's raw query bytes and return the upstream reply
    /// verbatim (same transaction ID, all sections intact).
    pub async fn forward(&self, query: &[u8]) -> Result<Vec<u8>, ClientError> {
        self.exchange(query).await
    }

    async fn exchange(&self, query: &[u8]) -> Result<Vec<u8>, ClientError> {
        let response = self.exchange_udp(query).await?;

        // TC flag set: retry over TCP, fall back to the truncated UDP reply
        if response.len() >= 4 && response[2] & 0x02 != 0 {
            debug!("Truncated response from {}, retrying over TCP", self.server);
            match self.exchange_tcp(query).await {
                Ok(tcp_response) => return Ok(tcp_response),
                Err(e) => debug!("TCP retry to {} failed: {}", self.server, e),
            }
        }

        Ok(response)
    }

    async fn exchange_udp(&self, query: &[u8]) -> Result<Vec<u8>, ClientError> {
        let bind_addr: SocketAddr = if self.server.is_ipv4() {
            "0.0.0.0:0".parse().expect("valid bind address")
        } else {
            "[::]:0".parse().expect("valid bind address")
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        socket.send_to(query, self.server).await?;

        let mut buf = vec![0u8; 4096];
        let len = timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| ClientError::Timeout)??;
        buf.truncate(len);
        Ok(buf)
    }

    async fn exchange_tcp(&self, query: &[u8]) -> Result<Vec<u8>, ClientError> {
        let mut stream = timeout(self.timeout, TcpStream::connect(self.server))
            .await
            .map_err(|_| ClientError::Timeout)??;

        // TCP DNS: 2-byte length prefix
        let len_bytes = (query.len() as u16).to_be_bytes();
        stream.write_all(&len_bytes).await?;
        stream.write_all(query).await?;

        let mut len_buf = [0u8; 2];
        timeout(self.timeout, stream.read_exact(&mut len_buf))
            .await
            .map_err(|_| ClientError::Timeout)??;
        let response_len = u16::from_be_bytes(len_buf) as usize;

        if response_len > 65535 {
            return Err(ClientError::ResponseTooLarge(response_len));
        }

        let mut response = vec![0u8; response_len];
        timeout(self.timeout, stream.read_exact(&mut response))
            .await
            .map_err(|_| ClientError::Timeout)??;
        Ok(response)
    }
}

fn parse_server_addr(s: &str) -> Option<SocketAddr> {
    if s.contains("]:") {
        // IPv6 with port
        s.parse().ok()
    } else if s.contains(':') && s.matches(':').count() == 1 {
        // IPv4 with port
        s.parse().ok()
    } else if s.contains(':') {
        // IPv6 without port
        format!("[{}]:53", s).parse().ok()
    } else {
        // IPv4 without port
        format!("{}:53", s).parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::RCODE_NOERROR;
    use crate::records::{DnsRecord, RData};
    use std::net::Ipv4Addr;

    #[test]
    fn test_parse_server_addr() {
        assert_eq!(
            parse_server_addr("8.8.8.8").unwrap(),
            "8.8.8.8:53".parse().unwrap()
        );
        assert_eq!(
            parse_server_addr("8.8.8.8:5353").unwrap(),
            "8.8.8.8:5353".parse().unwrap()
        );
        assert_eq!(
            parse_server_addr("2001:4860:4860::8888").unwrap(),
            "[2001:4860:4860::8888]:53".parse().unwrap()
        );
        assert_eq!(
            parse_server_addr("[::1]:5300").unwrap(),
            "[::1]:5300".parse().unwrap()
        );
        assert!(parse_server_addr("not an address").is_none());
    }

    /// Spin up a UDP responder that answers every A query with 127.0.0.2.
    async fn spawn_stub(respond: bool) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let (len, src) = match socket.recv_from(&mut buf).await {
                    Ok(r) => r,
                    Err(_) => break,
                };
                if !respond {
                    continue;
                }
                let query = packet::parse_query(&buf[..len]).unwrap();
                let name = query.questions[0].name.clone();
                let answers = vec![DnsRecord::a(&name, Ipv4Addr::new(127, 0, 0, 2), 900)];
                let response = packet::build_response(&query, &answers, RCODE_NOERROR, false);
                let _ = socket.send_to(&response, src).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_query_parses_answer() {
        let addr = spawn_stub(true).await;
        let client = DnsClient::new(&addr.to_string(), 2000).unwrap();

        let response = client
            .query("2.0.0.127.zen.example.org", RecordType::A)
            .await
            .unwrap();
        assert_eq!(response.header.rcode(), RCODE_NOERROR);
        assert_eq!(response.answers.len(), 1);
        assert_eq!(response.answers[0].ttl, 900);
        match response.answers[0].rdata {
            RData::A(ip) => assert_eq!(ip, Ipv4Addr::new(127, 0, 0, 2)),
            _ => panic!("Expected A record"),
        }
    }

    #[tokio::test]
    async fn test_query_timeout() {
        let addr = spawn_stub(false).await;
        let client = DnsClient::new(&addr.to_string(), 200).unwrap();

        let err = client
            .query("2.0.0.127.zen.example.org", RecordType::A)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
    }

    #[tokio::test]
    async fn test_forward_relays_id() {
        let addr = spawn_stub(true).await;
        let client = DnsClient::new(&addr.to_string(), 2000).unwrap();

        let query = packet::build_query(0xBEEF, "example.com", RecordType::A);
        let response = client.forward(&query).await.unwrap();
        assert_eq!(u16::from_be_bytes([response[0], response[1]]), 0xBEEF);
    }
}
