//! UDP and TCP listeners on one port. Each inbound request is handled on
//! its own task; the accept loops stop when the shutdown channel fires,
//! leaving in-flight requests to finish within their own deadlines.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use rg_dns::packet;

use crate::handler;
use crate::SharedServerState;

/// Run the DNS UDP server on the given address.
pub async fn run_udp_server(
    addr: SocketAddr,
    state: SharedServerState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let socket = Arc::new(UdpSocket::bind(addr).await?);
    info!("DNS UDP server listening on {}", addr);

    let mut buf = [0u8; 4096];

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("DNS UDP server on {} stopping", addr);
                return Ok(());
            }
            recv = socket.recv_from(&mut buf) => {
                let (len, src) = match recv {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("UDP recv error: {}", e);
                        continue;
                    }
                };

                let packet_bytes = buf[..len].to_vec();
                let socket = socket.clone();
                let state = state.clone();

                tokio::spawn(async move {
                    let edns_udp_size = packet::peek_edns_udp_size(&packet_bytes);
                    let mut response = handler::handle_query(&packet_bytes, &state, src).await;
                    // Silently drop responses for unparseable packets
                    if response.is_empty() {
                        return;
                    }
                    // Use the client's EDNS0 payload size if advertised,
                    // else the RFC 1035 limit (512)
                    let max_udp = if edns_udp_size > 0 {
                        (edns_udp_size as usize).min(4096)
                    } else {
                        512
                    };
                    packet::truncate_for_udp(&mut response, max_udp);
                    if let Err(e) = socket.send_to(&response, src).await {
                        debug!("Failed to send UDP response to {}: {}", src, e);
                    }
                });
            }
        }
    }
}

/// Run the DNS TCP server on the given address.
pub async fn run_tcp_server(
    addr: SocketAddr,
    state: SharedServerState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("DNS TCP server listening on {}", addr);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("DNS TCP server on {} stopping", addr);
                return Ok(());
            }
            accept = listener.accept() => {
                let (stream, src) = match accept {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("TCP accept error: {}", e);
                        continue;
                    }
                };

                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_tcp_connection(stream, src, &state).await {
                        debug!("TCP connection error from {}: {}", src, e);
                    }
                });
            }
        }
    }
}

async fn handle_tcp_connection(
    mut stream: tokio::net::TcpStream,
    src: SocketAddr,
    state: &SharedServerState,
) -> Result<()> {
    // TCP DNS: 2-byte length prefix, then the message
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let msg_len = u16::from_be_bytes(len_buf) as usize;

    if msg_len < 12 {
        return Ok(());
    }

    let mut query_buf = vec![0u8; msg_len];
    stream.read_exact(&mut query_buf).await?;

    let response = handler::handle_query(&query_buf, state, src).await;
    if response.is_empty() {
        return Ok(());
    }

    let len_bytes = (response.len() as u16).to_be_bytes();
    stream.write_all(&len_bytes).await?;
    stream.write_all(&response).await?;

    Ok(())
}
