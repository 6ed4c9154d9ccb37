//! The DNS server loop: accepts UDP packets and dispatches them to the
//! activation engine.
//!
//! This is deliberately thin — packet decode/encode is `hickory_proto`'s
//! job, and the decision of what to do with a query lives entirely in
//! [`crate::engine::Engine`]. This module's only responsibility is the
//! accept loop and wiring a parsed query to `Engine::process`.

use std::sync::Arc;

use anyhow::{Context, Result};
use hickory_proto::op::Message;
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use tokio::net::UdpSocket;
use tracing::{error, warn};

use crate::engine::Engine;

const MAX_PACKET_SIZE: usize = 4096;

/// Bind `listen_address` and serve DNS queries until the process exits.
pub async fn run(listen_address: &str, engine: Arc<Engine>) -> Result<()> {
    let socket = UdpSocket::bind(listen_address)
        .await
        .with_context(|| format!("failed to bind DNS listener on {listen_address}"))?;
    let socket = Arc::new(socket);

    tracing::info!(address = %listen_address, "DNS server listening");

    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "failed to receive UDP packet");
                continue;
            }
        };

        let query = match Message::from_bytes(&buf[..len]) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, %src, "dropped malformed DNS packet");
                continue;
            }
        };

        let socket = socket.clone();
        let engine = engine.clone();
        tokio::spawn(async move {
            let Some(response) = engine.process(&query).await else {
                return;
            };

            match response.to_bytes() {
                Ok(bytes) => {
                    if let Err(e) = socket.send_to(&bytes, src).await {
                        warn!(error = %e, %src, "failed to send DNS response");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to encode DNS response");
                }
            }
        });
    }
}
