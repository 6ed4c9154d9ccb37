//! Client for the gratuitous-ARP notifier.
//!
//! The notifier itself (whatever sends the actual Layer-2 frame) lives
//! outside this crate; we only speak its wire protocol: a length-prefixed
//! frame carrying a six-byte MAC and a four-byte IPv4 address over TCP.
//! The connection is opened lazily and reconnected on the next send if it
//! has dropped.

use std::net::Ipv4Addr;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum GarpError {
    #[error("failed to connect to gARP notifier at {0}: {1}")]
    Connect(String, std::io::Error),
    #[error("failed to send gARP frame: {0}")]
    Send(std::io::Error),
}

/// Sends gratuitous-ARP announcements to a notifier reachable at a fixed
/// TCP address (typically a VM on the same host, per the spec's
/// `garp_domain`/connection-string convention).
pub struct GarpNotifier {
    addr: String,
    conn: Mutex<Option<TcpStream>>,
}

impl GarpNotifier {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            conn: Mutex::new(None),
        }
    }

    /// Announce that `mac` now answers for `ip`. Failures are returned to
    /// the caller, which (per the activation engine's error rules) logs
    /// and continues rather than aborting activation.
    pub async fn send_garp(&self, mac: [u8; 6], ip: Ipv4Addr) -> Result<(), GarpError> {
        let mut frame = Vec::with_capacity(2 + 6 + 4);
        frame.extend_from_slice(&10u16.to_be_bytes());
        frame.extend_from_slice(&mac);
        frame.extend_from_slice(&ip.octets());

        let mut guard = self.conn.lock().await;

        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }

        if let Some(stream) = guard.as_mut() {
            if let Err(e) = stream.write_all(&frame).await {
                warn!(error = %e, "gARP connection dropped, will reconnect on next send");
                *guard = None;
                return Err(GarpError::Send(e));
            }
        }

        debug!(ip = %ip, "gARP sent");
        Ok(())
    }

    async fn connect(&self) -> Result<TcpStream, GarpError> {
        TcpStream::connect(&self.addr)
            .await
            .map_err(|e| GarpError::Connect(self.addr.clone(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn sends_a_length_prefixed_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 12];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let notifier = GarpNotifier::new(addr.to_string());
        notifier
            .send_garp([0x52, 0x54, 0x00, 0x11, 0x22, 0x33], "10.0.0.7".parse().unwrap())
            .await
            .unwrap();

        let received = server.await.unwrap();
        assert_eq!(&received[0..2], &10u16.to_be_bytes());
        assert_eq!(&received[2..8], &[0x52, 0x54, 0x00, 0x11, 0x22, 0x33]);
        assert_eq!(&received[8..12], &[10, 0, 0, 7]);
    }

    #[tokio::test]
    async fn reports_connect_failure_without_panicking() {
        let notifier = GarpNotifier::new("127.0.0.1:1");
        let result = notifier
            .send_garp([0u8; 6], Ipv4Addr::new(0, 0, 0, 0))
            .await;
        assert!(result.is_err());
    }
}
