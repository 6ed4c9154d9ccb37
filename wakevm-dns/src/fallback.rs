//! Wraps an upstream DNS resolver for queries the local zone can't answer.

use std::net::SocketAddr;
use std::str::FromStr;

use hickory_client::client::{AsyncClient, ClientHandle};
use hickory_client::proto::udp::UdpClientStream;
use hickory_client::proto::DnsHandle;
use hickory_client::rr::{DNSClass, Name, Record, RecordType};
use tokio::net::UdpSocket;
use tracing::warn;

/// Forwards unmatched queries to a configured upstream server.
///
/// Opens a fresh connection per query rather than keeping one open: the
/// fallback path only runs for names this system doesn't own, which in
/// steady state is rare compared to the activation hot path.
pub struct FallbackResolver {
    upstream: SocketAddr,
}

impl FallbackResolver {
    pub fn new(upstream: SocketAddr) -> Self {
        Self { upstream }
    }

    /// Issue `(class, type, name)` upstream and return the records it
    /// replied with. Any failure — connect, timeout, malformed reply — is
    /// swallowed and reported as `None`.
    pub async fn resolve(&self, class: DNSClass, qtype: RecordType, name: &str) -> Option<Vec<Record>> {
        let name = Name::from_str(name).ok()?;

        let stream = UdpClientStream::<UdpSocket>::new(self.upstream);
        let (mut client, bg) = AsyncClient::connect(stream).await.ok()?;
        tokio::spawn(bg);

        match client.query(name, class, qtype).await {
            Ok(response) => Some(response.answers().to_vec()),
            Err(e) => {
                warn!(error = %e, "fallback resolver query failed");
                None
            }
        }
    }
}
