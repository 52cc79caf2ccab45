//! Reachability probes used by the liveness monitor.

use std::net::SocketAddr;

use async_trait::async_trait;
use futures::future::{self, FutureExt};
use tokio::net::TcpStream;

/// Bounded reachability check. Any I/O error means "unreachable".
///
/// Callers bound each probe with their own timeout.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, address: &str) -> bool;
}

/// TCP connect probe.
///
/// An address carrying its own port (`10.0.0.5:3000`) is tried as is;
/// a bare host is tried on every configured port at once and counts as
/// reachable when any of them accepts.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    ports: Vec<u16>,
}

impl TcpProbe {
    pub fn new(ports: impl IntoIterator<Item = u16>) -> Self {
        Self {
            ports: ports.into_iter().collect(),
        }
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn probe(&self, address: &str) -> bool {
        if let Ok(addr) = address.parse::<SocketAddr>() {
            return TcpStream::connect(addr).await.is_ok();
        }
        if self.ports.is_empty() {
            return false;
        }

        let attempts = self.ports.iter().map(|port| {
            let target = format!("{}:{}", address, port);
            async move { TcpStream::connect(target).await.map(|_| ()) }.boxed()
        });

        match future::select_ok(attempts).await {
            Ok(_) => true,
            Err(e) => {
                tracing::trace!(address, error = %e, "Probe failed");
                false
            }
        }
    }
}
