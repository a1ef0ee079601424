//! Liveness probing for registered nodes.

use std::net::SocketAddr;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::net::TcpStream;

/// Decides whether a node is still reachable at `addr`.
pub trait LivenessProbe: Send + Sync {
    fn probe(&self, addr: SocketAddr) -> BoxFuture<'_, bool>;
}

/// Opens a TCP connection to the node's distribution port. Any completed
/// connect counts as alive, even if the node closes it at once.
#[derive(Debug, Clone, Copy)]
pub struct TcpProbe {
    pub timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl LivenessProbe for TcpProbe {
    fn probe(&self, addr: SocketAddr) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            match tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await {
                Ok(Ok(_stream)) => true,
                Ok(Err(e)) => {
                    tracing::debug!(%addr, error = %e, "liveness probe refused");
                    false
                }
                Err(_) => {
                    tracing::debug!(%addr, "liveness probe timed out");
                    false
                }
            }
        })
    }
}

/// Treats every node as reachable; only the owning session decides.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOnly;

impl LivenessProbe for SessionOnly {
    fn probe(&self, _addr: SocketAddr) -> BoxFuture<'_, bool> {
        Box::pin(async { true })
    }
}
