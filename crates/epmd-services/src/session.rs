//! Owning-session handles: the connection a node registered on.
//!
//! The registry never touches sockets. It holds a [`SessionHandle`] per node
//! and asks it whether the connection is still open. The connection task
//! closes the handle when the socket goes away; the registry closes it when
//! it removes the node, which tells the connection task to hang up.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct SessionInner {
    id: u64,
    peer: SocketAddr,
    closed: watch::Sender<bool>,
}

/// Shared handle to one accepted connection. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl SessionHandle {
    pub fn new(peer: SocketAddr) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(SessionInner {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                peer,
                closed,
            }),
        }
    }

    /// Process-unique id. Shown as the `fd` column of a dump.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.inner.peer
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Idempotent.
    pub fn close(&self) {
        self.inner.closed.send_replace(true);
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        // the sender lives in `inner`, so the channel cannot be dropped here
        let _ = rx.wait_for(|closed| *closed).await;
    }
}
