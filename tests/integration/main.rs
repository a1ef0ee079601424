//! epmd integration test harness.
//!
//! Every test starts its own daemon on 127.0.0.1 with an OS-assigned port
//! and talks to it through the real client or raw sockets:
//!
//!   cargo test --test integration
//!
//! Nodes are stood in for by plain TCP listeners, so the daemon's liveness
//! probe has something real to connect to.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use epmd_client::EpmdClient;
use epmd_core::config::{ClientConfig, ServerConfig};
use epmd_core::message::NodeDescription;
use epmd_server::{EpmdServer, ShutdownHandle};
use epmd_services::{NodeRegistry, TcpProbe};

mod admin;
mod framing;
mod queries;
mod registration;

// ── Harness ───────────────────────────────────────────────────────────────────

/// A daemon running inside the test's runtime.
pub struct TestDaemon {
    pub addr: SocketAddr,
    pub registry: NodeRegistry,
    pub shutdown: ShutdownHandle,
    pub task: JoinHandle<Result<()>>,
}

impl TestDaemon {
    pub async fn start() -> TestDaemon {
        Self::start_with(|_| {}).await
    }

    pub async fn relaxed() -> TestDaemon {
        Self::start_with(|c| c.relaxed_command_check = true).await
    }

    /// Start with the loopback defaults adjusted by `tweak`.
    pub async fn start_with(tweak: impl FnOnce(&mut ServerConfig)) -> TestDaemon {
        let mut config = ServerConfig {
            listen_address: "127.0.0.1".parse().unwrap(),
            port: 0,
            read_timeout_ms: 1_000,
            liveness_timeout_ms: 500,
            shutdown_grace_ms: 500,
            ..ServerConfig::default()
        };
        tweak(&mut config);

        let registry = NodeRegistry::new(TcpProbe::new(config.liveness_timeout()));
        let server = EpmdServer::bind(config, registry)
            .await
            .expect("daemon should bind");
        let addr = server.local_addr();
        let registry = server.registry().clone();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.run());
        TestDaemon {
            addr,
            registry,
            shutdown,
            task,
        }
    }

    pub fn client(&self) -> EpmdClient {
        EpmdClient::with_addr(
            self.addr,
            ClientConfig {
                connect_timeout_ms: 1_000,
                request_timeout_ms: 2_000,
                ..ClientConfig::default()
            },
        )
    }

    /// Shut down and wait for the accept loop to finish.
    pub async fn stop(self) -> Result<()> {
        self.shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .context("daemon did not stop")??
    }
}

/// A listening socket standing in for a node's distribution port.
pub async fn fake_node() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// A node description pointing at a fresh fake node.
pub async fn node(name: &str) -> (TcpListener, NodeDescription) {
    let (listener, port) = fake_node().await;
    (listener, NodeDescription::new(name, port))
}

/// Write `bytes`, half-close, and collect whatever the daemon answers.
pub async fn raw_exchange(addr: SocketAddr, bytes: &[u8]) -> Result<Vec<u8>> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(bytes).await?;
    stream.shutdown().await?;
    let mut reply = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut reply))
        .await
        .context("daemon kept the connection open")??;
    Ok(reply)
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually<F, Fut>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
