//! Async EPMD client. Every call opens its own connection.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashSet;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;

use epmd_core::config::ClientConfig;
use epmd_core::message::{
    EpmdDump, EpmdInfo, GetEpmdDump, GetEpmdInfo, GetNodeInfo, Kill, KillResult, NodeDescription,
    NodeInfo, Registration, RegistrationResult, RequestMessage, ResponseMessage, Stop, StopResult,
};

use crate::error::{ClientError, Result};

/// Client for one daemon. Clones share the in-flight limit and the set of
/// names registered through this client.
#[derive(Debug, Clone)]
pub struct EpmdClient {
    addr: SocketAddr,
    config: ClientConfig,
    limiter: Arc<Semaphore>,
    registered: Arc<DashSet<String>>,
}

impl EpmdClient {
    /// Talk to the daemon at `config.host:config.port`.
    pub fn new(config: ClientConfig) -> Self {
        let addr = SocketAddr::new(config.host, config.port);
        Self::with_addr(addr, config)
    }

    /// Talk to the daemon at `addr`; `config` supplies timeouts and limits.
    pub fn with_addr(addr: SocketAddr, config: ClientConfig) -> Self {
        Self {
            addr,
            limiter: Arc::new(Semaphore::new(
                config.max_in_flight.clamp(1, Semaphore::MAX_PERMITS),
            )),
            registered: Arc::new(DashSet::new()),
            config,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether this client currently holds a registration for `name`.
    pub fn is_registered(&self, name: &str) -> bool {
        self.registered.contains(name)
    }

    /// Register `node`. The returned handle owns the connection that keeps
    /// the registration alive; the daemon forgets the node once it closes.
    ///
    /// Fails with [`ClientError::NameConflict`] without contacting the daemon
    /// when this client already holds the name. Never retried.
    pub async fn register(&self, node: NodeDescription) -> Result<NodeRegistration> {
        let name = node.name.clone();
        if !self.registered.insert(name.clone()) {
            return Err(ClientError::NameConflict(name));
        }
        match self.register_inner(node).await {
            Ok((stream, creation)) => {
                tracing::debug!(name = %name, creation, "registered with epmd");
                Ok(NodeRegistration {
                    name,
                    creation,
                    stream: Some(stream),
                    registered: self.registered.clone(),
                })
            }
            Err(e) => {
                self.registered.remove(&name);
                Err(e)
            }
        }
    }

    async fn register_inner(&self, node: NodeDescription) -> Result<(TcpStream, u16)> {
        let name = node.name.clone();
        let request = Registration::from(node).encode()?;
        let _permit = self.limiter.acquire().await.ok();
        let mut stream = self.connect().await?;

        let reply = self
            .bounded("registration", async {
                stream.write_all(&request).await?;
                read_up_to(&mut stream, RegistrationResult::WIRE_LEN).await
            })
            .await?;
        let result = RegistrationResult::decode(&reply)?;
        if !result.ok {
            return Err(ClientError::RegistrationRefused(name));
        }
        Ok((stream, result.creation))
    }

    /// Look up a node by name. An unknown name is `NodeInfo::NotFound`.
    pub async fn lookup(&self, name: &str) -> Result<NodeInfo> {
        self.call(&GetNodeInfo::new(name)).await
    }

    /// Names and ports of every registered node.
    pub async fn list_nodes(&self) -> Result<EpmdInfo> {
        self.call(&GetEpmdInfo).await
    }

    /// Active and recently removed registrations.
    pub async fn dump(&self) -> Result<EpmdDump> {
        self.call(&GetEpmdDump).await
    }

    /// Ask the daemon to unregister `name`. Needs relaxed command checking
    /// on the daemon.
    pub async fn stop(&self, name: &str) -> Result<StopResult> {
        self.call(&Stop::new(name)).await
    }

    /// Ask the daemon to drop every node and exit. Needs relaxed command
    /// checking on the daemon.
    pub async fn kill(&self) -> Result<KillResult> {
        self.call(&Kill).await
    }

    /// One-shot exchange: the daemon answers and closes.
    async fn call<Req, Resp>(&self, request: &Req) -> Result<Resp>
    where
        Req: RequestMessage,
        Resp: ResponseMessage,
    {
        let frame = request.encode()?;
        let _permit = self.limiter.acquire().await.ok();
        let mut stream = self.connect().await?;
        tracing::debug!(addr = %self.addr, tag = %Req::TAG, "sending request");

        let reply = self
            .bounded("request", async {
                stream.write_all(&frame).await?;
                let mut reply = Vec::new();
                stream.read_to_end(&mut reply).await?;
                Ok::<_, std::io::Error>(reply)
            })
            .await?;
        Ok(Resp::decode(&reply)?)
    }

    async fn connect(&self) -> Result<TcpStream> {
        let timeout = self.config.connect_timeout();
        match tokio::time::timeout(timeout, TcpStream::connect(self.addr)).await {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                Ok(stream)
            }
            Ok(Err(source)) => Err(ClientError::Connection {
                addr: self.addr,
                source,
            }),
            Err(_) => Err(ClientError::Timeout {
                what: "connect",
                after: timeout,
            }),
        }
    }

    async fn bounded<T, F>(&self, what: &'static str, io: F) -> Result<T>
    where
        F: Future<Output = std::io::Result<T>>,
    {
        let after = self.config.request_timeout();
        match tokio::time::timeout(after, io).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ClientError::Timeout { what, after }),
        }
    }
}

/// Read until `limit` bytes arrived or the peer closed.
async fn read_up_to<R>(reader: &mut R, limit: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; limit];
    let mut filled = 0;
    while filled < limit {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

// ── Registration handle ───────────────────────────────────────────────────────

/// A live registration. Dropping it closes the connection, which makes the
/// daemon forget the node, and frees the name in the client.
#[derive(Debug)]
pub struct NodeRegistration {
    name: String,
    creation: u16,
    stream: Option<TcpStream>,
    registered: Arc<DashSet<String>>,
}

impl NodeRegistration {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creation number the daemon assigned to this incarnation.
    pub fn creation(&self) -> u16 {
        self.creation
    }

    /// Resolves when the daemon closes the connection, e.g. after a `Stop`
    /// for this name or when the daemon exits.
    pub async fn closed(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        let mut scratch = [0u8; 64];
        loop {
            match stream.read(&mut scratch).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
        self.stream = None;
    }

    /// Close the connection and wait for the close to be sent.
    pub async fn unregister(mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        tracing::debug!(name = %self.name, "unregistered from epmd");
        Ok(())
    }
}

impl Drop for NodeRegistration {
    fn drop(&mut self) {
        self.registered.remove(&self.name);
    }
}
