//! The listener: binds the daemon port, accepts connections and hands each
//! one to its own task.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;

use epmd_core::config::ServerConfig;
use epmd_services::NodeRegistry;

use crate::connection::Connection;
use crate::dispatch::Dispatcher;

const LISTEN_BACKLOG: i32 = 1024;

/// Pause after a failed accept so a persistent error (e.g. out of file
/// descriptors) does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Stops a running [`EpmdServer`]. Cloneable; any clone may trigger it.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }
}

pub struct EpmdServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    shutdown: broadcast::Sender<()>,
    /// Subscribed at bind time so a shutdown sent before `run` is not lost.
    shutdown_rx: broadcast::Receiver<()>,
}

impl EpmdServer {
    /// Bind `config.listen_address:config.port` with `SO_REUSEADDR`.
    pub async fn bind(config: ServerConfig, registry: NodeRegistry) -> Result<Self> {
        let addr = SocketAddr::new(config.listen_address, config.port);
        let listener = bind_listener(addr).with_context(|| format!("failed to bind {addr}"))?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, relaxed = config.relaxed_command_check, "epmd listening");

        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            config.relaxed_command_check,
            local_addr.port(),
        ));
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        Ok(Self {
            listener,
            local_addr,
            config,
            dispatcher,
            shutdown,
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &NodeRegistry {
        self.dispatcher.registry()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown.clone(),
        }
    }

    /// Accept until shut down (by a [`ShutdownHandle`] or an accepted
    /// `Kill`), then give in-flight connections the grace period to finish
    /// and abort the rest.
    pub async fn run(self) -> Result<()> {
        let EpmdServer {
            listener,
            local_addr,
            config,
            dispatcher,
            shutdown,
            mut shutdown_rx,
        } = self;
        let limiter = Arc::new(Semaphore::new(
            config.max_connections.clamp(1, Semaphore::MAX_PERMITS),
        ));
        let mut tasks = JoinSet::new();

        loop {
            let permit = tokio::select! {
                _ = shutdown_rx.recv() => break,
                permit = limiter.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer) = tokio::select! {
                _ = shutdown_rx.recv() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    log_panicked(joined);
                    continue;
                }
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        continue;
                    }
                },
            };

            if !config.allows(peer.ip()) {
                tracing::info!(%peer, "connection refused by allow-list");
                continue;
            }
            tracing::debug!(%peer, "connection accepted");

            let connection = Connection {
                stream,
                peer,
                dispatcher: dispatcher.clone(),
                read_timeout: config.read_timeout(),
                write_timeout: config.write_timeout(),
                shutdown: shutdown.clone(),
                permit,
            };
            tasks.spawn(async move {
                if let Err(e) = connection.serve().await {
                    tracing::warn!(%peer, error = %format!("{e:#}"), "connection failed");
                }
            });
        }

        drop(listener);
        tracing::info!(addr = %local_addr, in_flight = tasks.len(), "epmd stopping");
        drain(&mut tasks, config.shutdown_grace()).await;
        Ok(())
    }
}

fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(
        Domain::for_address(addr),
        Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}

async fn drain(tasks: &mut JoinSet<()>, grace: Duration) {
    let finished = tokio::time::timeout(grace, async {
        while let Some(joined) = tasks.join_next().await {
            log_panicked(joined);
        }
    })
    .await;
    if finished.is_err() {
        tracing::warn!(remaining = tasks.len(), "grace period over, aborting connections");
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }
}

fn log_panicked(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "connection task panicked");
        }
    }
}
