//! One accepted connection: read a request, answer it, then either hang up
//! or keep holding a registration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, OwnedSemaphorePermit};

use epmd_core::frame::{read_request_frame, FrameError};
use epmd_core::message::Request;
use epmd_services::SessionHandle;

use crate::dispatch::{Dispatcher, PostAction};

pub(crate) struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub dispatcher: Arc<Dispatcher>,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub shutdown: broadcast::Sender<()>,
    /// Held while the request is served, released once a registration is
    /// merely being kept alive.
    pub permit: OwnedSemaphorePermit,
}

impl Connection {
    pub async fn serve(mut self) -> Result<()> {
        let mut shutdown_rx = self.shutdown.subscribe();
        let session = SessionHandle::new(self.peer);

        let frame = match tokio::time::timeout(
            self.read_timeout,
            read_request_frame(&mut self.stream),
        )
        .await
        {
            Ok(Ok(frame)) => frame,
            Ok(Err(FrameError::Closed)) => {
                tracing::debug!(peer = %self.peer, "closed before sending a request");
                return Ok(());
            }
            Ok(Err(e)) => return Err(e).context("failed to read request"),
            Err(_) => anyhow::bail!("no request within {:?}", self.read_timeout),
        };

        let request = Request::decode(&frame).context("failed to decode request")?;
        let (response, action) = self
            .dispatcher
            .dispatch(request, &session)
            .await
            .context("failed to encode response")?;

        let written = tokio::time::timeout(self.write_timeout, async {
            self.stream.write_all(&response).await?;
            self.stream.flush().await
        })
        .await;
        let failure = match written {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(anyhow::Error::new(e).context("failed to write response")),
            Err(_) => Some(anyhow::anyhow!(
                "response not taken within {:?}",
                self.write_timeout
            )),
        };
        if let Some(e) = failure {
            // the registration must not outlive a connection we cannot write to
            if let PostAction::HoldRegistration { name } = &action {
                self.dispatcher.registry().remove_session(name, session.id());
            }
            return Err(e);
        }

        match action {
            PostAction::Close => {
                let _ = self.stream.shutdown().await;
            }
            PostAction::ShutdownListener => {
                let _ = self.stream.shutdown().await;
                let _ = self.shutdown.send(());
            }
            PostAction::HoldRegistration { name } => {
                let Connection {
                    stream,
                    peer,
                    dispatcher,
                    permit,
                    ..
                } = self;
                drop(permit);
                hold_registration(stream, &session, &mut shutdown_rx).await;
                session.close();
                dispatcher.registry().remove_session(&name, session.id());
                tracing::debug!(%peer, name = %name, "registration connection finished");
            }
        }
        Ok(())
    }
}

/// Keep the registering connection open until the node hangs up, the
/// registry drops the node, or the daemon shuts down. Anything the node
/// sends meanwhile is ignored.
async fn hold_registration(
    mut stream: TcpStream,
    session: &SessionHandle,
    shutdown: &mut broadcast::Receiver<()>,
) {
    let mut scratch = [0u8; 256];
    loop {
        tokio::select! {
            read = stream.read(&mut scratch) => match read {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(peer = %session.peer(), error = %e, "registration connection failed");
                    break;
                }
            },
            _ = session.closed() => break,
            _ = shutdown.recv() => break,
        }
    }
}
