//! Maps each decoded request to a registry operation and a response.

use bytes::Bytes;

use epmd_core::message::{
    DumpEntry, DumpState, EpmdDump, EpmdInfo, KillResult, NamedPort, NodeInfo, RegistrationResult,
    Request, ResponseMessage, StopResult,
};
use epmd_core::wire::WireError;
use epmd_services::{NodeRegistry, RegisterOutcome, SessionHandle};

/// What the connection does once the response is flushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostAction {
    Close,
    /// The registration succeeded; the connection now keeps `name` alive.
    HoldRegistration { name: String },
    /// Close, then stop the whole listener.
    ShutdownListener,
}

pub struct Dispatcher {
    registry: NodeRegistry,
    /// Permit `Kill` and `Stop`.
    relaxed: bool,
    /// The daemon's own port, echoed at the head of listings.
    daemon_port: u32,
}

impl Dispatcher {
    pub fn new(registry: NodeRegistry, relaxed: bool, daemon_port: u16) -> Self {
        Self {
            registry,
            relaxed,
            daemon_port: u32::from(daemon_port),
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Run `request` against the registry. The registry is updated before
    /// the response is returned.
    pub async fn dispatch(
        &self,
        request: Request,
        session: &SessionHandle,
    ) -> Result<(Bytes, PostAction), WireError> {
        tracing::debug!(peer = %session.peer(), tag = %request.tag(), "dispatching request");
        match request {
            Request::Registration(registration) => {
                let name = registration.node.name.clone();
                match self.registry.register(registration.node, session.clone()) {
                    RegisterOutcome::Registered { creation } => Ok((
                        RegistrationResult::accepted(creation).encode()?,
                        PostAction::HoldRegistration { name },
                    )),
                    RegisterOutcome::Conflict => {
                        Ok((RegistrationResult::refused().encode()?, PostAction::Close))
                    }
                }
            }

            Request::GetNodeInfo(query) => {
                let info = match self.registry.lookup(&query.name).await {
                    Some(node) => NodeInfo::from(&node),
                    None => NodeInfo::NotFound,
                };
                Ok((info.encode()?, PostAction::Close))
            }

            Request::GetEpmdInfo(_) => {
                let nodes = self
                    .registry
                    .list()
                    .await
                    .into_iter()
                    .map(|node| NamedPort {
                        name: node.name,
                        port: node.port,
                    })
                    .collect();
                let info = EpmdInfo {
                    port: self.daemon_port,
                    nodes,
                };
                Ok((info.encode()?, PostAction::Close))
            }

            Request::GetEpmdDump(_) => {
                let active = self.registry.list().await.into_iter().map(|node| DumpEntry {
                    state: DumpState::Active,
                    fd: node.session.id(),
                    name: node.name,
                    port: node.port,
                });
                let retired = self.registry.retired().into_iter().map(|old| DumpEntry {
                    state: DumpState::OldUnused,
                    name: old.name,
                    port: old.port,
                    fd: old.session_id,
                });
                let dump = EpmdDump {
                    port: self.daemon_port,
                    entries: active.chain(retired).collect(),
                };
                Ok((dump.encode()?, PostAction::Close))
            }

            Request::Kill(_) => {
                if !self.relaxed {
                    tracing::warn!(peer = %session.peer(), "kill refused, relaxed command check is off");
                    return Ok((KillResult::Nok.encode()?, PostAction::Close));
                }
                let removed = self.registry.clear();
                tracing::info!(peer = %session.peer(), removed, "kill accepted");
                Ok((KillResult::Ok.encode()?, PostAction::ShutdownListener))
            }

            Request::Stop(stop) => {
                let result = if !self.relaxed {
                    tracing::warn!(peer = %session.peer(), name = %stop.name, "stop refused, relaxed command check is off");
                    StopResult::NoExist
                } else if self.registry.remove(&stop.name).is_some() {
                    StopResult::Stopped
                } else {
                    StopResult::NoExist
                };
                Ok((result.encode()?, PostAction::Close))
            }
        }
    }
}
