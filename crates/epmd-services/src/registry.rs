//! Node registry: every node registered with this daemon, keyed by name.
//!
//! A node is alive while its owning session is open AND a probe of
//! `(session peer ip, node port)` succeeds. Lookups and listings re-check
//! liveness and evict dead entries as a side effect. Removal closes the
//! owning session so the registration connection is torn down with it.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use epmd_core::message::{NodeDescription, NodeInfo};
use epmd_core::wire::{DistributionVersion, NodeType, Protocol};

use crate::creation::CreationCounter;
use crate::liveness::LivenessProbe;
use crate::session::SessionHandle;

/// Removed registrations kept for the `old/unused` part of a dump.
pub const RETIRED_HISTORY: usize = 1000;

/// A registered node.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub port: u16,
    pub node_type: NodeType,
    pub protocol: Protocol,
    pub high: DistributionVersion,
    pub low: DistributionVersion,
    pub extra: Bytes,
    /// Fresh on every successful registration, never 0.
    pub creation: u16,
    /// The connection the registration arrived on.
    pub session: SessionHandle,
}

impl Node {
    fn new(desc: NodeDescription, creation: u16, session: SessionHandle) -> Self {
        Self {
            name: desc.name,
            port: desc.port,
            node_type: desc.node_type,
            protocol: desc.protocol,
            high: desc.high,
            low: desc.low,
            extra: desc.extra,
            creation,
            session,
        }
    }

    pub fn description(&self) -> NodeDescription {
        NodeDescription {
            port: self.port,
            node_type: self.node_type,
            protocol: self.protocol,
            high: self.high,
            low: self.low,
            name: self.name.clone(),
            extra: self.extra.clone(),
        }
    }

    /// Where the liveness probe connects.
    pub fn probe_addr(&self) -> SocketAddr {
        SocketAddr::new(self.session.peer().ip(), self.port)
    }
}

impl From<&Node> for NodeInfo {
    fn from(node: &Node) -> Self {
        NodeInfo::Found(node.description())
    }
}

/// A registration that has been removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetiredNode {
    pub name: String,
    pub port: u16,
    pub session_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered { creation: u16 },
    /// The name is held by a node whose session is still open.
    Conflict,
}

impl RegisterOutcome {
    pub fn creation(self) -> Option<u16> {
        match self {
            RegisterOutcome::Registered { creation } => Some(creation),
            RegisterOutcome::Conflict => None,
        }
    }
}

/// The registry, shared by every connection handler. Cloning shares state.
#[derive(Clone)]
pub struct NodeRegistry {
    nodes: Arc<DashMap<String, Node>>,
    retired: Arc<Mutex<VecDeque<RetiredNode>>>,
    creation: Arc<CreationCounter>,
    probe: Arc<dyn LivenessProbe>,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("nodes", &self.nodes.len())
            .finish_non_exhaustive()
    }
}

impl NodeRegistry {
    pub fn new(probe: impl LivenessProbe + 'static) -> Self {
        Self::with_creation(probe, CreationCounter::new())
    }

    pub fn with_creation(probe: impl LivenessProbe + 'static, creation: CreationCounter) -> Self {
        Self {
            nodes: Arc::new(DashMap::new()),
            retired: Arc::new(Mutex::new(VecDeque::new())),
            creation: Arc::new(creation),
            probe: Arc::new(probe),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert `desc` unless a live node already holds the name.
    ///
    /// Check and insert happen under one shard lock, so concurrent
    /// registrations of a name cannot both succeed. An existing entry whose
    /// session has closed is replaced.
    pub fn register(&self, desc: NodeDescription, session: SessionHandle) -> RegisterOutcome {
        let name = desc.name.clone();
        let (creation, replaced) = match self.nodes.entry(name.clone()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().session.is_closed() {
                    tracing::debug!(name = %name, "registration refused, name taken");
                    return RegisterOutcome::Conflict;
                }
                let creation = self.creation.next();
                let stale = occupied.insert(Node::new(desc, creation, session));
                (creation, Some(stale))
            }
            Entry::Vacant(vacant) => {
                let creation = self.creation.next();
                vacant.insert(Node::new(desc, creation, session));
                (creation, None)
            }
        };
        if let Some(stale) = replaced {
            tracing::debug!(name = %name, "replaced entry of a closed session");
            self.retire(&stale);
        }
        tracing::info!(name = %name, creation, "node registered");
        RegisterOutcome::Registered { creation }
    }

    /// The node registered as `name`, if it is alive.
    pub async fn lookup(&self, name: &str) -> Option<Node> {
        let node = self.nodes.get(name).map(|entry| entry.value().clone())?;
        if self.is_alive(&node).await {
            return Some(node);
        }
        self.evict(&node);
        None
    }

    /// All live nodes, sorted by name. Dead entries are evicted first.
    pub async fn list(&self) -> Vec<Node> {
        let snapshot: Vec<Node> = self.nodes.iter().map(|e| e.value().clone()).collect();
        let verdicts =
            futures::future::join_all(snapshot.iter().map(|node| self.is_alive(node))).await;

        let mut live = Vec::with_capacity(snapshot.len());
        for (node, alive) in snapshot.into_iter().zip(verdicts) {
            if alive {
                live.push(node);
            } else {
                self.evict(&node);
            }
        }
        live.sort_by(|a, b| a.name.cmp(&b.name));
        live
    }

    /// Unconditional removal. Closes the node's session.
    pub fn remove(&self, name: &str) -> Option<Node> {
        let (_, node) = self.nodes.remove(name)?;
        node.session.close();
        self.retire(&node);
        tracing::info!(name = %name, "node unregistered");
        Some(node)
    }

    /// Remove `name` only while it still belongs to `session_id`. Used when a
    /// registration connection goes away, so a newer registration of the same
    /// name is left alone.
    pub fn remove_session(&self, name: &str, session_id: u64) -> Option<Node> {
        let (_, node) = self
            .nodes
            .remove_if(name, |_, node| node.session.id() == session_id)?;
        node.session.close();
        self.retire(&node);
        tracing::info!(name = %name, "node unregistered, connection closed");
        Some(node)
    }

    /// Remove every node. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let names: Vec<String> = self.nodes.iter().map(|e| e.key().clone()).collect();
        names.iter().filter(|name| self.remove(name).is_some()).count()
    }

    /// Most recently removed registrations, oldest first.
    pub fn retired(&self) -> Vec<RetiredNode> {
        self.history().iter().cloned().collect()
    }

    async fn is_alive(&self, node: &Node) -> bool {
        !node.session.is_closed() && self.probe.probe(node.probe_addr()).await
    }

    fn evict(&self, node: &Node) {
        let session_id = node.session.id();
        if let Some((_, node)) = self
            .nodes
            .remove_if(&node.name, |_, current| current.session.id() == session_id)
        {
            node.session.close();
            self.retire(&node);
            tracing::info!(name = %node.name, port = node.port, "evicted dead node");
        }
    }

    fn retire(&self, node: &Node) {
        let mut history = self.history();
        if history.len() == RETIRED_HISTORY {
            history.pop_front();
        }
        history.push_back(RetiredNode {
            name: node.name.clone(),
            port: node.port,
            session_id: node.session.id(),
        });
    }

    fn history(&self) -> std::sync::MutexGuard<'_, VecDeque<RetiredNode>> {
        self.retired.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
