//! epmd-services: the node registry and what it needs to judge liveness.

pub mod creation;
pub mod liveness;
pub mod registry;
pub mod session;

pub use creation::CreationCounter;
pub use liveness::{LivenessProbe, SessionOnly, TcpProbe};
pub use registry::{Node, NodeRegistry, RegisterOutcome, RetiredNode, RETIRED_HISTORY};
pub use session::SessionHandle;
