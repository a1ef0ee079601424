//! epmd-core: wire format, message types, framing and configuration.
//! All other epmd crates depend on this one.

pub mod config;
pub mod frame;
pub mod message;
pub mod wire;

pub use config::{ClientConfig, ConfigError, EpmdConfig, LoggingConfig, ServerConfig};
pub use frame::{read_request_frame, FrameError};
pub use message::{
    DumpEntry, DumpState, EpmdDump, EpmdInfo, GetEpmdDump, GetEpmdInfo, GetNodeInfo, Kill,
    KillResult, NamedPort, NodeDescription, NodeInfo, Registration, RegistrationResult, Request,
    RequestMessage, ResponseMessage, Stop, StopResult,
};
pub use wire::{DistributionVersion, NodeType, Protocol, Tag, WireError};
