//! epmd-client: talk to an EPMD daemon from async Rust.

mod client;
mod error;

pub use client::{EpmdClient, NodeRegistration};
pub use error::{ClientError, Result};
