use std::net::SocketAddr;
use std::time::Duration;

use epmd_core::wire::WireError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to epmd at {addr}: {source}")]
    Connection {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("{what} timed out after {after:?}")]
    Timeout { what: &'static str, after: Duration },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed response: {0}")]
    Wire(#[from] WireError),

    /// This client already holds a registration for the name.
    #[error("name {0:?} is already registered by this client")]
    NameConflict(String),

    /// The daemon answered the registration with a failure status.
    #[error("epmd refused to register {0:?}")]
    RegistrationRefused(String),
}

impl ClientError {
    /// The daemon could not be reached or the exchange broke off, as opposed
    /// to the daemon answering "no".
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            ClientError::Connection { .. } | ClientError::Timeout { .. } | ClientError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
