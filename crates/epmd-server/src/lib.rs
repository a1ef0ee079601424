//! epmd-server: the daemon's network side. Listener, per-connection
//! handling and the request dispatch table.

mod connection;
pub mod dispatch;
mod server;

pub use dispatch::{Dispatcher, PostAction};
pub use server::{EpmdServer, ShutdownHandle};
