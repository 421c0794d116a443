//! Client side of the Bitcoin peer-to-peer protocol for a single peer.
//!
//! [`wire`] frames and parses messages, [`session`] runs the connection
//! lifecycle on top of a pluggable [`transport`].

pub mod config;
pub mod error;
pub mod session;
pub mod transport;
pub mod wire;

pub use config::{Network, NetworkSettings, SessionConfig};
pub use error::{NodeError, WireError};
pub use session::{BlockInventory, ConnectHandle, ConnectionState, Session};
pub use transport::{TcpTransport, Transport};
