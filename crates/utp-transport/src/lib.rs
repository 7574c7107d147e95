//! uTP transport plugin for RPC frameworks.
//!
//! Dials and listens on uTP sockets (via librqbit-utp), optionally wraps the
//! byte stream in TLS (via rustls), and moves length-prefixed bincode v2
//! [`Message`]s over it. The plugin contract lives in [`transport`];
//! [`UtpTransport`] implements it.

pub mod client;
mod connection;
pub mod error;
pub mod listener;
pub mod message;
pub mod net;
pub mod options;
pub mod tls;
pub mod transport;
pub mod utp;
pub mod wire;

pub use client::UtpClient;
pub use error::TransportError;
pub use listener::{UtpListener, UtpSocket};
pub use message::Message;
pub use options::{DialOptions, ListenOptions, TlsOptions, TransportOptions, DEFAULT_DIAL_TIMEOUT};
pub use transport::{Client, Listener, Socket, Transport};
pub use utp::UtpTransport;
