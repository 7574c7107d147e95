//! The transport plugin contract.
//!
//! An RPC framework drives any transport through these traits: dial to get a
//! [`Client`], listen to get a [`Listener`], and exchange [`Message`]s over
//! [`Socket`]s.

use std::future::Future;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::message::Message;
use crate::options::{DialOptions, ListenOptions, TransportOptions};

/// A bidirectional message stream.
#[async_trait]
pub trait Socket: Send + Sync {
    /// Receive the next message.
    ///
    /// Returns `None` once the peer has cleanly closed its side.
    async fn recv(&self) -> Result<Option<Message>, TransportError>;

    /// Send a message.
    async fn send(&self, msg: &Message) -> Result<(), TransportError>;

    /// Close the socket. Closing twice is a no-op.
    async fn close(&self) -> Result<(), TransportError>;

    /// Local address, as a string.
    fn local(&self) -> String;

    /// Remote address, as a string.
    fn remote(&self) -> String;
}

/// The dialling side of a connection.
pub trait Client: Socket {}

/// Accepts inbound connections.
#[async_trait]
pub trait Listener: Send + Sync {
    type Socket: Socket + 'static;

    /// The bound address, as a string.
    fn addr(&self) -> String;

    /// Stop accepting. A running [`Listener::accept`] returns `Ok(())`.
    async fn close(&self) -> Result<(), TransportError>;

    /// Run the accept loop, calling `handler` on its own task for every
    /// inbound connection. The socket is closed once the handler returns.
    async fn accept<F, Fut>(&self, handler: F) -> Result<(), TransportError>
    where
        F: Fn(Self::Socket) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static;
}

/// A pluggable transport.
#[async_trait]
pub trait Transport: Send + Sync {
    type Client: Client;
    type Listener: Listener;

    /// Replace the transport options.
    fn init(&mut self, options: TransportOptions);

    fn options(&self) -> &TransportOptions;

    async fn dial(&self, addr: &str, opts: DialOptions) -> Result<Self::Client, TransportError>;

    async fn listen(
        &self,
        addr: &str,
        opts: ListenOptions,
    ) -> Result<Self::Listener, TransportError>;

    /// Short transport name, e.g. `"utp"`.
    fn name(&self) -> &'static str;
}
