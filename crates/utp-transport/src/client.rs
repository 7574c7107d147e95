//! The dialling side of a uTP connection.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::connection::Connection;
use crate::error::TransportError;
use crate::message::Message;
use crate::options::DialOptions;
use crate::transport::{Client, Socket};

/// A connection opened by [`crate::UtpTransport`]'s dial.
///
/// Owns a private uTP socket, which is stopped when the client is closed or
/// dropped.
pub struct UtpClient {
    conn: Connection,
    dial_options: DialOptions,
    socket_cancel: CancellationToken,
}

impl UtpClient {
    pub(crate) fn new(
        conn: Connection,
        dial_options: DialOptions,
        socket_cancel: CancellationToken,
    ) -> Self {
        Self {
            conn,
            dial_options,
            socket_cancel,
        }
    }

    /// Options this client was dialled with.
    pub fn dial_options(&self) -> &DialOptions {
        &self.dial_options
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.conn.local()
    }

    pub fn remote_addr(&self) -> std::net::SocketAddr {
        self.conn.remote()
    }
}

#[async_trait]
impl Socket for UtpClient {
    async fn recv(&self) -> Result<Option<Message>, TransportError> {
        self.conn.recv().await
    }

    async fn send(&self, msg: &Message) -> Result<(), TransportError> {
        self.conn.send(msg).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        let result = self.conn.close().await;
        self.socket_cancel.cancel();
        result.map(|_| ())
    }

    fn local(&self) -> String {
        self.conn.local().to_string()
    }

    fn remote(&self) -> String {
        self.conn.remote().to_string()
    }
}

impl Client for UtpClient {}

impl Drop for UtpClient {
    fn drop(&mut self) {
        self.socket_cancel.cancel();
    }
}
