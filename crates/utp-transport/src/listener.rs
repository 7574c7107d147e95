//! The accepting side: uTP listener, per-connection sockets, accept loop.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use librqbit_utp::{UtpSocketUdp, UtpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::{with_timeout, BoxedIo, Connection};
use crate::error::TransportError;
use crate::message::Message;
use crate::transport::{Listener, Socket};

/// An accepted connection.
///
/// Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct UtpSocket {
    conn: Arc<Connection>,
}

impl UtpSocket {
    fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(conn),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.conn.local()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.conn.remote()
    }
}

#[async_trait]
impl Socket for UtpSocket {
    async fn recv(&self) -> Result<Option<Message>, TransportError> {
        self.conn.recv().await
    }

    async fn send(&self, msg: &Message) -> Result<(), TransportError> {
        self.conn.send(msg).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.conn.close().await.map(|_| ())
    }

    fn local(&self) -> String {
        self.conn.local().to_string()
    }

    fn remote(&self) -> String {
        self.conn.remote().to_string()
    }
}

/// Settings every accepted connection inherits from its listener.
#[derive(Clone)]
struct AcceptContext {
    acceptor: Option<TlsAcceptor>,
    local: SocketAddr,
    timeout: Option<Duration>,
    max_message_size: u32,
}

/// A bound uTP listener.
///
/// Accepted connections share the listener's UDP socket, so closing or
/// dropping the listener also ends them.
pub struct UtpListener {
    socket: Arc<UtpSocketUdp>,
    cancel: CancellationToken,
    ctx: AcceptContext,
}

impl UtpListener {
    pub(crate) fn new(
        socket: Arc<UtpSocketUdp>,
        cancel: CancellationToken,
        acceptor: Option<TlsAcceptor>,
        timeout: Option<Duration>,
        max_message_size: u32,
    ) -> Self {
        let local = socket.bind_addr();
        Self {
            socket,
            cancel,
            ctx: AcceptContext {
                acceptor,
                local,
                timeout,
                max_message_size,
            },
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.ctx.local
    }

    /// Whether accepted connections are wrapped in TLS.
    pub fn is_secure(&self) -> bool {
        self.ctx.acceptor.is_some()
    }

    /// Wait for the next raw uTP stream. `None` once the listener is closed.
    async fn next_stream(&self) -> Result<Option<UtpStream>, TransportError> {
        tokio::select! {
            () = self.cancel.cancelled() => Ok(None),
            stream = self.socket.accept() => stream.map(Some).map_err(TransportError::Connection),
        }
    }
}

#[async_trait]
impl Listener for UtpListener {
    type Socket = UtpSocket;

    fn addr(&self) -> String {
        self.ctx.local.to_string()
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            info!(addr = %self.ctx.local, "uTP listener closed");
        }
        Ok(())
    }

    async fn accept<F, Fut>(&self, handler: F) -> Result<(), TransportError>
    where
        F: Fn(Self::Socket) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        while let Some(stream) = self.next_stream().await? {
            debug!(remote = %stream.remote_addr(), "accepted uTP stream");
            tokio::spawn(serve(stream, self.ctx.clone(), Arc::clone(&handler)));
        }
        debug!(addr = %self.ctx.local, "accept loop finished");
        Ok(())
    }
}

impl Drop for UtpListener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Finish setting up one accepted stream and hand it to the handler.
async fn serve<F, Fut>(stream: UtpStream, ctx: AcceptContext, handler: Arc<F>)
where
    F: Fn(UtpSocket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let remote = stream.remote_addr();

    let io: BoxedIo = match ctx.acceptor {
        Some(acceptor) => {
            let handshake = async {
                acceptor
                    .accept(stream)
                    .await
                    .map_err(|e| TransportError::Tls(format!("handshake failed: {e}")))
            };
            match with_timeout(ctx.timeout, handshake).await {
                Ok(tls_stream) => {
                    debug!(remote = %remote, "TLS handshake complete");
                    Box::new(tls_stream)
                }
                Err(e) => {
                    warn!(remote = %remote, error = %e, "dropping connection");
                    return;
                }
            }
        }
        None => Box::new(stream),
    };

    let socket = UtpSocket::new(Connection::new(
        io,
        ctx.local,
        remote,
        ctx.timeout,
        ctx.max_message_size,
    ));

    if let Err(e) = tokio::spawn(handler(socket.clone())).await {
        if e.is_panic() {
            error!(remote = %remote, "connection handler panicked");
        }
    }

    if let Err(e) = socket.close().await {
        debug!(remote = %remote, error = %e, "error closing socket");
    }
}
