//! uTP transport: dial and listen.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use librqbit_utp::{SocketOpts, UtpSocketUdp};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::UtpClient;
use crate::connection::{BoxedIo, Connection};
use crate::error::TransportError;
use crate::listener::UtpListener;
use crate::net;
use crate::options::{DialOptions, ListenOptions, TransportOptions};
use crate::tls;
use crate::transport::Transport;

/// Transport that moves length-prefixed bincode messages over uTP,
/// optionally inside TLS.
#[derive(Debug, Clone)]
pub struct UtpTransport {
    options: TransportOptions,
}

impl UtpTransport {
    pub fn new(options: TransportOptions) -> Self {
        tls::ensure_crypto_provider();
        Self { options }
    }

    /// Connect a fresh uTP socket to `target` and attach TLS if enabled.
    async fn connect(
        &self,
        target: SocketAddr,
        host: &str,
        socket_opts: SocketOpts,
    ) -> Result<Connection, TransportError> {
        let bind = unspecified_for(target.ip());
        let socket = UtpSocketUdp::new_udp_with_opts(bind, socket_opts)
            .await
            .map_err(TransportError::Connection)?;
        let stream = socket
            .connect(target)
            .await
            .map_err(TransportError::Connection)?;

        let local = socket.bind_addr();
        let remote = stream.remote_addr();
        debug!(local = %local, remote = %remote, "uTP connection established");

        let io: BoxedIo = if self.options.use_tls() {
            let config = self
                .options
                .tls
                .client
                .clone()
                .unwrap_or_else(tls::client_config_skip_verification);
            let tls_stream = TlsConnector::from(config)
                .connect(tls::server_name(host)?, stream)
                .await
                .map_err(|e| TransportError::Tls(format!("handshake failed: {e}")))?;
            debug!(remote = %remote, "TLS handshake complete");
            Box::new(tls_stream)
        } else {
            Box::new(stream)
        };

        Ok(Connection::new(
            io,
            local,
            remote,
            self.options.timeout,
            self.options.max_message_size,
        ))
    }

    /// TLS acceptor for a listener on `addr`, if TLS is enabled.
    fn acceptor_for(&self, addr: &str) -> Result<Option<TlsAcceptor>, TransportError> {
        if !self.options.use_tls() {
            return Ok(None);
        }
        let config = match &self.options.tls.server {
            Some(config) => Arc::clone(config),
            None => self_signed_server_config(addr)?,
        };
        Ok(Some(TlsAcceptor::from(config)))
    }
}

impl Default for UtpTransport {
    fn default() -> Self {
        Self::new(TransportOptions::default())
    }
}

impl std::fmt::Display for UtpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[async_trait]
impl Transport for UtpTransport {
    type Client = UtpClient;
    type Listener = UtpListener;

    fn init(&mut self, options: TransportOptions) {
        self.options = options;
    }

    fn options(&self) -> &TransportOptions {
        &self.options
    }

    async fn dial(&self, addr: &str, opts: DialOptions) -> Result<UtpClient, TransportError> {
        let (target, host) = net::resolve_dial(addr).await?;

        let cancel = CancellationToken::new();
        let socket_opts = SocketOpts {
            cancellation_token: cancel.clone(),
            ..SocketOpts::default()
        };

        let connected = tokio::time::timeout(opts.timeout, self.connect(target, &host, socket_opts))
            .await
            .map_err(|_| TransportError::Timeout(opts.timeout))
            .and_then(|conn| conn);

        match connected {
            Ok(conn) => {
                debug!(addr = %target, secure = self.options.use_tls(), "dialled");
                Ok(UtpClient::new(conn, opts, cancel))
            }
            Err(e) => {
                cancel.cancel();
                Err(e)
            }
        }
    }

    async fn listen(&self, addr: &str, opts: ListenOptions) -> Result<UtpListener, TransportError> {
        let acceptor = self.acceptor_for(addr)?;

        let (socket, cancel) = net::listen_on(addr, |bind| {
            let max_connections = opts.max_connections;
            async move {
                let cancel = CancellationToken::new();
                let socket_opts = SocketOpts {
                    cancellation_token: cancel.clone(),
                    max_live_vsocks: max_connections,
                    ..SocketOpts::default()
                };
                let socket = UtpSocketUdp::new_udp_with_opts(bind, socket_opts)
                    .await
                    .map_err(TransportError::Connection)?;
                Ok((socket, cancel))
            }
        })
        .await?;

        info!(
            addr = %socket.bind_addr(),
            secure = acceptor.is_some(),
            "uTP listener bound"
        );
        Ok(UtpListener::new(
            socket,
            cancel,
            acceptor,
            self.options.timeout,
            self.options.max_message_size,
        ))
    }

    fn name(&self) -> &'static str {
        "utp"
    }
}

/// Server config with a fresh self-signed certificate for the hosts
/// reachable through `addr`.
fn self_signed_server_config(addr: &str) -> Result<Arc<rustls::ServerConfig>, TransportError> {
    let hosts = net::certificate_hosts(addr);
    let cert = utp_transport_certgen::generate_certificate(&hosts)?;
    info!(
        hosts = ?hosts,
        fingerprint = %cert.fingerprint,
        "generated self-signed listener certificate"
    );
    tls::server_config(&cert.cert_pem, &cert.key_pem)
}

fn unspecified_for(ip: IpAddr) -> SocketAddr {
    match ip {
        IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_and_display() {
        let transport = UtpTransport::default();
        assert_eq!(transport.name(), "utp");
        assert_eq!(transport.to_string(), "utp");
    }

    #[test]
    fn init_replaces_options() {
        let mut transport = UtpTransport::default();
        assert!(!transport.options().secure);
        transport.init(TransportOptions::new().secure(true));
        assert!(transport.options().secure);
    }

    #[test]
    fn plaintext_listener_has_no_acceptor() {
        let transport = UtpTransport::default();
        assert!(transport.acceptor_for("127.0.0.1:0").unwrap().is_none());
    }

    #[test]
    fn secure_listener_generates_certificate() {
        let transport = UtpTransport::new(TransportOptions::new().secure(true));
        assert!(transport.acceptor_for("127.0.0.1:0").unwrap().is_some());
    }

    #[test]
    fn certificate_errors_pass_through() {
        let transport = UtpTransport::new(TransportOptions::new().secure(true));
        let err = transport.acceptor_for("h\u{f4}te:9000").err().unwrap();
        assert!(matches!(err, TransportError::Certificate(_)));
    }

    #[test]
    fn supplied_server_config_skips_generation() {
        tls::ensure_crypto_provider();
        let cert = utp_transport_certgen::generate_certificate(&["localhost"]).unwrap();
        let config = tls::server_config(&cert.cert_pem, &cert.key_pem).unwrap();
        let transport = UtpTransport::new(TransportOptions::new().tls_server_config(config));
        assert!(transport.acceptor_for("h\u{f4}te:9000").unwrap().is_some());
    }

    #[test]
    fn unspecified_bind_matches_family() {
        assert_eq!(
            unspecified_for("10.0.0.1".parse().unwrap()),
            "0.0.0.0:0".parse().unwrap()
        );
        assert_eq!(
            unspecified_for("::1".parse().unwrap()),
            "[::]:0".parse().unwrap()
        );
    }
}
