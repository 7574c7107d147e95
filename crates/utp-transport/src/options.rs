//! Transport, dial and listen options.

use std::sync::Arc;
use std::time::Duration;

use crate::wire::DEFAULT_MAX_MESSAGE_SIZE;

/// Default timeout for establishing an outbound connection.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Caller-supplied TLS configuration.
///
/// Setting either side switches the transport into TLS mode even when
/// [`TransportOptions::secure`] is false.
#[derive(Clone, Default)]
pub struct TlsOptions {
    /// Used for outbound connections. Falls back to a configuration that
    /// skips certificate verification.
    pub client: Option<Arc<rustls::ClientConfig>>,
    /// Used for listeners. Falls back to a self-signed certificate for the
    /// listen address.
    pub server: Option<Arc<rustls::ServerConfig>>,
}

impl TlsOptions {
    pub fn is_configured(&self) -> bool {
        self.client.is_some() || self.server.is_some()
    }
}

impl std::fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsOptions")
            .field("client", &self.client.is_some())
            .field("server", &self.server.is_some())
            .finish()
    }
}

/// Options shared by every dial and listen of a transport.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Wrap connections in TLS.
    pub secure: bool,
    pub tls: TlsOptions,
    /// Bound on each send and receive, and on the server-side TLS handshake.
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    /// Largest frame payload accepted or produced.
    pub max_message_size: u32,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            secure: false,
            tls: TlsOptions::default(),
            timeout: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl TransportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn tls_client_config(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        self.tls.client = Some(config);
        self
    }

    #[must_use]
    pub fn tls_server_config(mut self, config: Arc<rustls::ServerConfig>) -> Self {
        self.tls.server = Some(config);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn max_message_size(mut self, size: u32) -> Self {
        self.max_message_size = size;
        self
    }

    /// Whether connections get a TLS layer.
    pub fn use_tls(&self) -> bool {
        self.secure || self.tls.is_configured()
    }
}

/// Options for a single outbound connection.
#[derive(Debug, Clone)]
pub struct DialOptions {
    /// Bound on the uTP connect plus the TLS handshake.
    pub timeout: Duration,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

impl DialOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Options for a single listener.
#[derive(Debug, Clone, Default)]
pub struct ListenOptions {
    /// Cap on live uTP connections; the uTP library default when unset.
    pub max_connections: Option<usize>,
}

impl ListenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }
}
