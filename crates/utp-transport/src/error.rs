//! Transport errors.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0:#}")]
    Connection(anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("certificate error: {0}")]
    Certificate(#[from] utp_transport_certgen::CertgenError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid address {addr:?}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    #[error("serialisation error: {0}")]
    Serialization(String),

    #[error("deserialisation error: {0}")]
    Deserialization(String),

    #[error("message size {size} exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: u32 },

    #[error("socket closed")]
    Closed,
}

impl TransportError {
    pub(crate) fn invalid_address(addr: &str, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            addr: addr.to_string(),
            reason: reason.into(),
        }
    }
}
