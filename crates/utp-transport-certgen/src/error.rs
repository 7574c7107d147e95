//! Certificate generation errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertgenError {
    #[error("no hosts given to certify")]
    NoHosts,

    #[error("invalid host name {host:?}: {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("certificate generation failed: {0}")]
    Generation(String),

    #[error("failed to write certificate: {0}")]
    Io(#[from] std::io::Error),
}
