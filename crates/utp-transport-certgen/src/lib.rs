//! Self-signed TLS certificate generation for utp-transport.
//!
//! Secure listeners that were not handed a server certificate certify the
//! hosts they listen on with a throwaway self-signed certificate. Every
//! certificate is identified by its SHA-256 fingerprint.

pub mod error;

pub use error::CertgenError;

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose, SanType,
};

/// File name of the PEM certificate written by [`write_pem_files`].
pub const CERT_FILE_NAME: &str = "utp-transport.crt";
/// File name of the PEM private key written by [`write_pem_files`].
pub const KEY_FILE_NAME: &str = "utp-transport.key";

/// A generated certificate and private key pair.
pub struct GeneratedCert {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
    /// SHA-256 fingerprint of the DER-encoded certificate.
    pub fingerprint: String,
}

/// Generate a new self-signed certificate valid for every entry of `hosts`.
///
/// Entries that parse as IP addresses become IP subject alternative names,
/// everything else becomes a DNS name. The first host is used as the
/// common name.
pub fn generate_certificate<S: AsRef<str>>(hosts: &[S]) -> Result<GeneratedCert, CertgenError> {
    let params = certificate_params(hosts)?;
    let key_pair = KeyPair::generate().map_err(|e| CertgenError::Generation(e.to_string()))?;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CertgenError::Generation(e.to_string()))?;

    let cert_pem = cert.pem();
    let key_pem = key_pair.serialize_pem();
    let fingerprint = sha256_fingerprint(cert.der());

    Ok(GeneratedCert {
        cert_pem,
        key_pem,
        fingerprint,
    })
}

/// Write a generated certificate into `dir` as [`CERT_FILE_NAME`] and
/// [`KEY_FILE_NAME`], returning both paths.
pub fn write_pem_files(
    cert: &GeneratedCert,
    dir: &Path,
) -> Result<(PathBuf, PathBuf), CertgenError> {
    std::fs::create_dir_all(dir)?;
    let cert_path = dir.join(CERT_FILE_NAME);
    let key_path = dir.join(KEY_FILE_NAME);
    std::fs::write(&cert_path, &cert.cert_pem)?;
    std::fs::write(&key_path, &cert.key_pem)?;
    Ok((cert_path, key_path))
}

fn certificate_params<S: AsRef<str>>(hosts: &[S]) -> Result<CertificateParams, CertgenError> {
    let first = hosts.first().ok_or(CertgenError::NoHosts)?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, first.as_ref());
    dn.push(DnType::OrganizationName, "utp-transport");
    params.distinguished_name = dn;

    params.subject_alt_names = hosts
        .iter()
        .map(|host| san_for_host(host.as_ref()))
        .collect::<Result<_, _>>()?;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    Ok(params)
}

fn san_for_host(host: &str) -> Result<SanType, CertgenError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SanType::IpAddress(ip));
    }
    let name = host
        .try_into()
        .map_err(|e: rcgen::Error| CertgenError::InvalidHost {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
    Ok(SanType::DnsName(name))
}

/// Compute SHA-256 fingerprint of DER-encoded certificate bytes.
fn sha256_fingerprint(der: &[u8]) -> String {
    use std::fmt::Write;
    let digest = ring::digest::digest(&ring::digest::SHA256, der);
    let mut fingerprint = String::from("SHA256:");
    for (i, byte) in digest.as_ref().iter().enumerate() {
        if i > 0 {
            fingerprint.push(':');
        }
        let _ = write!(fingerprint, "{byte:02x}");
    }
    fingerprint
}
