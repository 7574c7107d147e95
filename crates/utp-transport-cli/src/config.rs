//! CLI configuration loaded from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use utp_transport::wire::DEFAULT_MAX_MESSAGE_SIZE;
use utp_transport::{tls, DialOptions, ListenOptions, TransportOptions, DEFAULT_DIAL_TIMEOUT};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Transport behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Address `listen` binds when none is given on the command line.
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub secure: bool,
    /// Per send/recv timeout in milliseconds. Unset waits forever.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: u32,
    #[serde(default)]
    pub max_connections: Option<usize>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            secure: false,
            timeout_ms: None,
            dial_timeout_ms: default_dial_timeout_ms(),
            max_message_size: default_max_message_size(),
            max_connections: None,
        }
    }
}

/// PEM files for TLS. `cert` and `key` go together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub cert: Option<PathBuf>,
    #[serde(default)]
    pub key: Option<PathBuf>,
    /// Roots trusted when dialling. Without it, server certificates are not
    /// verified.
    #[serde(default)]
    pub ca: Option<PathBuf>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Build transport options, reading any configured PEM files.
    pub fn transport_options(&self) -> anyhow::Result<TransportOptions> {
        let mut options = TransportOptions::new()
            .secure(self.transport.secure)
            .max_message_size(self.transport.max_message_size);
        if let Some(ms) = self.transport.timeout_ms {
            options = options.timeout(Duration::from_millis(ms));
        }

        match (&self.tls.cert, &self.tls.key) {
            (Some(cert), Some(key)) => {
                let cert_pem = read_pem(cert)?;
                let key_pem = read_pem(key)?;
                options = options.tls_server_config(tls::server_config(&cert_pem, &key_pem)?);
            }
            (None, None) => {}
            _ => bail!("tls.cert and tls.key must be set together"),
        }

        if let Some(ca) = &self.tls.ca {
            options = options.tls_client_config(tls::client_config_with_roots(&read_pem(ca)?)?);
        }

        Ok(options)
    }

    pub fn dial_options(&self) -> DialOptions {
        DialOptions::new().timeout(Duration::from_millis(self.transport.dial_timeout_ms))
    }

    pub fn listen_options(&self) -> ListenOptions {
        ListenOptions {
            max_connections: self.transport.max_connections,
        }
    }
}

/// Load configuration from the given path, or the default location.
///
/// A missing file at the default location yields the defaults; a missing
/// file that was asked for explicitly is an error.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<(Config, Option<PathBuf>)> {
    let (config_path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (default_config_path(), false),
    };

    if !config_path.exists() {
        if explicit {
            bail!("config file {} does not exist", config_path.display());
        }
        return Ok((Config::default(), None));
    }

    let content = std::fs::read_to_string(&config_path)
        .with_context(|| format!("failed to read config {}", config_path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("failed to parse config {}", config_path.display()))?;
    Ok((config, Some(config_path)))
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("utp-transport")
        .join("config.toml")
}

fn read_pem(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn default_listen() -> String {
    ":8080".to_string()
}

fn default_dial_timeout_ms() -> u64 {
    u64::try_from(DEFAULT_DIAL_TIMEOUT.as_millis()).unwrap_or(u64::MAX)
}

fn default_max_message_size() -> u32 {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("dial_timeout_ms = 5000"));
        assert!(toml_str.contains("listen = \":8080\""));
    }

    #[test]
    fn parse_example_config() {
        let toml_str = r#"
[transport]
listen = "0.0.0.0:9000-9010"
secure = true
timeout_ms = 1500
dial_timeout_ms = 2000
max_connections = 64

[log]
level = "debug"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.transport.listen, "0.0.0.0:9000-9010");
        assert!(config.transport.secure);
        assert_eq!(config.transport.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(config.log.level, "debug");

        let options = config.transport_options().unwrap();
        assert!(options.use_tls());
        assert_eq!(options.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.dial_options().timeout, Duration::from_secs(2));
        assert_eq!(config.listen_options().max_connections, Some(64));
    }

    #[test]
    fn cert_without_key_is_rejected() {
        let config: Config = toml::from_str("[tls]\ncert = \"/tmp/only-cert.pem\"\n").unwrap();
        let err = config.transport_options().unwrap_err();
        assert!(err.to_string().contains("must be set together"));
    }

    #[test]
    fn pem_files_become_tls_configs() {
        let dir = std::env::temp_dir().join(format!("utp-cli-config-{}", std::process::id()));
        let cert = utp_transport_certgen::generate_certificate(&["127.0.0.1"]).unwrap();
        let (cert_path, key_path) = utp_transport_certgen::write_pem_files(&cert, &dir).unwrap();

        let config = Config {
            tls: TlsConfig {
                cert: Some(cert_path.clone()),
                key: Some(key_path),
                ca: Some(cert_path),
            },
            ..Config::default()
        };
        tls::ensure_crypto_provider();
        let options = config.transport_options().unwrap();
        assert!(options.tls.server.is_some());
        assert!(options.tls.client.is_some());
        assert!(options.use_tls());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let path = Path::new("/nonexistent/utp-transport/config.toml");
        assert!(load_config(Some(path)).is_err());
    }
}
