//! utp-transport CLI: echo server, dial client and certificate generator.

mod config;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use utp_transport::{Listener, Message, Socket, Transport, UtpSocket, UtpTransport};

use crate::config::Config;

#[derive(Parser)]
#[command(
    name = "utp-transport",
    about = "Send and receive framed messages over uTP, optionally with TLS",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Wrap connections in TLS.
    #[arg(long, global = true)]
    secure: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an echo server.
    Listen {
        /// Address to bind: host:port, :port, or host:min-max.
        address: Option<String>,
    },

    /// Send messages to a server and print the replies.
    Dial {
        /// Address of the server (host:port).
        address: String,

        /// Header to attach, as key=value. Repeatable.
        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Message body.
        #[arg(short, long, default_value = "ping")]
        body: String,

        /// Number of messages to send.
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },

    /// Generate a self-signed TLS certificate.
    GenerateCert {
        /// Host name or IP address to certify. Repeatable; defaults to this
        /// machine's host name.
        #[arg(long = "host")]
        hosts: Vec<String>,

        /// Output directory for certificate files.
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (mut config, config_path) = config::load_config(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log.level)),
        )
        .init();

    match &config_path {
        Some(path) => info!(path = %path.display(), "loaded config"),
        None => info!("no config file found, using defaults"),
    }

    if cli.secure {
        config.transport.secure = true;
    }

    match cli.command {
        Commands::Listen { address } => {
            let address = address.unwrap_or_else(|| config.transport.listen.clone());
            listen(&config, &address).await?;
        }
        Commands::Dial {
            address,
            headers,
            body,
            count,
        } => {
            dial(&config, &address, headers, body, count).await?;
        }
        Commands::GenerateCert { hosts, output } => {
            let hosts = if hosts.is_empty() {
                vec![hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| "localhost".to_string())]
            } else {
                hosts
            };

            info!(hosts = ?hosts, output = %output.display(), "generating TLS certificate");

            let cert = utp_transport_certgen::generate_certificate(&hosts)?;
            let (cert_path, key_path) = utp_transport_certgen::write_pem_files(&cert, &output)?;

            println!("Certificate: {}", cert_path.display());
            println!("Private key: {}", key_path.display());
            println!("Fingerprint: {}", cert.fingerprint);
        }
    }

    Ok(())
}

async fn listen(config: &Config, address: &str) -> anyhow::Result<()> {
    let transport = UtpTransport::new(config.transport_options()?);
    let listener = transport
        .listen(address, config.listen_options())
        .await
        .with_context(|| format!("failed to listen on {address}"))?;
    println!("Listening on {}", listener.addr());

    tokio::select! {
        result = listener.accept(echo) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            listener.close().await?;
        }
    }
    Ok(())
}

async fn echo(sock: UtpSocket) {
    info!(remote = %sock.remote(), "client connected");
    loop {
        match sock.recv().await {
            Ok(Some(msg)) => {
                if let Err(e) = sock.send(&msg).await {
                    warn!(remote = %sock.remote(), error = %e, "echo failed");
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(remote = %sock.remote(), error = %e, "receive failed");
                break;
            }
        }
    }
    info!(remote = %sock.remote(), "client disconnected");
}

async fn dial(
    config: &Config,
    address: &str,
    headers: Vec<(String, String)>,
    body: String,
    count: u32,
) -> anyhow::Result<()> {
    let transport = UtpTransport::new(config.transport_options()?);
    let client = transport
        .dial(address, config.dial_options())
        .await
        .with_context(|| format!("failed to dial {address}"))?;
    info!(local = %client.local(), remote = %client.remote(), "connected");

    let mut msg = Message::new(body);
    msg.header.extend(headers);

    for seq in 0..count {
        client.send(&msg).await?;
        match client.recv().await? {
            Some(reply) => {
                let mut header: Vec<_> = reply.header.iter().collect();
                header.sort();
                println!(
                    "[{seq}] {} {:?}",
                    String::from_utf8_lossy(&reply.body),
                    header
                );
            }
            None => {
                warn!("server closed the connection");
                break;
            }
        }
    }

    client.close().await?;
    Ok(())
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_arguments_split_on_first_equals() {
        assert_eq!(
            parse_header("Micro-Endpoint=Greeter.Hello").unwrap(),
            ("Micro-Endpoint".to_string(), "Greeter.Hello".to_string())
        );
        assert_eq!(
            parse_header("query=a=b").unwrap(),
            ("query".to_string(), "a=b".to_string())
        );
        assert!(parse_header("no-separator").is_err());
        assert!(parse_header("=value").is_err());
    }

    #[test]
    fn cli_parses_dial_arguments() {
        let cli = Cli::try_parse_from([
            "utp-transport",
            "--secure",
            "dial",
            "127.0.0.1:9000",
            "-H",
            "a=1",
            "--header",
            "b=2",
            "-n",
            "3",
        ])
        .unwrap();
        assert!(cli.secure);
        match cli.command {
            Commands::Dial {
                address,
                headers,
                body,
                count,
            } => {
                assert_eq!(address, "127.0.0.1:9000");
                assert_eq!(headers.len(), 2);
                assert_eq!(body, "ping");
                assert_eq!(count, 3);
            }
            _ => panic!("expected dial"),
        }
    }
}
