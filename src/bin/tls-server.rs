use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tls12_mutual::config::{Identity, KeyExchangeMode, ServerConfig, DEFAULT_PORT, MAX_MESSAGE_SIZE};
use tls12_mutual::Server;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tls-server", about = "TLS 1.2 server offering DHE and RSA key exchange")]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Server certificate (PEM)
    #[arg(long, default_value = "server.pem")]
    cert: PathBuf,

    /// Server private key (PEM)
    #[arg(long, default_value = "server.key")]
    key: PathBuf,

    /// DH parameters (PEM)
    #[arg(long, default_value = "dh.pem")]
    dh: PathBuf,

    /// CA bundle used to verify clients; client certificates are required when set
    #[arg(long)]
    ca: Option<PathBuf>,

    /// Key-exchange modes to offer (repeatable); both by default
    #[arg(long = "mode")]
    modes: Vec<KeyExchangeMode>,

    /// Listen backlog
    #[arg(long, default_value_t = 1)]
    backlog: u32,

    /// TLS handshake timeout in seconds
    #[arg(long, default_value_t = 30)]
    handshake_timeout: u64,

    /// Timeout in seconds for the message read after the handshake
    #[arg(long, default_value_t = 30)]
    read_timeout: u64,

    /// Size of the single read per session, in bytes
    #[arg(long, default_value_t = MAX_MESSAGE_SIZE)]
    max_message_size: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut builder = ServerConfig::builder()
        .bind_ip(args.bind)
        .port(args.port)
        .identity(Identity::new(args.cert, args.key))
        .dh_params(args.dh)
        .backlog(args.backlog)
        .handshake_timeout(Duration::from_secs(args.handshake_timeout))
        .read_timeout(Duration::from_secs(args.read_timeout))
        .max_message_size(args.max_message_size);
    if !args.modes.is_empty() {
        builder = builder.suites(args.modes.iter().map(|m| m.cipher_suite()));
    }
    if let Some(ca) = args.ca {
        builder = builder.trust_anchor(ca);
    }
    let config = builder.build().context("invalid server configuration")?;

    let server = Server::bind(config).await?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            on_signal.cancel();
        }
    });

    server.serve(shutdown, None).await;
    Ok(())
}
