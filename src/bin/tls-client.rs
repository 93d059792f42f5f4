use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tls12_mutual::config::{ClientConfig, Identity, KeyExchangeMode, DEFAULT_PORT};
use tls12_mutual::endpoint::client;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tls-client", about = "TLS 1.2 client restricted to one key-exchange mode")]
struct Args {
    /// Key-exchange mode: DHE or RSA (case-insensitive); exactly one
    #[arg(value_name = "MODE")]
    mode: Vec<String>,

    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Client certificate (PEM)
    #[arg(long, default_value = "client.pem")]
    cert: PathBuf,

    /// Client private key (PEM)
    #[arg(long, default_value = "client.key")]
    key: PathBuf,

    /// CA bundle used to verify the server; verification is off without it
    #[arg(long)]
    ca: Option<PathBuf>,

    /// Name the server certificate must carry (DNS name or IP)
    #[arg(long)]
    server_name: Option<String>,

    /// TCP connect timeout in seconds
    #[arg(long, default_value_t = 100)]
    connect_timeout: u64,

    /// TLS handshake timeout in seconds
    #[arg(long, default_value_t = 30)]
    handshake_timeout: u64,

    /// Message to send once the handshake completes
    #[arg(long, default_value = "test_message")]
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mode = KeyExchangeMode::from_args(&args.mode)?;

    let mut builder = ClientConfig::builder(mode)
        .host(args.host)
        .port(args.port)
        .identity(Identity::new(args.cert, args.key))
        .connect_timeout(std::time::Duration::from_secs(args.connect_timeout))
        .handshake_timeout(std::time::Duration::from_secs(args.handshake_timeout));
    if let Some(ca) = args.ca {
        builder = builder.trust_anchor(ca);
    }
    if let Some(name) = args.server_name {
        builder = builder.server_name(name);
    }
    let config = builder.build().context("invalid client configuration")?;

    let suite = client::send_once(config, args.message.as_bytes()).await?;
    tracing::info!(cipher = %suite, "done");
    Ok(())
}
