use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tls12_mutual::pki::{self, DhSource, PkiOptions};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "tls-gen-pki",
    about = "Write a development CA, server and client identities, and DH parameters"
)]
struct Args {
    /// Output directory
    #[arg(long, default_value = ".")]
    out: PathBuf,

    /// Generate fresh DH parameters of this size instead of the RFC 5114 group (slow)
    #[arg(long)]
    dh_bits: Option<u32>,

    /// DNS name for the server certificate
    #[arg(long, default_value = "localhost")]
    server_name: String,

    /// Certificate lifetime in days
    #[arg(long, default_value_t = 365)]
    days: u32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let opts = PkiOptions {
        validity_days: args.days,
        server_name: args.server_name,
        dh: args.dh_bits.map_or(DhSource::Rfc5114, DhSource::Generate),
        ..PkiOptions::default()
    };
    if let DhSource::Generate(bits) = opts.dh {
        tracing::info!(bits, "generating DH parameters, this can take a while");
    }

    let pki = pki::generate(&args.out, &opts)
        .with_context(|| format!("writing PKI to {}", args.out.display()))?;
    tracing::info!(dir = %pki.dir().display(), "wrote ca.pem, server.pem/.key, client.pem/.key, dh.pem");
    Ok(())
}
