//! thing-bootstrap - obtain an access token for a thing from its gateway
//!
//! Usage:
//!   thing-bootstrap --address gateway.local:5684 --key thing-key.pem
//!
//! Environment variables:
//!   THING_GATEWAY_ADDRESS - gateway `host:port` (default: 127.0.0.1:5684)
//!   THING_KEY - PEM file holding the thing's PKCS#8 EC private key
//!   THING_GATEWAY_PIN - SHA-256 fingerprint the gateway certificate must match
//!   RUST_LOG - log filter (default: info)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use things_gateway::client::{ClientConfig, DEFAULT_GATEWAY_ADDRESS, bootstrap_with};
use things_gateway::crypto::{DeviceKey, Fingerprint, device_key_from_pem, generate_p256};
use things_gateway::transport::PeerTrust;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "thing-bootstrap")]
#[command(about = "Authenticate a thing with its gateway and print the access token")]
#[command(version)]
struct Args {
    /// Gateway address
    #[arg(long, env = "THING_GATEWAY_ADDRESS", default_value = DEFAULT_GATEWAY_ADDRESS)]
    address: String,

    /// PEM file with the thing's PKCS#8 private key (P-256 or P-384)
    #[arg(long, env = "THING_KEY", conflicts_with = "ephemeral_key")]
    key: Option<PathBuf>,

    /// Use a freshly generated P-256 key instead of --key
    #[arg(long)]
    ephemeral_key: bool,

    /// Gateway certificate fingerprint to pin (hex, colons optional)
    #[arg(long, env = "THING_GATEWAY_PIN")]
    pin: Option<Fingerprint>,

    /// Handshake timeout in milliseconds
    #[arg(long, default_value = "10000")]
    handshake_timeout_ms: u64,

    /// Per-exchange timeout in milliseconds
    #[arg(long, default_value = "10000")]
    exchange_timeout_ms: u64,

    /// Overall deadline in milliseconds
    #[arg(long)]
    deadline_ms: Option<u64>,
}

fn load_key(args: &Args) -> anyhow::Result<Option<Arc<dyn DeviceKey>>> {
    if args.ephemeral_key {
        warn!("using an ephemeral key; the gateway will see a new thing");
        return Ok(Some(Arc::new(generate_p256())));
    }
    let Some(path) = &args.key else {
        return Ok(None);
    };
    let pem = std::fs::read_to_string(path)
        .with_context(|| format!("reading key file {}", path.display()))?;
    let key = device_key_from_pem(&pem)
        .with_context(|| format!("loading key from {}", path.display()))?;
    Ok(Some(Arc::from(key)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let key = load_key(&args)?;

    let config = ClientConfig {
        handshake_timeout: Duration::from_millis(args.handshake_timeout_ms),
        exchange_timeout: Duration::from_millis(args.exchange_timeout_ms),
        deadline: args.deadline_ms.map(Duration::from_millis),
        trust: args.pin.map_or(PeerTrust::SelfIssued, PeerTrust::Pinned),
        ..ClientConfig::new(args.address.clone())
    };

    info!(address = %config.address, "bootstrapping");
    let result = bootstrap_with(config, key)
        .await
        .with_context(|| format!("bootstrap against {}", args.address))?;

    info!(
        token_id = %result.token_id,
        things_version = %result.am_info.things_version,
        "access token acquired"
    );
    println!("{}", serde_json::to_string_pretty(&result.token)?);
    Ok(())
}
