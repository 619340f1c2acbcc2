//! Switchboard Signal Server
//!
//! WebSocket signaling hub with relay credential issuance.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (0.0.0.0:8086), config from the platform config dir if present
//! switchboard-signal
//!
//! # Explicit config file and advertised relay address
//! switchboard-signal --config /etc/switchboard/config.toml --public-ip 203.0.113.7
//! ```

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use switchboard_core::Config;
use switchboard_signal::SignalServer;

#[derive(Parser, Debug)]
#[command(name = "switchboard-signal")]
#[command(about = "Switchboard signaling hub for WebRTC peers")]
#[command(version)]
struct Args {
    /// Config file (TOML); defaults to the platform config dir
    #[arg(short, long, env = "SWITCHBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Public address advertised in relay URIs
    #[arg(long)]
    public_ip: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    if let Some(bind) = args.bind {
        config.signal.bind = bind;
    }
    if let Some(port) = args.port {
        config.signal.port = port;
    }
    if let Some(public_ip) = args.public_ip {
        config.relay.public_ip = public_ip;
    }

    info!("Starting Switchboard Signal Server");
    info!("Advertising relay URIs: {:?}", config.relay.uris());

    let server = SignalServer::new(config);
    let addr = server.listen_addr();
    info!("Relay auth realm: {}", server.authorizer().realm());
    info!("Listening on {}", addr);
    server.serve(addr).await?;

    Ok(())
}
