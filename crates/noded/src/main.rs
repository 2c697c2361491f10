//! noded - fog-trust client daemon
//!
//! Tracks known edges and capabilities, maintains this client's own view
//! of edge trust, and periodically broadcasts that view to peers.

use std::fs;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::time::interval;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use noded::{Config, LoggingTransport, NodeClient};
use trust_core::exchange::{self, Confirmable, OutgoingMessage, TxSlots};

fn load_private_key(path: &std::path::Path) -> anyhow::Result<trust_core::crypto::PrivateKeyBytes> {
    let bytes = fs::read(path)?;
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("private key file must be exactly 32 bytes"))
}

fn load_public_key(path: &std::path::Path) -> anyhow::Result<trust_core::crypto::PublicKeyBytes> {
    let bytes = fs::read(path)?;
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("public key file must be exactly 64 bytes"))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("noded=info".parse().unwrap()))
        .init();

    let config = Config::parse();
    if let Err(e) = config.validate() {
        error!("invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    info!("noded v{} starting for eui64={}", env!("CARGO_PKG_VERSION"), config.eui64);

    let private_key = match load_private_key(&config.private_key_path) {
        Ok(key) => key,
        Err(e) => {
            error!("failed to load private key: {e}");
            return ExitCode::FAILURE;
        }
    };

    let root_public_key = match load_public_key(&config.root_public_key_path) {
        Ok(key) => key,
        Err(e) => {
            error!("failed to load root public key: {e}");
            return ExitCode::FAILURE;
        }
    };

    let client = match NodeClient::new(&config, private_key, root_public_key) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("failed to initialize client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let transport = LoggingTransport;
    let mut tx_slots = TxSlots::default();

    tokio::spawn({
        let client = client.clone();
        async move {
            tokio::signal::ctrl_c().await.ok();
            info!(eui64 = %client.eui64(), "received shutdown signal");
            std::process::exit(0);
        }
    });

    let mut ticker = interval(Duration::from_secs(config.broadcast_interval_secs));
    let mut elapsed_secs: u64 = 0;
    loop {
        ticker.tick().await;
        elapsed_secs = elapsed_secs.saturating_add(config.broadcast_interval_secs);

        let frame = match client.build_trust_frame(elapsed_secs) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to build trust frame");
                continue;
            }
        };

        let guard = match tx_slots.acquire() {
            Ok(guard) => guard,
            Err(e) => {
                warn!(error = %e, "no free transmit slot for trust broadcast, skipping this tick");
                continue;
            }
        };

        if let Err(e) = exchange::TrustTransport::broadcast(
            &transport,
            OutgoingMessage {
                confirmable: Confirmable::Non,
                payload: frame,
            },
        )
        .await
        {
            warn!(error = %e, "trust broadcast failed");
        }

        drop(guard);
    }
}
