//! edged - fog-trust edge-node daemon
//!
//! Announces this edge's presence and capability set over the gossip
//! channel, and serves key and trust requests to clients.

use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use edged::config::Config;
use edged::server::{LoggingPublisher, Server};
use trust_core::certificate::decode_certificate;

fn load_private_key(path: &std::path::Path) -> anyhow::Result<trust_core::crypto::PrivateKeyBytes> {
    let bytes = fs::read(path)?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("private key file must be exactly 32 bytes"))?;
    Ok(array)
}

fn load_public_key(path: &std::path::Path) -> anyhow::Result<trust_core::crypto::PublicKeyBytes> {
    let bytes = fs::read(path)?;
    let array: [u8; 64] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("public key file must be exactly 64 bytes"))?;
    Ok(array)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("edged=info".parse().unwrap()))
        .init();

    let config = Config::parse();
    if let Err(e) = config.validate() {
        error!("invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    info!("edged v{} starting for eui64={}", env!("CARGO_PKG_VERSION"), config.eui64);

    let certificate = match fs::read(&config.certificate_path).map_err(anyhow::Error::from).and_then(|b| {
        decode_certificate(&b).map_err(anyhow::Error::from)
    }) {
        Ok(cert) => cert,
        Err(e) => {
            error!("failed to load certificate: {e}");
            return ExitCode::FAILURE;
        }
    };

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

    let publisher = Arc::new(LoggingPublisher);
    let server = match Server::new(&config, certificate, private_key, root_public_key, publisher) {
        Ok(server) => server,
        Err(e) => {
            error!("failed to initialize server: {e}");
            return ExitCode::FAILURE;
        }
    };

    let server = Arc::new(server);
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        if let Err(e) = shutdown_server.stop().await {
            error!("error during shutdown: {e}");
        }
        std::process::exit(0);
    });

    if let Err(e) = server.run().await {
        error!("server error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
